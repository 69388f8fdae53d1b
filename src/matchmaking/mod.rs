//! Room assignment and session lifecycle

pub mod directory;
pub mod service;

pub use directory::RoomDirectory;
pub use service::{Session, SessionService};
