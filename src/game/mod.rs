//! Game simulation modules

pub mod collision;
pub mod food;
pub mod room;
pub mod simulation;
pub mod snake;
