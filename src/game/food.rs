//! Food slots: generation at room creation and respawn on consumption

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::{FoodKind, GameConfig};

use super::snake::Vector;

/// Points for food without a configured kind
pub const DEFAULT_FOOD_SCORE: u32 = 50;

/// One food slot. The slot `id` is stable for the room's lifetime.
///
/// On the wire a slot is `[x, y, id]`, or `[x, y, id, score, kind]` when a
/// food kind was rolled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FoodWire", into = "FoodWire")]
pub struct FoodItem {
    pub x: i32,
    pub y: i32,
    pub id: usize,
    pub kind: Option<String>,
    pub score: Option<u32>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FoodWire {
    Typed(i32, i32, usize, u32, String),
    Plain(i32, i32, usize),
}

impl From<FoodItem> for FoodWire {
    fn from(item: FoodItem) -> Self {
        let points = item.points();
        match item.kind {
            Some(kind) => FoodWire::Typed(item.x, item.y, item.id, points, kind),
            None => FoodWire::Plain(item.x, item.y, item.id),
        }
    }
}

impl From<FoodWire> for FoodItem {
    fn from(wire: FoodWire) -> Self {
        match wire {
            FoodWire::Typed(x, y, id, score, kind) => FoodItem {
                x,
                y,
                id,
                kind: Some(kind),
                score: Some(score),
            },
            FoodWire::Plain(x, y, id) => FoodItem {
                x,
                y,
                id,
                kind: None,
                score: None,
            },
        }
    }
}

impl FoodItem {
    pub fn position(&self) -> Vector {
        Vector::new(self.x, self.y)
    }

    pub fn points(&self) -> u32 {
        self.score.unwrap_or(DEFAULT_FOOD_SCORE)
    }
}

/// Owns a room's food slots and the RNG that places them
pub struct FoodSpawner {
    items: Vec<FoodItem>,
    left: i32,
    grid: i32,
    cells: i32,
    kinds: Vec<FoodKind>,
    weights: Option<WeightedIndex<u32>>,
    rng: ChaCha8Rng,
}

impl FoodSpawner {
    /// Generate `food_storage` grid-aligned slots with ids `0..n`
    pub fn new(config: &GameConfig, seed: u64) -> Self {
        let weights = if config.food_kinds.is_empty() {
            None
        } else {
            WeightedIndex::new(config.food_kinds.iter().map(|k| k.weight)).ok()
        };

        let mut spawner = Self {
            items: Vec::with_capacity(config.food_storage),
            left: config.left_section_size,
            grid: config.grid_size,
            cells: config.cells_per_side(),
            kinds: config.food_kinds.clone(),
            weights,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };

        for slot in 0..config.food_storage {
            let item = spawner.roll(slot);
            spawner.items.push(item);
        }
        spawner
    }

    pub fn items(&self) -> &[FoodItem] {
        &self.items
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Slot id of the food lying exactly at `position`, if any
    pub fn slot_at(&self, position: Vector) -> Option<usize> {
        self.items
            .iter()
            .find(|item| item.position() == position)
            .map(|item| item.id)
    }

    /// Move a slot to a fresh random cell under the same id
    pub fn respawn(&mut self, slot: usize) -> Option<FoodItem> {
        if slot >= self.items.len() {
            return None;
        }
        let item = self.roll(slot);
        self.items[slot] = item.clone();
        Some(item)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn roll(&mut self, slot: usize) -> FoodItem {
        let x = self.rng.gen_range(0..self.cells) * self.grid + self.left;
        let y = self.rng.gen_range(0..self.cells) * self.grid;
        let kind = match &self.weights {
            Some(weights) => self.kinds.get(weights.sample(&mut self.rng)),
            None => None,
        };

        FoodItem {
            x,
            y,
            id: slot,
            kind: kind.map(|k| k.name.clone()),
            score: kind.map(|k| k.score),
        }
    }
}
