//! Per-slot box colors
//!
//! Hues are spread evenly around the color wheel and then shuffled with a
//! fixed seed, so neighbouring slots get unrelated colors while the palette
//! stays identical from one run to the next.

use image::Rgb;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Seed for the palette shuffle
pub const PALETTE_SEED: u64 = 123456;

/// How a detection picks its color slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorKeying {
    /// Slot = index of the detection in the current frame's result list.
    ///
    /// The same class can change color between frames when the detection
    /// order or count changes.
    #[default]
    Positional,
    /// Slot = persistent per-class index, assigned in first-seen order
    ByClass,
}

/// Immutable slot -> color mapping
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColorTable {
    colors: Vec<Rgb<u8>>,
}

impl ColorTable {
    /// Evenly spaced, seeded-shuffled palette with `n` slots
    pub fn generate(n: usize) -> Self {
        let mut colors: Vec<Rgb<u8>> = (0..n)
            .map(|i| {
                let (r, g, b) = hsv_to_rgb(i as f64 / n as f64, 1.0, 1.0);
                Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(PALETTE_SEED);
        colors.shuffle(&mut rng);

        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<Rgb<u8>> {
        self.colors.get(slot).copied()
    }

    pub fn colors(&self) -> &[Rgb<u8>] {
        &self.colors
    }

    /// Copy of this table grown to `n` slots; existing slots keep their colors.
    ///
    /// New slots take colors from `generate(n)` that the table does not
    /// already hold, in that table's order.
    pub fn extended(&self, n: usize) -> Self {
        if n <= self.colors.len() {
            return self.clone();
        }

        let fresh = Self::generate(n);
        let mut colors = self.colors.clone();
        let (unused, reused): (Vec<Rgb<u8>>, Vec<Rgb<u8>>) = fresh
            .colors
            .into_iter()
            .partition(|c| !self.colors.contains(c));
        colors.extend(unused.into_iter().chain(reused).take(n - self.colors.len()));

        Self { colors }
    }
}

/// HSV to RGB, all components in [0, 1]
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    if s == 0.0 {
        return (v, v, v);
    }
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match (sector as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// Owns the color tables and grows them on demand.
///
/// The positional table is regenerated only when more slots are requested
/// than it holds. The class table only ever appends, so a class keeps its
/// color once assigned. Readers always get a frozen `Arc` snapshot.
#[derive(Debug, Default)]
pub struct ColorAssigner {
    table: RwLock<Arc<ColorTable>>,
    class_table: RwLock<Arc<ColorTable>>,
    class_slots: Mutex<HashMap<String, usize>>,
}

impl ColorAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigner with class slots pre-registered in the given order
    pub fn with_classes<S: AsRef<str>>(class_names: &[S]) -> Self {
        let assigner = Self::new();
        for name in class_names {
            assigner.slot_for_class(name.as_ref());
        }
        assigner.ensure_capacity(class_names.len());
        assigner.ensure_class_capacity(class_names.len());
        assigner
    }

    /// Table with at least `n` slots.
    ///
    /// Returns the current table unchanged when it is already large enough.
    pub fn ensure_capacity(&self, n: usize) -> Arc<ColorTable> {
        {
            let table = self.table.read();
            if table.len() >= n {
                return table.clone();
            }
        }

        let mut table = self.table.write();
        // Another caller may have grown it between the two locks
        if table.len() < n {
            debug!("Rebuilding color table: {} -> {} slots", table.len(), n);
            *table = Arc::new(ColorTable::generate(n));
        }
        table.clone()
    }

    /// Class table with at least `n` slots, appending colors when it grows
    pub fn ensure_class_capacity(&self, n: usize) -> Arc<ColorTable> {
        {
            let table = self.class_table.read();
            if table.len() >= n {
                return table.clone();
            }
        }

        let mut table = self.class_table.write();
        if table.len() < n {
            debug!("Extending class color table: {} -> {} slots", table.len(), n);
            *table = Arc::new(table.extended(n));
        }
        table.clone()
    }

    /// Current table without growing it
    pub fn table(&self) -> Arc<ColorTable> {
        self.table.read().clone()
    }

    /// Persistent slot for a class name, assigned in first-seen order
    pub fn slot_for_class(&self, class_name: &str) -> usize {
        let mut slots = self.class_slots.lock();
        let next = slots.len();
        *slots.entry(class_name.to_string()).or_insert(next)
    }

    /// Number of classes that have a slot
    pub fn class_count(&self) -> usize {
        self.class_slots.lock().len()
    }
}
