// SPDX-License-Identifier: GPL-3.0-only

//! Deferred, evaluate-once values
//!
//! Calibration edges are often expensive to compute (a device query, a
//! composition of other edges) and are frequently never needed. A [`Lazy`]
//! holds the producer and caches the first result.

use crate::calibration::Extrinsics;
use std::sync::OnceLock;

type Producer<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Value computed on first access and cached afterwards
pub struct Lazy<T> {
    cell: OnceLock<T>,
    init: Producer<T>,
}

/// Lazily evaluated rigid transform, the unit stored on graph edges
pub type LazyExtrinsics = Lazy<Extrinsics>;

impl<T> Lazy<T> {
    /// Defer `init` until the first [`Lazy::get`]
    pub fn new(init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            cell: OnceLock::new(),
            init: Box::new(init),
        }
    }

    /// The cached value, computing it on first call
    ///
    /// Concurrent first calls block until one producer finishes; the producer
    /// runs at most once.
    pub fn get(&self) -> &T {
        self.cell.get_or_init(|| (self.init)())
    }

    /// Whether the producer has already run
    pub fn is_evaluated(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: Clone + Send + Sync + 'static> Lazy<T> {
    /// Already-evaluated lazy holding `value`
    pub fn from_value(value: T) -> Self {
        let cached = value.clone();
        let lazy = Self::new(move || value.clone());
        let _ = lazy.cell.set(cached);
        lazy
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cell.get() {
            Some(value) => f.debug_tuple("Lazy").field(value).finish(),
            None => f.write_str("Lazy(<pending>)"),
        }
    }
}
