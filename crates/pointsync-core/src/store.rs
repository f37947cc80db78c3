//! The authoritative point set.
//!
//! Points are deduplicated by a quantized key: coordinates are snapped to an
//! integer grid of `10^-precision` and two points landing in the same cell
//! are the same entity. Coordinates too large for the grid to hold exactly
//! already have coarser spacing than the grid, so they are keyed by value.

use crate::hub::HubError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pointsync_protocol::Point;
use tracing::trace;

/// Default number of fractional digits kept by the key.
pub const DEFAULT_PRECISION: u32 = 6;

/// Largest supported precision.
pub const MAX_PRECISION: u32 = 12;

/// Magnitude (2^53) below which every grid cell is an exact integer in both
/// `f64` and `i64`.
const GRID_LIMIT: f64 = 9_007_199_254_740_992.0;

/// One quantized coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Cell {
    /// Index on the `10^-precision` grid.
    Grid(i64),
    /// Bit pattern of a coordinate whose spacing is already coarser than
    /// the grid, or that is not finite.
    Exact(u64),
}

/// Canonical identity of a point: its coordinates on the quantization grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointKey {
    x: Cell,
    y: Cell,
    z: Cell,
}

/// Maps points to their canonical keys.
#[derive(Debug, Clone, Copy)]
pub struct Quantizer {
    precision: u32,
    scale: f64,
}

impl Quantizer {
    /// Create a quantizer keeping `precision` fractional digits.
    ///
    /// # Errors
    ///
    /// Returns an error if `precision` exceeds [`MAX_PRECISION`].
    pub fn new(precision: u32) -> Result<Self, HubError> {
        if precision > MAX_PRECISION {
            return Err(HubError::InvalidPrecision(precision));
        }
        Ok(Self::with_precision(precision))
    }

    fn with_precision(precision: u32) -> Self {
        Self {
            precision,
            scale: 10f64.powi(precision as i32),
        }
    }

    /// Number of fractional digits kept.
    #[must_use]
    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Compute the canonical key of a point.
    #[must_use]
    pub fn key(&self, point: &Point) -> PointKey {
        PointKey {
            x: self.cell(point.x),
            y: self.cell(point.y),
            z: self.cell(point.z),
        }
    }

    fn cell(&self, value: f64) -> Cell {
        let scaled = (value * self.scale).round();
        if scaled.abs() < GRID_LIMIT {
            // In range, so the cast is exact and -0.0 lands on 0
            return Cell::Grid(scaled as i64);
        }
        if value.is_nan() {
            return Cell::Exact(f64::NAN.to_bits());
        }
        Cell::Exact(value.to_bits())
    }
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::with_precision(DEFAULT_PRECISION)
    }
}

/// A concurrency-safe, deduplicated set of points.
#[derive(Debug, Default)]
pub struct PointStore {
    points: DashMap<PointKey, Point>,
    quantizer: Quantizer,
}

impl PointStore {
    /// Create an empty store with the default precision.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with a specific quantizer.
    #[must_use]
    pub fn with_quantizer(quantizer: Quantizer) -> Self {
        Self {
            points: DashMap::new(),
            quantizer,
        }
    }

    /// The quantizer deciding point identity.
    #[must_use]
    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    /// Add a point.
    ///
    /// Returns `false` without touching the store if a point with the same
    /// key is already present. The check and the insert happen under one
    /// shard lock, so concurrent adds of the same point cannot both succeed.
    pub fn add(&self, point: Point) -> bool {
        match self.points.entry(self.quantizer.key(&point)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(point);
                trace!(point = %point, "Point added");
                true
            }
        }
    }

    /// Remove a point.
    ///
    /// Returns `false` if no point with the same key is present.
    pub fn remove(&self, point: &Point) -> bool {
        let removed = self.points.remove(&self.quantizer.key(point)).is_some();
        if removed {
            trace!(point = %point, "Point removed");
        }
        removed
    }

    /// Check whether a point with the same key is present.
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        self.points.contains_key(&self.quantizer.key(point))
    }

    /// Copy the current contents. Order is unspecified.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Point> {
        self.points.iter().map(|entry| *entry.value()).collect()
    }

    /// Number of points in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
