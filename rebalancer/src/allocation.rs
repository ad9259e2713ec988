//! Asset allocation mapping and its validation.
//!
//! An allocation maps asset identifiers ("stocks", "bonds", "gold", ...) to
//! percentages of the portfolio. Well-formed allocations are non-empty, hold no
//! negative values, and sum to 100 within [`SUM_TOLERANCE`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Absolute tolerance on the allocation total, in percentage points.
pub const SUM_TOLERANCE: f64 = 0.01;

/// Asset → percentage mapping, iterated in ascending asset order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allocation(BTreeMap<String, f64>);

impl Allocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a JSON object such as `{"stocks": 60, "bonds": 40}`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidAllocation(format!("invalid allocation JSON: {e}")))
    }

    pub fn insert(&mut self, asset: impl Into<String>, percent: f64) -> Option<f64> {
        self.0.insert(asset.into(), percent)
    }

    pub fn get(&self, asset: &str) -> Option<f64> {
        self.0.get(asset).copied()
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.0.contains_key(asset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(asset, &percent)| (asset.as_str(), percent))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all percentages.
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Check that the allocation is non-empty, non-negative and sums to 100.
    ///
    /// Zero-valued entries are accepted: they track an asset class the user
    /// holds none of.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::InvalidAllocation("allocation cannot be empty".into()));
        }

        for (asset, &percent) in &self.0 {
            if !percent.is_finite() {
                return Err(Error::InvalidAllocation(format!(
                    "allocation for {asset} must be a finite number"
                )));
            }
            if percent < 0.0 {
                return Err(Error::InvalidAllocation(format!(
                    "allocation for {asset} cannot be negative"
                )));
            }
        }

        let total = self.total();
        if (total - 100.0).abs() > SUM_TOLERANCE {
            return Err(Error::InvalidAllocation(format!(
                "allocation must sum to 100%, got {total:.2}%"
            )));
        }

        Ok(())
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Allocation {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<K: Into<String>, const N: usize> From<[(K, f64); N]> for Allocation {
    fn from(pairs: [(K, f64); N]) -> Self {
        pairs.into_iter().collect()
    }
}
