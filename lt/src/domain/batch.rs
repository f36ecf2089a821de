//! Result batches exchanged between workers and the coordinator

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors building trigger sets
#[derive(Debug, Error, PartialEq)]
pub enum BatchError {
    #[error("Array '{name}' has {actual} entries, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Array names differ: {left:?} vs {right:?}")]
    NameMismatch { left: Vec<String>, right: Vec<String> },
}

/// Named numeric arrays of equal length, one entry per trigger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Vec<f64>>", into = "BTreeMap<String, Vec<f64>>")]
pub struct TriggerSet {
    arrays: BTreeMap<String, Vec<f64>>,
}

impl TriggerSet {
    /// Build a trigger set, rejecting arrays of unequal length
    pub fn new(arrays: BTreeMap<String, Vec<f64>>) -> Result<Self, BatchError> {
        let mut expected: Option<usize> = None;
        for (name, values) in &arrays {
            match expected {
                None => expected = Some(values.len()),
                Some(len) if len != values.len() => {
                    return Err(BatchError::LengthMismatch {
                        name: name.clone(),
                        expected: len,
                        actual: values.len(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(Self { arrays })
    }

    /// Number of triggers
    pub fn len(&self) -> usize {
        self.arrays.values().next().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.arrays.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn arrays(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.arrays
    }

    /// Append another set with the same array names
    ///
    /// Fails without modifying `self` if the names differ.
    pub fn extend_from(&mut self, other: &TriggerSet) -> Result<(), BatchError> {
        if self.arrays.is_empty() {
            self.arrays = other.arrays.clone();
            return Ok(());
        }
        if !self.arrays.keys().eq(other.arrays.keys()) {
            return Err(BatchError::NameMismatch {
                left: self.arrays.keys().cloned().collect(),
                right: other.arrays.keys().cloned().collect(),
            });
        }
        for (name, values) in self.arrays.iter_mut() {
            values.extend_from_slice(&other.arrays[name]);
        }
        Ok(())
    }
}

impl TryFrom<BTreeMap<String, Vec<f64>>> for TriggerSet {
    type Error = BatchError;

    fn try_from(arrays: BTreeMap<String, Vec<f64>>) -> Result<Self, Self::Error> {
        Self::new(arrays)
    }
}

impl From<TriggerSet> for BTreeMap<String, Vec<f64>> {
    fn from(set: TriggerSet) -> Self {
        set.arrays
    }
}

/// One process's outcome for one detector in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arrays", rename_all = "lowercase")]
pub enum DetectorResult {
    Invalid,
    Batch(TriggerSet),
}

impl DetectorResult {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }
}

/// Everything one process reports for one cycle, keyed by detector name
pub type ResultBatch = BTreeMap<String, DetectorResult>;

/// Merged per-detector triggers for one cycle
pub type CombinedResult = BTreeMap<String, TriggerSet>;
