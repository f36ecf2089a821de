//! Per-cycle archival container

use std::collections::BTreeMap;

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::collab::{CoincidenceResult, NoiseSpectrum};
use crate::domain::TriggerSet;

/// One detector's group within an artifact
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorGroup {
    /// Trigger arrays, stored verbatim
    pub triggers: TriggerSet,

    /// Indices retained by the loudest-K policy
    pub loudest: Option<Vec<usize>>,

    /// Noise-spectrum snapshot
    pub psd: Option<NoiseSpectrum>,
}

impl Serialize for DetectorGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(self.loudest.is_some()) + usize::from(self.psd.is_some());
        let mut map = serializer.serialize_map(Some(self.triggers.arrays().len() + extra))?;
        for (name, values) in self.triggers.arrays() {
            map.serialize_entry(name, values)?;
        }
        if let Some(loudest) = &self.loudest {
            map.serialize_entry("loudest", loudest)?;
        }
        if let Some(psd) = &self.psd {
            map.serialize_entry("psd", psd)?;
        }
        map.end()
    }
}

/// Everything persisted for one cycle
///
/// Serializes to a single map: one group per detector plus the coincidence
/// mapping's keys at the top level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifact {
    pub groups: BTreeMap<String, DetectorGroup>,
    pub coincidence: CoincidenceResult,
}

impl Serialize for Artifact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len() + self.coincidence.len()))?;
        for (ifo, group) in &self.groups {
            map.serialize_entry(ifo, group)?;
        }
        for (key, values) in &self.coincidence {
            map.serialize_entry(key, values)?;
        }
        map.end()
    }
}
