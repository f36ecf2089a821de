//! Process roles within the pool

use serde::{Deserialize, Serialize};

/// Rank of the process that gathers results and writes output
pub const COORDINATOR_RANK: usize = 0;

/// Role of a process, fixed for its lifetime by its rank in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Coordinator,
    Worker,
}

impl ProcessRole {
    /// Derive the role from a rank: rank 0 coordinates, everything else filters
    pub fn from_rank(rank: usize) -> Self {
        if rank == COORDINATOR_RANK {
            Self::Coordinator
        } else {
            Self::Worker
        }
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self, Self::Coordinator)
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

impl std::str::FromStr for ProcessRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coordinator" => Ok(Self::Coordinator),
            "worker" => Ok(Self::Worker),
            _ => Err(format!("Unknown process role: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_rank() {
        assert_eq!(ProcessRole::from_rank(0), ProcessRole::Coordinator);
        assert_eq!(ProcessRole::from_rank(1), ProcessRole::Worker);
        assert_eq!(ProcessRole::from_rank(17), ProcessRole::Worker);
    }

    #[test]
    fn test_role_display_and_parse() {
        assert_eq!(ProcessRole::Coordinator.to_string(), "coordinator");
        assert_eq!("WORKER".parse::<ProcessRole>().unwrap(), ProcessRole::Worker);
        assert!("observer".parse::<ProcessRole>().is_err());
    }
}
