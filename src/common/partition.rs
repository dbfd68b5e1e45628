//! Replica configuration of a partition

use serde::{Deserialize, Serialize};

use crate::common::address::Endpoint;
use crate::common::Result;

/// Replica configuration of one partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Orders configuration changes; a proposal must carry a higher ballot
    pub ballot: i64,
    pub primary: Option<Endpoint>,
    #[serde(default)]
    pub secondaries: Vec<Endpoint>,
}

impl PartitionConfig {
    pub fn with_ballot(ballot: i64) -> Self {
        Self {
            ballot,
            ..Default::default()
        }
    }

    /// Check that secondaries are unique and disjoint from the primary.
    ///
    /// A member listed twice is [`DuplicateMember`](crate::Error::DuplicateMember).
    pub fn validate(&self) -> Result<()> {
        if self.ballot < 0 {
            return Err(crate::Error::MalformedRequest(format!(
                "negative ballot {}",
                self.ballot
            )));
        }
        for (i, sec) in self.secondaries.iter().enumerate() {
            if Some(*sec) == self.primary {
                return Err(crate::Error::DuplicateMember(format!(
                    "{} is both primary and secondary",
                    sec
                )));
            }
            if self.secondaries[..i].contains(sec) {
                return Err(crate::Error::DuplicateMember(format!(
                    "duplicate secondary {}",
                    sec
                )));
            }
        }
        Ok(())
    }

    /// Primary first, then secondaries in order.
    pub fn members(&self) -> Vec<Endpoint> {
        self.primary
            .iter()
            .chain(self.secondaries.iter())
            .copied()
            .collect()
    }

    /// More members than an app with `max_replica_count` may host.
    pub fn max_members_exceeded(&self, max_replica_count: i32) -> bool {
        self.members().len() > max_replica_count.max(0) as usize
    }
}
