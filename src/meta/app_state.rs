//! In-memory app (table) state
//!
//! An [`AppState`] is an immutable snapshot: readers hold an `Arc` to it and
//! writers build a modified copy, persist it, then swap it in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::Result;
use crate::meta::duplication::DuplicationEntry;

pub use crate::common::partition::PartitionConfig;

/// App lifecycle status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Creating,
    Available,
    Dropping,
    Dropped,
}

impl AppStatus {
    /// Can an app in this status move to `next`?
    pub fn can_transition_to(&self, next: AppStatus) -> bool {
        matches!(
            (self, next),
            (AppStatus::Creating, AppStatus::Available)
                | (AppStatus::Creating, AppStatus::Dropping)
                | (AppStatus::Available, AppStatus::Dropping)
                | (AppStatus::Dropping, AppStatus::Dropped)
        )
    }

    /// Does this status accept env, duplication and partition updates?
    pub fn is_serving(&self) -> bool {
        matches!(self, AppStatus::Creating | AppStatus::Available)
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppStatus::Creating => write!(f, "creating"),
            AppStatus::Available => write!(f, "available"),
            AppStatus::Dropping => write!(f, "dropping"),
            AppStatus::Dropped => write!(f, "dropped"),
        }
    }
}

/// Metadata of one app
///
/// The partition array is persisted in its own nodes, so it is skipped when
/// the app node payload is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub app_id: i32,
    pub app_name: String,
    pub app_type: String,
    pub status: AppStatus,
    pub partition_count: i32,
    pub max_replica_count: i32,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub duplications: Vec<DuplicationEntry>,
    /// Unix millis
    pub create_time: u64,
    #[serde(default)]
    pub drop_time: Option<u64>,
    /// Unix millis after which a dropped app may be reclaimed
    #[serde(default)]
    pub expire_time: Option<u64>,
    #[serde(skip)]
    pub partitions: Vec<PartitionConfig>,
}

impl AppState {
    /// Fresh app in `Creating` status with empty partition configs.
    pub fn new(
        app_id: i32,
        app_name: impl Into<String>,
        app_type: impl Into<String>,
        partition_count: i32,
        max_replica_count: i32,
        create_time: u64,
    ) -> Self {
        Self {
            app_id,
            app_name: app_name.into(),
            app_type: app_type.into(),
            status: AppStatus::Creating,
            partition_count,
            max_replica_count,
            envs: BTreeMap::new(),
            duplications: Vec::new(),
            create_time,
            drop_time: None,
            expire_time: None,
            partitions: vec![PartitionConfig::default(); partition_count.max(0) as usize],
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.status == AppStatus::Dropped
    }

    /// Every partition has a primary.
    pub fn all_partitions_have_primary(&self) -> bool {
        self.partitions.len() == self.partition_count as usize
            && self.partitions.iter().all(|pc| pc.primary.is_some())
    }

    pub fn partition(&self, index: i32) -> Option<&PartitionConfig> {
        usize::try_from(index)
            .ok()
            .and_then(|idx| self.partitions.get(idx))
    }

    /// Copy of this app moved to `next`, rejecting backward transitions.
    pub fn transitioned(&self, next: AppStatus) -> Result<AppState> {
        if !self.status.can_transition_to(next) {
            return Err(crate::Error::InvalidState(format!(
                "app {} cannot move from {} to {}",
                self.app_name, self.status, next
            )));
        }
        let mut app = self.clone();
        app.status = next;
        Ok(app)
    }
}
