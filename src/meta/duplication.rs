//! Cross-cluster duplication links attached to an app
//!
//! The link list lives in the app node payload; every change goes through the
//! same per-app write-then-swap path as env updates.

use serde::{Deserialize, Serialize};

use crate::common::Result;

/// Duplication ids are positive `i32` values
pub type DupId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicationStatus {
    Start,
    Pause,
    Removed,
}

impl std::fmt::Display for DuplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicationStatus::Start => write!(f, "start"),
            DuplicationStatus::Pause => write!(f, "pause"),
            DuplicationStatus::Removed => write!(f, "removed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicationEntry {
    pub dupid: DupId,
    /// Remote cluster the app is duplicated to
    pub remote: String,
    pub status: DuplicationStatus,
    /// Unix millis
    pub create_ts: u64,
    #[serde(default)]
    pub freezed: bool,
}

/// Links of `entries` plus a new one to `remote`.
///
/// The new id is `max(now_secs, last id + 1)` so ids stay unique and ordered
/// even when two links are added within the same second.
pub fn with_added(
    entries: &[DuplicationEntry],
    remote: &str,
    freezed: bool,
    now_ms: u64,
) -> Result<(Vec<DuplicationEntry>, DupId)> {
    let remote = remote.trim();
    if remote.is_empty() {
        return Err(crate::Error::MalformedRequest(
            "remote cluster cannot be empty".into(),
        ));
    }
    if let Some(existing) = entries.iter().find(|e| e.remote == remote) {
        return Err(crate::Error::DuplicateName(format!(
            "duplication to {} already exists (dupid {})",
            remote, existing.dupid
        )));
    }

    let now_secs = i32::try_from(now_ms / 1000).unwrap_or(i32::MAX);
    let next_after_last = entries
        .iter()
        .map(|e| e.dupid)
        .max()
        .map(|id| id.saturating_add(1))
        .unwrap_or(1);
    let dupid = now_secs.max(next_after_last);

    let mut updated = entries.to_vec();
    updated.push(DuplicationEntry {
        dupid,
        remote: remote.to_string(),
        status: if freezed {
            DuplicationStatus::Pause
        } else {
            DuplicationStatus::Start
        },
        create_ts: now_ms,
        freezed,
    });
    Ok((updated, dupid))
}

/// Links of `entries` with `dupid` moved to `status`; `Removed` drops it.
pub fn with_status(
    entries: &[DuplicationEntry],
    dupid: DupId,
    status: DuplicationStatus,
) -> Result<Vec<DuplicationEntry>> {
    let pos = entries
        .iter()
        .position(|e| e.dupid == dupid)
        .ok_or_else(|| crate::Error::NotFound(format!("duplication {}", dupid)))?;

    let mut updated = entries.to_vec();
    match status {
        DuplicationStatus::Removed => {
            updated.remove(pos);
        }
        DuplicationStatus::Start | DuplicationStatus::Pause => {
            updated[pos].status = status;
        }
    }
    Ok(updated)
}
