//! Client-side partition routing
//!
//! Keeps one replica group per `(app_id, partition)` built from app
//! snapshots. Requests go to the group leader; when it answers "not primary"
//! the caller fails over to the next member in rotation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::common::address::Address;
use crate::common::group::{GroupId, GroupTable};
use crate::common::partition::PartitionConfig;
use crate::common::Result;

pub struct PartitionRouter {
    table: Arc<GroupTable>,
    groups: RwLock<HashMap<(i32, i32), GroupId>>,
}

impl PartitionRouter {
    pub fn new(table: Arc<GroupTable>) -> Self {
        Self {
            table,
            groups: RwLock::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &Arc<GroupTable> {
        &self.table
    }

    /// Refresh the groups of an app from its partition configs, indexed by
    /// partition. The primary becomes the leader; a partition without one
    /// has no leader.
    pub fn sync_app(
        &self,
        app_id: i32,
        app_name: &str,
        partitions: &[PartitionConfig],
    ) -> Result<()> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        for (idx, config) in partitions.iter().enumerate() {
            let key = (app_id, idx as i32);
            let id = *groups
                .entry(key)
                .or_insert_with(|| self.table.build_group(&format!("{}.{}", app_name, idx)));
            self.table.reset(id, &config.members(), config.primary)?;
        }
        Ok(())
    }

    fn group(&self, app_id: i32, partition_index: i32) -> Result<GroupId> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(app_id, partition_index))
            .copied()
            .ok_or_else(|| {
                crate::Error::NotFound(format!("route for {}.{}", app_id, partition_index))
            })
    }

    /// Address of the partition's group, for callers that send to the group.
    pub fn group_address(&self, app_id: i32, partition_index: i32) -> Result<Address> {
        Ok(Address::NamedGroup(self.group(app_id, partition_index)?))
    }

    /// Current primary, or [`Address::Invalid`] if none is known.
    pub fn primary(&self, app_id: i32, partition_index: i32) -> Result<Address> {
        self.table.leader(self.group(app_id, partition_index)?)
    }

    /// Move to the member after the current primary and make it the leader.
    ///
    /// Returns [`Address::Invalid`] if the group has no members.
    pub fn failover(&self, app_id: i32, partition_index: i32) -> Result<Address> {
        let id = self.group(app_id, partition_index)?;
        let current = self.table.leader(id)?;
        let next = self.table.next(id, &current)?;
        if let Some(ep) = next.endpoint() {
            self.table.set_leader(id, ep)?;
            tracing::debug!(
                "Partition {}.{} failed over from {} to {}",
                app_id,
                partition_index,
                self.table.describe(&current),
                ep
            );
        }
        Ok(next)
    }

    /// Release every group of `app_id`. Returns how many were destroyed.
    pub fn forget_app(&self, app_id: i32) -> usize {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<(i32, i32)> = groups
            .keys()
            .filter(|(id, _)| *id == app_id)
            .copied()
            .collect();
        let mut destroyed = 0;
        for key in keys {
            if let Some(id) = groups.remove(&key) {
                if self.table.destroy_group(id).is_ok() {
                    destroyed += 1;
                }
            }
        }
        destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::address::Endpoint;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    fn partitions() -> Vec<PartitionConfig> {
        vec![
            PartitionConfig {
                ballot: 3,
                primary: Some(ep("10.0.0.1:34801")),
                secondaries: vec![ep("10.0.0.2:34801"), ep("10.0.0.3:34801")],
            },
            PartitionConfig::default(),
        ]
    }

    #[test]
    fn test_primary_follows_config() {
        let router = PartitionRouter::new(Arc::new(GroupTable::new()));
        router.sync_app(5, "temp", &partitions()).unwrap();

        assert_eq!(router.primary(5, 0).unwrap(), Address::from(ep("10.0.0.1:34801")));
        assert!(!router.primary(5, 1).unwrap().is_valid());
        assert!(router.primary(6, 0).is_err());
        assert_eq!(router.table().group_count(), 2);
    }

    #[test]
    fn test_failover_rotates_through_members() {
        let router = PartitionRouter::new(Arc::new(GroupTable::new()));
        router.sync_app(5, "temp", &partitions()).unwrap();

        assert_eq!(router.failover(5, 0).unwrap(), Address::from(ep("10.0.0.2:34801")));
        assert_eq!(router.failover(5, 0).unwrap(), Address::from(ep("10.0.0.3:34801")));
        assert_eq!(router.failover(5, 0).unwrap(), Address::from(ep("10.0.0.1:34801")));
        assert_eq!(router.primary(5, 0).unwrap(), Address::from(ep("10.0.0.1:34801")));

        // Empty partition: nothing to fail over to.
        assert!(!router.failover(5, 1).unwrap().is_valid());
    }

    #[test]
    fn test_resync_keeps_handles() {
        let router = PartitionRouter::new(Arc::new(GroupTable::new()));
        router.sync_app(5, "temp", &partitions()).unwrap();
        let before = router.group_address(5, 0).unwrap();

        let mut moved = partitions();
        moved[0].primary = Some(ep("10.0.0.2:34801"));
        moved[0].secondaries = vec![ep("10.0.0.1:34801")];
        router.sync_app(5, "temp", &moved).unwrap();

        assert_eq!(router.group_address(5, 0).unwrap(), before);
        assert_eq!(router.primary(5, 0).unwrap(), Address::from(ep("10.0.0.2:34801")));
        assert_eq!(router.table().group_count(), 2);
    }

    #[test]
    fn test_forget_app_releases_groups_once() {
        let table = Arc::new(GroupTable::new());
        let router = PartitionRouter::new(table.clone());
        router.sync_app(5, "temp", &partitions()).unwrap();
        let stale = router.group_address(5, 0).unwrap().group().unwrap();

        assert_eq!(router.forget_app(5), 2);
        assert_eq!(router.forget_app(5), 0);
        assert_eq!(table.group_count(), 0);
        assert!(matches!(
            table.leader(stale),
            Err(crate::Error::StaleHandle(_))
        ));
    }
}
