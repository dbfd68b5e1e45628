//! Replica groups and the handle table that owns them
//!
//! A [`ReplicaGroup`] is the ordered member list of one partition with an
//! optional leader. Clients send to a group address; the leader receives the
//! call, and on a "not primary" reply the caller rotates with
//! [`ReplicaGroup::next`].
//!
//! Groups and URI aliases are owned by a [`GroupTable`] and referenced by
//! generation-checked handles, so using a handle after `destroy` yields
//! [`Error::StaleHandle`](crate::Error::StaleHandle) instead of touching
//! freed state.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::common::address::{Address, Endpoint};
use crate::common::Result;

/// Handle to a [`ReplicaGroup`] inside a [`GroupTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId {
    index: u32,
    generation: u32,
}

/// Handle to a URI alias inside a [`GroupTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UriId {
    index: u32,
    generation: u32,
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for UriId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Ordered, duplicate-free members of one partition with an optional leader.
#[derive(Debug, Clone)]
pub struct ReplicaGroup {
    name: String,
    members: Vec<Endpoint>,
    leader: Option<usize>,
}

impl ReplicaGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            leader: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Endpoint] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, ep: Endpoint) -> bool {
        self.members.contains(&ep)
    }

    /// Append `ep`. Returns false if it is already a member.
    pub fn add(&mut self, ep: Endpoint) -> bool {
        if self.contains(ep) {
            return false;
        }
        self.members.push(ep);
        true
    }

    /// Remove `ep`. Returns false if it was not a member.
    ///
    /// Removing the leader leaves the group without one; no member is
    /// promoted in its place.
    pub fn remove(&mut self, ep: Endpoint) -> bool {
        let Some(pos) = self.members.iter().position(|m| *m == ep) else {
            return false;
        };
        self.members.remove(pos);
        self.leader = match self.leader {
            Some(l) if l == pos => None,
            Some(l) if l > pos => Some(l - 1),
            other => other,
        };
        true
    }

    /// Designate `ep` as leader, joining it to the group first if needed.
    pub fn set_leader(&mut self, ep: Endpoint) {
        let pos = match self.members.iter().position(|m| *m == ep) {
            Some(pos) => pos,
            None => {
                self.members.push(ep);
                self.members.len() - 1
            }
        };
        self.leader = Some(pos);
    }

    pub fn leader(&self) -> Option<Endpoint> {
        self.leader.map(|idx| self.members[idx])
    }

    pub fn is_leader(&self, ep: Endpoint) -> bool {
        self.leader() == Some(ep)
    }

    /// Round-robin successor of `current` in membership order.
    ///
    /// Wraps at the end; an absent or unknown `current` yields the first
    /// member; an empty group yields `None`.
    pub fn next(&self, current: Option<Endpoint>) -> Option<Endpoint> {
        let first = *self.members.first()?;
        let pos = current.and_then(|ep| self.members.iter().position(|m| *m == ep));
        match pos {
            Some(pos) => Some(self.members[(pos + 1) % self.members.len()]),
            None => Some(first),
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of values addressed by (index, generation) pairs.
struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> HandleTable<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, value: T) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return (index, slot.generation);
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ((self.slots.len() - 1) as u32, 0)
    }

    fn get(&self, index: u32, generation: u32) -> Option<&T> {
        self.slots
            .get(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_ref())
    }

    fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(value)
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Owner of all live replica groups and URI aliases.
///
/// Each group sits behind its own lock: mutators on a group are exclusive,
/// readers share, and work on one group never waits on another.
pub struct GroupTable {
    groups: RwLock<HandleTable<Arc<RwLock<ReplicaGroup>>>>,
    uris: RwLock<HandleTable<Arc<str>>>,
}

impl Default for GroupTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupTable {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HandleTable::new()),
            uris: RwLock::new(HandleTable::new()),
        }
    }

    /// Allocate an empty group. Pair with exactly one [`destroy_group`](Self::destroy_group).
    pub fn build_group(&self, name: &str) -> GroupId {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let (index, generation) = groups.insert(Arc::new(RwLock::new(ReplicaGroup::new(name))));
        tracing::debug!("Built group {} ({}v{})", name, index, generation);
        GroupId { index, generation }
    }

    pub fn destroy_group(&self, id: GroupId) -> Result<()> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups
            .remove(id.index, id.generation)
            .map(|_| ())
            .ok_or_else(|| crate::Error::StaleHandle(format!("group {}", id)))
    }

    pub fn group_count(&self) -> usize {
        self.groups.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn group(&self, id: GroupId) -> Result<Arc<RwLock<ReplicaGroup>>> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups
            .get(id.index, id.generation)
            .cloned()
            .ok_or_else(|| crate::Error::StaleHandle(format!("group {}", id)))
    }

    fn read<R>(&self, id: GroupId, f: impl FnOnce(&ReplicaGroup) -> R) -> Result<R> {
        let group = self.group(id)?;
        let guard = group.read().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&guard))
    }

    fn write<R>(&self, id: GroupId, f: impl FnOnce(&mut ReplicaGroup) -> R) -> Result<R> {
        let group = self.group(id)?;
        let mut guard = group.write().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut guard))
    }

    pub fn add(&self, id: GroupId, ep: Endpoint) -> Result<bool> {
        self.write(id, |g| g.add(ep))
    }

    pub fn remove(&self, id: GroupId, ep: Endpoint) -> Result<bool> {
        self.write(id, |g| g.remove(ep))
    }

    pub fn set_leader(&self, id: GroupId, ep: Endpoint) -> Result<()> {
        self.write(id, |g| g.set_leader(ep))
    }

    /// Replace membership and leader in one step.
    pub fn reset(&self, id: GroupId, members: &[Endpoint], leader: Option<Endpoint>) -> Result<()> {
        self.write(id, |g| {
            g.members.clear();
            g.leader = None;
            for ep in members {
                g.add(*ep);
            }
            if let Some(leader) = leader {
                g.set_leader(leader);
            }
        })
    }

    /// Current leader, or [`Address::Invalid`] when undetermined.
    pub fn leader(&self, id: GroupId) -> Result<Address> {
        self.read(id, |g| Address::from(g.leader()))
    }

    pub fn is_leader(&self, id: GroupId, addr: &Address) -> Result<bool> {
        self.read(id, |g| addr.endpoint().map(|ep| g.is_leader(ep)).unwrap_or(false))
    }

    /// Successor of `addr` in rotation, or [`Address::Invalid`] for an empty group.
    pub fn next(&self, id: GroupId, addr: &Address) -> Result<Address> {
        self.read(id, |g| Address::from(g.next(addr.endpoint())))
    }

    pub fn members(&self, id: GroupId) -> Result<Vec<Endpoint>> {
        self.read(id, |g| g.members().to_vec())
    }

    pub fn name(&self, id: GroupId) -> Result<String> {
        self.read(id, |g| g.name().to_string())
    }

    /// Register a URI alias. Pair with exactly one [`destroy_uri`](Self::destroy_uri).
    pub fn build_uri(&self, url: &str) -> UriId {
        let mut uris = self.uris.write().unwrap_or_else(PoisonError::into_inner);
        let (index, generation) = uris.insert(Arc::from(url));
        UriId { index, generation }
    }

    pub fn destroy_uri(&self, id: UriId) -> Result<()> {
        let mut uris = self.uris.write().unwrap_or_else(PoisonError::into_inner);
        uris.remove(id.index, id.generation)
            .map(|_| ())
            .ok_or_else(|| crate::Error::StaleHandle(format!("uri {}", id)))
    }

    pub fn uri(&self, id: UriId) -> Result<String> {
        let uris = self.uris.read().unwrap_or_else(PoisonError::into_inner);
        uris.get(id.index, id.generation)
            .map(|u| u.to_string())
            .ok_or_else(|| crate::Error::StaleHandle(format!("uri {}", id)))
    }

    /// Human-readable form of an address: group name or URI text instead of
    /// the bare handle.
    pub fn describe(&self, addr: &Address) -> String {
        match addr {
            Address::NamedGroup(id) => self
                .name(*id)
                .unwrap_or_else(|_| "invalid address".to_string()),
            Address::UriAlias(id) => self
                .uri(*id)
                .unwrap_or_else(|_| "invalid address".to_string()),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(last: u8) -> Endpoint {
        Endpoint::from_ipv4(std::net::Ipv4Addr::new(10, 0, 0, last), 34801)
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut g = ReplicaGroup::new("1.0");
        assert!(g.add(ep(1)));
        assert!(!g.add(ep(1)));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_next_rotation() {
        let mut g = ReplicaGroup::new("1.0");
        assert_eq!(g.next(None), None);

        for i in 1..=3 {
            g.add(ep(i));
        }
        assert_eq!(g.next(Some(ep(1))), Some(ep(2)));
        assert_eq!(g.next(Some(ep(2))), Some(ep(3)));
        assert_eq!(g.next(Some(ep(3))), Some(ep(1)));
        assert_eq!(g.next(None), Some(ep(1)));
        assert_eq!(g.next(Some(ep(9))), Some(ep(1)));
    }

    #[test]
    fn test_set_leader_joins_non_member() {
        let mut g = ReplicaGroup::new("1.0");
        g.add(ep(1));
        g.set_leader(ep(2));
        assert_eq!(g.members(), &[ep(1), ep(2)]);
        assert!(g.is_leader(ep(2)));
        assert!(!g.is_leader(ep(1)));
    }

    #[test]
    fn test_remove_leader_clears_leadership() {
        let mut g = ReplicaGroup::new("1.0");
        g.add(ep(1));
        g.add(ep(2));
        g.set_leader(ep(1));

        assert!(g.remove(ep(1)));
        assert_eq!(g.leader(), None);
        assert!(!g.is_leader(ep(1)));
        assert!(!g.is_leader(ep(2)));
        assert!(!g.remove(ep(1)));
    }

    #[test]
    fn test_remove_before_leader_keeps_leader() {
        let mut g = ReplicaGroup::new("1.0");
        for i in 1..=3 {
            g.add(ep(i));
        }
        g.set_leader(ep(3));
        assert!(g.remove(ep(1)));
        assert_eq!(g.leader(), Some(ep(3)));
    }

    #[test]
    fn test_random_ops_keep_invariants() {
        let mut g = ReplicaGroup::new("fuzz");
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let target = ep((seed % 6) as u8);
            match (seed >> 8) % 3 {
                0 => {
                    g.add(target);
                }
                1 => {
                    g.remove(target);
                }
                _ => g.set_leader(target),
            }

            let mut sorted = g.members().to_vec();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), g.len());
            if let Some(leader) = g.leader() {
                assert!(g.contains(leader));
            }
        }
    }

    #[test]
    fn test_table_handles() {
        let table = GroupTable::new();
        let id = table.build_group("app.0");
        assert!(table.add(id, ep(1)).unwrap());
        assert!(!table.add(id, ep(1)).unwrap());
        table.set_leader(id, ep(1)).unwrap();
        assert_eq!(table.leader(id).unwrap(), Address::from(ep(1)));
        assert!(table.is_leader(id, &Address::from(ep(1))).unwrap());
        assert!(!table.is_leader(id, &Address::Invalid).unwrap());
        assert_eq!(table.describe(&Address::NamedGroup(id)), "app.0");

        table.destroy_group(id).unwrap();
        assert!(matches!(
            table.add(id, ep(2)),
            Err(crate::Error::StaleHandle(_))
        ));
        assert!(table.destroy_group(id).is_err());

        // Slot reuse bumps the generation, the old handle stays dead.
        let reused = table.build_group("app.1");
        assert_ne!(reused, id);
        assert!(table.leader(id).is_err());
        assert!(!table.leader(reused).unwrap().is_valid());
        assert_eq!(table.group_count(), 1);
    }

    #[test]
    fn test_table_next_and_reset() {
        let table = GroupTable::new();
        let id = table.build_group("g");
        assert!(!table.next(id, &Address::Invalid).unwrap().is_valid());

        table.reset(id, &[ep(1), ep(2), ep(3)], Some(ep(2))).unwrap();
        assert_eq!(table.next(id, &Address::Invalid).unwrap(), Address::from(ep(1)));
        assert_eq!(table.next(id, &Address::from(ep(3))).unwrap(), Address::from(ep(1)));
        assert_eq!(table.leader(id).unwrap(), Address::from(ep(2)));
    }

    #[test]
    fn test_uri_handles() {
        let table = GroupTable::new();
        let id = table.build_uri("dsn://meta/app");
        assert_eq!(table.uri(id).unwrap(), "dsn://meta/app");
        assert_eq!(table.describe(&Address::UriAlias(id)), "dsn://meta/app");
        table.destroy_uri(id).unwrap();
        assert!(table.uri(id).is_err());
        assert_eq!(table.describe(&Address::UriAlias(id)), "invalid address");
    }
}
