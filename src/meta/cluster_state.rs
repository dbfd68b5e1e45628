//! Authoritative cluster state of the meta server
//!
//! Owns every [`AppState`] and keeps it in sync with the coordination store:
//!
//! ```text
//! <cluster_root>/apps/<app_id>                      app node (AppState payload)
//! <cluster_root>/apps/<app_id>/partitions/<index>   PartitionConfig payload
//! ```
//!
//! Every mutation follows the same order: validate, compute the new state
//! from a snapshot, write it to the store, and only then swap it into the
//! live map. A failed or timed-out write leaves memory untouched. A store
//! call that outlives its deadline keeps the caller's locks until it settles,
//! and a write that lands late is rolled back, so the next operation on the
//! same app never races it.
//!
//! Locking:
//! - `ddl_lock` serializes create/drop/reclaim, the operations that change
//!   the set of apps.
//! - `registry` is the dual index (by id, by name), held only for brief
//!   lookups and inserts, never across a store call.
//! - each app has an `op_lock`, a FIFO async mutex, so updates to one app
//!   are applied in arrival order while other apps proceed independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::common::utils::{format_millis, timestamp_now_millis};
use crate::common::{MetaConfig, Result};
use crate::meta::app_state::{AppState, AppStatus, PartitionConfig};
use crate::meta::duplication::{self, DupId, DuplicationEntry, DuplicationStatus};
use crate::meta::env::AppEnvRequest;
use crate::meta::store::{self, CoordinationStore};
use crate::meta::tasks::PendingTasks;

/// Parameters of a create-app request
#[derive(Debug, Clone)]
pub struct CreateAppOptions {
    pub app_name: String,
    pub app_type: String,
    pub partition_count: i32,
    /// Zero means the configured default
    pub replica_count: i32,
    pub envs: BTreeMap<String, String>,
}

impl CreateAppOptions {
    pub fn new(app_name: &str, app_type: &str, partition_count: i32) -> Self {
        Self {
            app_name: app_name.to_string(),
            app_type: app_type.to_string(),
            partition_count,
            replica_count: 0,
            envs: BTreeMap::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.app_name.is_empty() {
            return Err(crate::Error::MalformedRequest("app name is empty".into()));
        }
        if !self
            .app_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(crate::Error::MalformedRequest(format!(
                "invalid app name {:?}",
                self.app_name
            )));
        }
        if self.app_type.is_empty() {
            return Err(crate::Error::MalformedRequest("app type is empty".into()));
        }
        if self.partition_count <= 0 {
            return Err(crate::Error::MalformedRequest(format!(
                "partition count must be positive, got {}",
                self.partition_count
            )));
        }
        if self.replica_count < 0 {
            return Err(crate::Error::MalformedRequest(format!(
                "replica count cannot be negative, got {}",
                self.replica_count
            )));
        }
        Ok(())
    }
}

/// Live slot of one app: current snapshot plus its serialization point.
struct AppSlot {
    state: RwLock<Arc<AppState>>,
    op_lock: Mutex<()>,
}

impl AppSlot {
    fn new(app: AppState) -> Self {
        Self {
            state: RwLock::new(Arc::new(app)),
            op_lock: Mutex::new(()),
        }
    }

    fn snapshot(&self) -> Arc<AppState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, app: AppState) -> Arc<AppState> {
        let app = Arc::new(app);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = app.clone();
        app
    }
}

/// One owned set of apps with two lookup maps over it.
///
/// `by_name` only covers apps that are not dropped, so a dropped name is free
/// for reuse while its id stays reserved until reclaimed.
#[derive(Default)]
struct AppRegistry {
    apps: BTreeMap<i32, Arc<AppSlot>>,
    by_name: HashMap<String, i32>,
    next_app_id: i32,
}

impl AppRegistry {
    fn slot_by_name(&self, name: &str) -> Option<Arc<AppSlot>> {
        self.by_name
            .get(name)
            .and_then(|id| self.apps.get(id))
            .cloned()
    }

    fn insert(&mut self, app: AppState) {
        let id = app.app_id;
        if !app.is_dropped() {
            self.by_name.insert(app.app_name.clone(), id);
        }
        self.next_app_id = self.next_app_id.max(id + 1);
        self.apps.insert(id, Arc::new(AppSlot::new(app)));
    }
}

pub struct ClusterState {
    store: Arc<dyn CoordinationStore>,
    apps_root: String,
    timeout: Duration,
    default_replica_count: i32,
    registry: RwLock<AppRegistry>,
    ddl_lock: Mutex<()>,
    pending: PendingTasks,
}

impl ClusterState {
    /// Open the cluster state stored under `config.cluster_root`, creating
    /// the root nodes on first start.
    pub async fn load(store: Arc<dyn CoordinationStore>, config: &MetaConfig) -> Result<Self> {
        config.validate()?;
        let apps_root = config.apps_root();
        let state = Self {
            store,
            apps_root: apps_root.clone(),
            timeout: config.persistence_timeout(),
            default_replica_count: config.default_replica_count,
            registry: RwLock::new(AppRegistry {
                next_app_id: 1,
                ..Default::default()
            }),
            ddl_lock: Mutex::new(()),
            pending: PendingTasks::new(),
        };

        let root = apps_root.clone();
        let apps = state
            .persist(
                format!("load {}", apps_root),
                move |s| {
                    store::create_recursive(s, &root)?;
                    load_apps(s, &root)
                },
                None,
            )
            .await?;

        {
            let mut registry = state.write_registry();
            for app in apps {
                if !app.is_dropped() && registry.by_name.contains_key(&app.app_name) {
                    return Err(crate::Error::Codec(format!(
                        "two live apps named {}",
                        app.app_name
                    )));
                }
                registry.insert(app);
            }
            tracing::info!(
                "Loaded {} apps from {} (next app id {})",
                registry.apps.len(),
                apps_root,
                registry.next_app_id
            );
        }

        Ok(state)
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, AppRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, AppRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn app_path(&self, app_id: i32) -> String {
        format!("{}/{}", self.apps_root, app_id)
    }

    fn partition_path(&self, app_id: i32, index: i32) -> String {
        format!("{}/{}/partitions/{}", self.apps_root, app_id, index)
    }

    /// Run a store call on the blocking pool under the persistence deadline.
    ///
    /// A call that misses the deadline cannot be cancelled, so this still
    /// waits for it to settle and the caller keeps its locks meanwhile. If it
    /// lands anyway, `undo` restores the previous durable state and the
    /// caller gets [`Error::Timeout`](crate::Error::Timeout). When there is
    /// no `undo`, or the undo itself fails, the late result is kept and
    /// returned as a success so memory can follow the store.
    async fn persist<T, F>(&self, what: String, op: F, undo: Option<Undo>) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CoordinationStore) -> Result<T> + Send + 'static,
    {
        let mut handle = self.run_blocking(op);
        let late = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => {
                return joined?.map_err(|e| {
                    tracing::warn!("Persistence failed ({}): {}", what, e);
                    storage_failure(e)
                })
            }
            Err(_) => {
                tracing::warn!(
                    "Persistence timed out after {:?} ({}), waiting for it to settle",
                    self.timeout,
                    what
                );
                handle.await?
            }
        };

        let value = match late {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Late persistence failed ({}): {}", what, e);
                return Err(crate::Error::Timeout(what));
            }
        };
        let Some(undo) = undo else {
            tracing::info!("Kept late result ({})", what);
            return Ok(value);
        };
        match self.run_blocking(undo).await? {
            Ok(()) => {
                tracing::warn!("Rolled back late write ({})", what);
                Err(crate::Error::Timeout(what))
            }
            Err(e) => {
                tracing::error!("Failed to roll back late write ({}): {}; keeping it", what, e);
                Ok(value)
            }
        }
    }

    /// Spawn a store call on the blocking pool, tracked until it returns.
    fn run_blocking<T, F>(&self, op: F) -> tokio::task::JoinHandle<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CoordinationStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let guard = self.pending.begin();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            op(store.as_ref())
        })
    }

    /// Persist `app` to its node and swap it in. Caller holds the op lock.
    async fn commit_app(&self, slot: &AppSlot, app: AppState) -> Result<Arc<AppState>> {
        let payload = store::encode(&app)?;
        let previous = store::encode(slot.snapshot().as_ref())?;
        let path = self.app_path(app.app_id);
        self.persist(
            format!("set {}", path),
            {
                let path = path.clone();
                move |s| s.set(&path, &payload)
            },
            undo(move |s| s.set(&path, &previous)),
        )
        .await?;
        Ok(slot.swap(app))
    }

    /// Serialize on `slot`, derive a new state from its snapshot, commit it.
    async fn mutate_app<F>(&self, slot: &AppSlot, f: F) -> Result<Arc<AppState>>
    where
        F: FnOnce(&AppState) -> Result<AppState>,
    {
        let _serial = slot.op_lock.lock().await;
        let current = slot.snapshot();
        let next = f(&current)?;
        self.commit_app(slot, next).await
    }

    fn live_slot(&self, app_name: &str) -> Result<Arc<AppSlot>> {
        self.read_registry()
            .slot_by_name(app_name)
            .ok_or_else(|| crate::Error::NotFound(format!("app {}", app_name)))
    }

    fn ensure_serving(app: &AppState) -> Result<()> {
        if !app.status.is_serving() {
            return Err(crate::Error::InvalidState(format!(
                "app {} is {}",
                app.app_name, app.status
            )));
        }
        Ok(())
    }

    // === App lifecycle ===

    /// Create an app and persist its node tree; returns the new app id.
    ///
    /// The app becomes visible only after the whole tree is durable.
    pub async fn create_app(&self, opts: CreateAppOptions) -> Result<i32> {
        opts.validate()?;
        let _ddl = self.ddl_lock.lock().await;

        let app_id = {
            let registry = self.read_registry();
            if registry.by_name.contains_key(&opts.app_name) {
                return Err(crate::Error::DuplicateName(format!("app {}", opts.app_name)));
            }
            registry.next_app_id
        };

        let replica_count = if opts.replica_count == 0 {
            self.default_replica_count
        } else {
            opts.replica_count
        };
        let mut app = AppState::new(
            app_id,
            &opts.app_name,
            &opts.app_type,
            opts.partition_count,
            replica_count,
            timestamp_now_millis(),
        );
        app.envs = opts.envs;

        let app_path = self.app_path(app_id);
        let app_payload = store::encode(&app)?;
        let partition_payloads = app
            .partitions
            .iter()
            .map(store::encode)
            .collect::<Result<Vec<_>>>()?;

        self.persist(
            format!("create {}", app_path),
            {
                let app_path = app_path.clone();
                move |s| {
                    let created = (|| -> Result<()> {
                        s.create(&app_path, &app_payload)?;
                        let partitions_dir = format!("{}/partitions", app_path);
                        s.create(&partitions_dir, &[])?;
                        for (idx, payload) in partition_payloads.iter().enumerate() {
                            s.create(&format!("{}/{}", partitions_dir, idx), payload)?;
                        }
                        Ok(())
                    })();
                    if created.is_err() {
                        // Best effort cleanup of a partial tree.
                        let _ = s.delete_subtree(&app_path);
                    }
                    created
                }
            },
            undo({
                let app_path = app_path.clone();
                move |s| s.delete_subtree(&app_path)
            }),
        )
        .await?;

        self.write_registry().insert(app);
        tracing::info!(
            "Created app {} (id {}, {} partitions, {} replicas)",
            opts.app_name,
            app_id,
            opts.partition_count,
            replica_count
        );
        Ok(app_id)
    }

    /// Drop an app: Dropping, then Dropped, each step durable before it is
    /// visible. The name becomes reusable once Dropped is persisted.
    pub async fn drop_app(&self, app_name: &str, grace_period: Duration) -> Result<()> {
        let _ddl = self.ddl_lock.lock().await;
        let slot = self.live_slot(app_name)?;
        let _serial = slot.op_lock.lock().await;

        let current = slot.snapshot();
        let dropping = if current.status == AppStatus::Dropping {
            // Retry of a drop that failed half way.
            current
        } else {
            let mut next = current.transitioned(AppStatus::Dropping)?;
            next.drop_time = Some(timestamp_now_millis());
            self.commit_app(&slot, next).await?
        };

        let mut dropped = dropping.transitioned(AppStatus::Dropped)?;
        let drop_time = dropped.drop_time.unwrap_or_else(timestamp_now_millis);
        let grace_ms = u64::try_from(grace_period.as_millis()).unwrap_or(u64::MAX);
        dropped.expire_time = Some(drop_time.saturating_add(grace_ms));
        let dropped = self.commit_app(&slot, dropped).await?;

        self.write_registry().by_name.remove(app_name);
        tracing::info!(
            "Dropped app {} (id {}), reclaimable after {}",
            app_name,
            dropped.app_id,
            dropped
                .expire_time
                .map(format_millis)
                .unwrap_or_else(|| "never".into())
        );
        Ok(())
    }

    /// Snapshot of a live app by name. Dropped apps are not found.
    pub fn get_app(&self, app_name: &str) -> Result<Arc<AppState>> {
        let app = self.live_slot(app_name)?.snapshot();
        if app.is_dropped() {
            return Err(crate::Error::NotFound(format!("app {}", app_name)));
        }
        Ok(app)
    }

    /// Snapshot of a live app by id. Dropped apps are not found.
    pub fn get_app_by_id(&self, app_id: i32) -> Result<Arc<AppState>> {
        let slot = self
            .read_registry()
            .apps
            .get(&app_id)
            .cloned()
            .ok_or_else(|| crate::Error::NotFound(format!("app id {}", app_id)))?;
        let app = slot.snapshot();
        if app.is_dropped() {
            return Err(crate::Error::NotFound(format!("app id {}", app_id)));
        }
        Ok(app)
    }

    /// Snapshots ordered by app id.
    pub fn list_apps(&self, include_dropped: bool) -> Vec<Arc<AppState>> {
        let slots: Vec<Arc<AppSlot>> = self.read_registry().apps.values().cloned().collect();
        slots
            .iter()
            .map(|slot| slot.snapshot())
            .filter(|app| include_dropped || !app.is_dropped())
            .collect()
    }

    /// Delete dropped apps whose grace period ended before `now_ms` and
    /// release their ids. Returns the reclaimed ids.
    pub async fn reclaim_expired(&self, now_ms: u64) -> Vec<i32> {
        let _ddl = self.ddl_lock.lock().await;
        let expired: Vec<i32> = self
            .list_apps(true)
            .iter()
            .filter(|app| app.is_dropped() && app.expire_time.is_some_and(|t| t <= now_ms))
            .map(|app| app.app_id)
            .collect();

        let mut reclaimed = Vec::new();
        for app_id in expired {
            let path = self.app_path(app_id);
            let result = self
                .persist(
                    format!("delete {}", path),
                    {
                        let path = path.clone();
                        move |s| s.delete_subtree(&path)
                    },
                    None,
                )
                .await;
            match result {
                Ok(()) => {
                    self.write_registry().apps.remove(&app_id);
                    tracing::info!("Reclaimed dropped app id {}", app_id);
                    reclaimed.push(app_id);
                }
                Err(e) => tracing::warn!("Failed to reclaim app id {}: {}", app_id, e),
            }
        }
        reclaimed
    }

    // === Env updates ===

    /// Apply a set/del/clear request to an app's envs.
    pub async fn update_app_env(&self, request: &AppEnvRequest) -> Result<()> {
        request.validate()?;
        let slot = self.live_slot(&request.app_name)?;
        let app = self
            .mutate_app(&slot, |current| {
                Self::ensure_serving(current)?;
                let mut next = current.clone();
                next.envs = request.apply(&current.envs);
                Ok(next)
            })
            .await?;
        tracing::info!(
            "Updated envs of app {} ({}, {} keys, now {} entries)",
            request.app_name,
            request.op,
            request.keys.len(),
            app.envs.len()
        );
        Ok(())
    }

    /// Submit an env update as a tracked background task.
    ///
    /// [`wait_all_task`](Self::wait_all_task) does not return before the
    /// task has replied.
    pub fn submit_app_env(
        self: &Arc<Self>,
        request: AppEnvRequest,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let guard = self.pending.begin();
        let state = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            state.update_app_env(&request).await
        })
    }

    /// Block until every outstanding persistence call and submitted update
    /// has completed.
    pub async fn wait_all_task(&self) {
        self.pending.wait_all().await
    }

    // === Partition reconfiguration ===

    /// Install a new configuration for one partition if its ballot is newer.
    ///
    /// A ballot not greater than the stored one fails with
    /// [`Error::StaleBallot`](crate::Error::StaleBallot) carrying the stored
    /// configuration unchanged.
    pub async fn update_partition_config(
        &self,
        app_id: i32,
        partition_index: i32,
        config: PartitionConfig,
    ) -> Result<PartitionConfig> {
        config.validate()?;
        let slot = self
            .read_registry()
            .apps
            .get(&app_id)
            .cloned()
            .ok_or_else(|| crate::Error::NotFound(format!("app id {}", app_id)))?;
        let _serial = slot.op_lock.lock().await;

        let current = slot.snapshot();
        Self::ensure_serving(&current)?;
        let stored = current.partition(partition_index).ok_or_else(|| {
            crate::Error::NotFound(format!("partition {}.{}", app_id, partition_index))
        })?;
        if config.max_members_exceeded(current.max_replica_count) {
            return Err(crate::Error::MalformedRequest(format!(
                "{} members exceed max replica count {}",
                config.members().len(),
                current.max_replica_count
            )));
        }
        if config.ballot <= stored.ballot {
            tracing::debug!(
                "Rejected stale config for {}.{}: ballot {} <= {}",
                app_id,
                partition_index,
                config.ballot,
                stored.ballot
            );
            return Err(crate::Error::StaleBallot {
                proposed: config.ballot,
                current: Box::new(stored.clone()),
            });
        }

        let path = self.partition_path(app_id, partition_index);
        let payload = store::encode(&config)?;
        let previous = store::encode(stored)?;
        self.persist(
            format!("set {}", path),
            {
                let path = path.clone();
                move |s| s.set(&path, &payload)
            },
            undo(move |s| s.set(&path, &previous)),
        )
        .await?;

        let mut next = (*current).clone();
        next.partitions[partition_index as usize] = config.clone();
        let promote = next.status == AppStatus::Creating && next.all_partitions_have_primary();
        let next = slot.swap(next);
        tracing::info!(
            "Partition {}.{} now at ballot {} (primary {})",
            app_id,
            partition_index,
            config.ballot,
            config
                .primary
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".into())
        );

        if promote {
            let available = next.transitioned(AppStatus::Available)?;
            match self.commit_app(&slot, available).await {
                Ok(_) => tracing::info!("App {} is available", next.app_name),
                // Retried on the next accepted config of this app.
                Err(e) => tracing::warn!("Failed to promote app {}: {}", next.app_name, e),
            }
        }

        Ok(config)
    }

    // === Duplication ===

    /// Attach a duplication link to `remote`; returns `(app_id, dupid)`.
    pub async fn add_duplication(
        &self,
        app_name: &str,
        remote: &str,
        freezed: bool,
    ) -> Result<(i32, DupId)> {
        let slot = self.live_slot(app_name)?;
        let mut dupid = 0;
        let app = self
            .mutate_app(&slot, |current| {
                Self::ensure_serving(current)?;
                let (entries, id) = duplication::with_added(
                    &current.duplications,
                    remote,
                    freezed,
                    timestamp_now_millis(),
                )?;
                dupid = id;
                let mut next = current.clone();
                next.duplications = entries;
                Ok(next)
            })
            .await?;
        tracing::info!(
            "Added duplication {} of app {} to {} (freezed: {})",
            dupid,
            app_name,
            remote,
            freezed
        );
        Ok((app.app_id, dupid))
    }

    /// Live duplication links of an app; returns `(app_id, entries)`.
    pub fn query_duplication(&self, app_name: &str) -> Result<(i32, Vec<DuplicationEntry>)> {
        let app = self.get_app(app_name)?;
        Ok((app.app_id, app.duplications.clone()))
    }

    pub async fn change_duplication_status(
        &self,
        app_name: &str,
        dupid: DupId,
        status: DuplicationStatus,
    ) -> Result<()> {
        let slot = self.live_slot(app_name)?;
        self.mutate_app(&slot, |current| {
            Self::ensure_serving(current)?;
            let mut next = current.clone();
            next.duplications = duplication::with_status(&current.duplications, dupid, status)?;
            Ok(next)
        })
        .await?;
        tracing::info!(
            "Duplication {} of app {} is now {}",
            dupid,
            app_name,
            status
        );
        Ok(())
    }
}

/// Compensating store call for a write that landed after its deadline.
type Undo = Box<dyn FnOnce(&dyn CoordinationStore) -> Result<()> + Send>;

fn undo<F>(f: F) -> Option<Undo>
where
    F: FnOnce(&dyn CoordinationStore) -> Result<()> + Send + 'static,
{
    Some(Box::new(f))
}

/// A node that vanished under a write is a storage fault, not a lookup miss.
fn storage_failure(e: crate::Error) -> crate::Error {
    match e {
        crate::Error::NotFound(msg) => crate::Error::Storage(format!("missing node: {}", msg)),
        other => other,
    }
}

/// Read every app under `apps_root` with its partition configs.
fn load_apps(store: &dyn CoordinationStore, apps_root: &str) -> Result<Vec<AppState>> {
    let mut apps = Vec::new();
    for child in store.children(apps_root)? {
        let app_id: i32 = child
            .parse()
            .map_err(|_| crate::Error::Codec(format!("unexpected node {}/{}", apps_root, child)))?;
        let app_path = format!("{}/{}", apps_root, child);
        let mut app: AppState = store::decode(&store.get(&app_path)?)?;
        if app.app_id != app_id {
            return Err(crate::Error::Codec(format!(
                "node {} holds app id {}",
                app_path, app.app_id
            )));
        }

        app.partitions = (0..app.partition_count)
            .map(|idx| {
                let path = format!("{}/partitions/{}", app_path, idx);
                store
                    .get(&path)
                    .map_err(|_| crate::Error::Codec(format!("missing partition node {}", path)))
                    .and_then(|bytes| store::decode(&bytes))
            })
            .collect::<Result<Vec<PartitionConfig>>>()?;
        apps.push(app);
    }
    Ok(apps)
}
