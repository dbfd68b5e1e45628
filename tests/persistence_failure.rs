//! Failed or slow coordination store writes never leak into live state

use minimeta::common::{ErrorCode, MetaConfig};
use minimeta::meta::{
    AppEnvRequest, ClusterState, CreateAppOptions, DuplicationStatus, FailpointStore, MemoryStore,
    PartitionConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn config() -> MetaConfig {
    MetaConfig {
        persistence_timeout_ms: 200,
        ..Default::default()
    }
}

async fn reload(store: &Arc<FailpointStore>) -> ClusterState {
    ClusterState::load(store.clone(), &config()).await.unwrap()
}

async fn setup() -> (ClusterState, Arc<FailpointStore>) {
    let store = Arc::new(FailpointStore::new(Arc::new(MemoryStore::new())));
    let cluster = ClusterState::load(store.clone(), &config()).await.unwrap();
    let mut opts = CreateAppOptions::new("temp", "pegasus", 2);
    opts.envs.insert("replica.deny_client_request".into(), "timeout*all".into());
    cluster.create_app(opts).await.unwrap();
    (cluster, store)
}

#[tokio::test]
async fn test_failed_env_write_leaves_envs_unchanged() {
    let (cluster, store) = setup().await;
    let before = cluster.get_app("temp").unwrap().envs.clone();

    for request in [
        AppEnvRequest::set("temp", vec!["k".into()], vec!["v".into()]),
        AppEnvRequest::delete("temp", vec!["replica.deny_client_request".into()]),
        AppEnvRequest::clear("temp", ""),
    ] {
        store.fail_next_writes(1);
        let err = cluster.update_app_env(&request).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageError);
        assert!(err.is_retryable());
        assert_eq!(cluster.get_app("temp").unwrap().envs, before);
    }

    // The caller resubmits; it goes through.
    cluster
        .update_app_env(&AppEnvRequest::clear("temp", ""))
        .await
        .unwrap();
    assert!(cluster.get_app("temp").unwrap().envs.is_empty());
}

#[tokio::test]
async fn test_validation_failure_does_not_touch_store() {
    let (cluster, store) = setup().await;
    let writes = store.write_count();
    let err = cluster
        .update_app_env(&AppEnvRequest::set(
            "temp",
            vec!["a".into(), "b".into()],
            vec!["1".into()],
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedRequest);
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn test_timed_out_write_surfaces_as_storage_error() {
    let (cluster, store) = setup().await;
    store.delay_writes(Duration::from_millis(600));

    let err = cluster
        .add_duplication("temp", "backup", false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StorageError);
    assert!(matches!(err, minimeta::Error::Timeout(_)));
    assert!(cluster.query_duplication("temp").unwrap().1.is_empty());

    cluster.wait_all_task().await;
}

#[tokio::test]
async fn test_failed_partition_write_keeps_old_config() {
    let (cluster, store) = setup().await;
    let app_id = cluster.get_app("temp").unwrap().app_id;

    store.fail_next_writes(1);
    let err = cluster
        .update_partition_config(
            app_id,
            0,
            PartitionConfig {
                ballot: 1,
                primary: Some("10.0.0.1:34801".parse().unwrap()),
                secondaries: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        cluster.get_app_by_id(app_id).unwrap().partitions[0],
        PartitionConfig::default()
    );
}

#[tokio::test]
async fn test_failed_drop_keeps_app_live() {
    let (cluster, store) = setup().await;
    store.fail_next_writes(1);
    let err = cluster.drop_app("temp", Duration::ZERO).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(cluster.get_app("temp").unwrap().status.is_serving());

    let writes = store.write_count();
    cluster.drop_app("temp", Duration::ZERO).await.unwrap();
    // Dropping, then Dropped.
    assert_eq!(store.write_count(), writes + 2);
    assert!(cluster.get_app("temp").is_err());
}

#[tokio::test]
async fn test_failed_duplication_status_change() {
    let (cluster, store) = setup().await;
    let (_, dupid) = cluster
        .add_duplication("temp", "backup", false)
        .await
        .unwrap();

    store.fail_next_writes(1);
    assert!(cluster
        .change_duplication_status("temp", dupid, DuplicationStatus::Removed)
        .await
        .is_err());
    assert_eq!(cluster.query_duplication("temp").unwrap().1.len(), 1);
}

#[tokio::test]
async fn test_update_queued_behind_timed_out_write_survives_restart() {
    let (cluster, store) = setup().await;
    let cluster = Arc::new(cluster);

    store.delay_writes(Duration::from_millis(500));
    let slow = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            cluster
                .update_app_env(&AppEnvRequest::set("temp", vec!["a".into()], vec!["1".into()]))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.delay_writes(Duration::ZERO);

    // Queued on the same app while the slow write is still in the store.
    let fast = cluster.submit_app_env(AppEnvRequest::set(
        "temp",
        vec!["b".into()],
        vec!["2".into()],
    ));

    let err = slow.await.unwrap().unwrap_err();
    assert!(matches!(err, minimeta::Error::Timeout(_)));
    fast.await.unwrap().unwrap();
    cluster.wait_all_task().await;

    let live = cluster.get_app("temp").unwrap();
    assert_eq!(live.envs.get("b").map(String::as_str), Some("2"));
    assert!(!live.envs.contains_key("a"));

    let durable = reload(&store).await.get_app("temp").unwrap();
    assert_eq!(durable.envs, live.envs);
}

#[tokio::test]
async fn test_create_after_timed_out_create_keeps_its_tree() {
    let store = Arc::new(FailpointStore::new(Arc::new(MemoryStore::new())));
    let cluster = Arc::new(ClusterState::load(store.clone(), &config()).await.unwrap());

    store.delay_writes(Duration::from_millis(500));
    let first = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            cluster
                .create_app(CreateAppOptions::new("first", "pegasus", 2))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.delay_writes(Duration::ZERO);

    let second = cluster
        .create_app(CreateAppOptions::new("second", "pegasus", 2))
        .await
        .unwrap();
    let err = first.await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::StorageError);

    // The slow create was undone, so its id went to the second app.
    assert_eq!(second, 1);
    assert!(cluster.get_app("first").is_err());
    cluster
        .update_app_env(&AppEnvRequest::set("second", vec!["k".into()], vec!["v".into()]))
        .await
        .unwrap();

    let restarted = reload(&store).await;
    let names: Vec<String> = restarted
        .list_apps(true)
        .iter()
        .map(|app| app.app_name.clone())
        .collect();
    assert_eq!(names, vec!["second".to_string()]);
    let app = restarted.get_app("second").unwrap();
    assert_eq!(app.app_id, 1);
    assert_eq!(app.partitions.len(), 2);
    assert_eq!(app.envs.get("k").map(String::as_str), Some("v"));
}
