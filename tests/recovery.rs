//! Recovery: cluster state rebuilt from a durable store after restart

use minimeta::common::MetaConfig;
use minimeta::meta::{
    AppEnvRequest, AppStatus, ClusterState, CoordinationStore, CreateAppOptions,
    DuplicationStatus, PartitionConfig, RocksStore,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn meta_config() -> MetaConfig {
    MetaConfig {
        cluster_root: "/recovery".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("coord.db");
    let config = meta_config();

    let (kept, dropped) = {
        let store = Arc::new(RocksStore::open(&db_path).unwrap());
        let cluster = ClusterState::load(store.clone(), &config).await.unwrap();

        let kept = cluster
            .create_app(CreateAppOptions::new("kept", "pegasus", 2))
            .await
            .unwrap();
        let dropped = cluster
            .create_app(CreateAppOptions::new("gone", "pegasus", 1))
            .await
            .unwrap();

        cluster
            .update_app_env(&AppEnvRequest::set(
                "kept",
                vec!["rocksdb.usage_scenario".into()],
                vec!["bulk_load".into()],
            ))
            .await
            .unwrap();
        for pidx in 0..2 {
            cluster
                .update_partition_config(
                    kept,
                    pidx,
                    PartitionConfig {
                        ballot: 3,
                        primary: Some("10.0.0.1:34801".parse().unwrap()),
                        secondaries: vec!["10.0.0.2:34801".parse().unwrap()],
                    },
                )
                .await
                .unwrap();
        }
        let (_, dupid) = cluster
            .add_duplication("kept", "backup", false)
            .await
            .unwrap();
        cluster
            .change_duplication_status("kept", dupid, DuplicationStatus::Pause)
            .await
            .unwrap();
        cluster
            .drop_app("gone", Duration::from_secs(3600))
            .await
            .unwrap();

        cluster.wait_all_task().await;
        store.flush().unwrap();
        (kept, dropped)
    };

    // Simulate restart: reopen and reload
    let store = Arc::new(RocksStore::open(&db_path).unwrap());
    let cluster = ClusterState::load(store, &config).await.unwrap();

    let app = cluster.get_app("kept").unwrap();
    assert_eq!(app.app_id, kept);
    assert_eq!(app.status, AppStatus::Available);
    assert_eq!(app.envs["rocksdb.usage_scenario"], "bulk_load");
    assert_eq!(app.partitions.len(), 2);
    assert!(app.partitions.iter().all(|pc| pc.ballot == 3));
    assert_eq!(app.duplications.len(), 1);
    assert_eq!(app.duplications[0].status, DuplicationStatus::Pause);

    // Dropped app: id reserved, name free
    assert!(cluster.get_app("gone").is_err());
    let all = cluster.list_apps(true);
    assert!(all.iter().any(|a| a.app_id == dropped && a.is_dropped()));
    let next = cluster
        .create_app(CreateAppOptions::new("gone", "pegasus", 1))
        .await
        .unwrap();
    assert_eq!(next, dropped + 1);
}

#[tokio::test]
async fn test_stale_ballot_still_rejected_after_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("coord.db");
    let config = meta_config();
    let proposal = |ballot| PartitionConfig {
        ballot,
        primary: Some("10.0.0.1:34801".parse().unwrap()),
        secondaries: vec![],
    };

    let app_id = {
        let store = Arc::new(RocksStore::open(&db_path).unwrap());
        let cluster = ClusterState::load(store, &config).await.unwrap();
        let app_id = cluster
            .create_app(CreateAppOptions::new("temp", "pegasus", 1))
            .await
            .unwrap();
        cluster
            .update_partition_config(app_id, 0, proposal(7))
            .await
            .unwrap();
        app_id
    };

    let store = Arc::new(RocksStore::open(&db_path).unwrap());
    let cluster = ClusterState::load(store, &config).await.unwrap();
    let err = cluster
        .update_partition_config(app_id, 0, proposal(7))
        .await
        .unwrap_err();
    assert!(err.is_stale_ballot());
    cluster
        .update_partition_config(app_id, 0, proposal(8))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_corrupted_payload_fails_load() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("coord.db");
    let config = meta_config();

    {
        let store = Arc::new(RocksStore::open(&db_path).unwrap());
        let cluster = ClusterState::load(store.clone(), &config).await.unwrap();
        let app_id = cluster
            .create_app(CreateAppOptions::new("temp", "pegasus", 1))
            .await
            .unwrap();
        store
            .set(&format!("/recovery/apps/{}", app_id), b"garbage")
            .unwrap();
    }

    let store = Arc::new(RocksStore::open(&db_path).unwrap());
    let err = ClusterState::load(store, &config).await.err().unwrap();
    assert!(matches!(err, minimeta::Error::Codec(_)));
}
