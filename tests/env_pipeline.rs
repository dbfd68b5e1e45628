//! Env update pipeline: set, del, clear and per-app ordering

use minimeta::common::MetaConfig;
use minimeta::meta::{AppEnvRequest, ClusterState, CreateAppOptions, MemoryStore};
use std::collections::BTreeMap;
use std::sync::Arc;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn cluster_with(apps: &[&str]) -> Arc<ClusterState> {
    let cluster = ClusterState::load(Arc::new(MemoryStore::new()), &MetaConfig::default())
        .await
        .unwrap();
    for name in apps {
        cluster
            .create_app(CreateAppOptions::new(name, "pegasus", 4))
            .await
            .unwrap();
    }
    Arc::new(cluster)
}

#[tokio::test]
async fn test_set_on_empty_envs() {
    let cluster = cluster_with(&["temp"]).await;
    cluster
        .update_app_env(&AppEnvRequest::set(
            "temp",
            strings(&["k1", "k2"]),
            strings(&["v1", "v2"]),
        ))
        .await
        .unwrap();

    let expected: BTreeMap<String, String> = [("k1", "v1"), ("k2", "v2")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(cluster.get_app("temp").unwrap().envs, expected);
}

#[tokio::test]
async fn test_set_length_mismatch_is_rejected() {
    let cluster = cluster_with(&["temp"]).await;
    let err = cluster
        .update_app_env(&AppEnvRequest::set(
            "temp",
            strings(&["k1", "k2"]),
            strings(&["v1"]),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), minimeta::common::ErrorCode::MalformedRequest);
    assert!(cluster.get_app("temp").unwrap().envs.is_empty());
}

#[tokio::test]
async fn test_delete_missing_key_is_noop() {
    let cluster = cluster_with(&["temp"]).await;
    cluster
        .update_app_env(&AppEnvRequest::set("temp", strings(&["a"]), strings(&["1"])))
        .await
        .unwrap();
    cluster
        .update_app_env(&AppEnvRequest::delete("temp", strings(&["missing"])))
        .await
        .unwrap();
    assert_eq!(cluster.get_app("temp").unwrap().envs["a"], "1");
}

#[tokio::test]
async fn test_clear_by_prefix_and_all() {
    let cluster = cluster_with(&["temp"]).await;
    cluster
        .update_app_env(&AppEnvRequest::set(
            "temp",
            strings(&[
                "rocksdb.usage_scenario",
                "rocksdb.write_buffer_size",
                "rocksdb",
                "replica.slow_query_threshold",
            ]),
            strings(&["normal", "64", "bare", "30"]),
        ))
        .await
        .unwrap();

    cluster
        .update_app_env(&AppEnvRequest::clear("temp", "rocksdb"))
        .await
        .unwrap();
    let envs = cluster.get_app("temp").unwrap().envs.clone();
    assert_eq!(
        envs.keys().cloned().collect::<Vec<_>>(),
        strings(&["replica.slow_query_threshold", "rocksdb"])
    );

    cluster
        .update_app_env(&AppEnvRequest::clear("temp", ""))
        .await
        .unwrap();
    assert!(cluster.get_app("temp").unwrap().envs.is_empty());
}

#[tokio::test]
async fn test_unknown_app_is_not_found() {
    let cluster = cluster_with(&[]).await;
    let err = cluster
        .update_app_env(&AppEnvRequest::clear("nope", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, minimeta::Error::NotFound(_)));
}

#[tokio::test]
async fn test_same_app_updates_apply_in_arrival_order() {
    let cluster = cluster_with(&["temp"]).await;

    // Each update overwrites one key; the last submitted must win.
    let handles: Vec<_> = (0..50)
        .map(|i| {
            cluster.submit_app_env(AppEnvRequest::set(
                "temp",
                strings(&["counter"]),
                vec![i.to_string()],
            ))
        })
        .collect();
    cluster.wait_all_task().await;
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(cluster.get_app("temp").unwrap().envs["counter"], "49");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_apps_update_independently() {
    let cluster = cluster_with(&["a", "b", "c"]).await;

    let mut handles = Vec::new();
    for i in 0..30 {
        for app in ["a", "b", "c"] {
            handles.push(cluster.submit_app_env(AppEnvRequest::set(
                app,
                vec![format!("k{}", i)],
                vec![app.to_string()],
            )));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for app in ["a", "b", "c"] {
        let envs = cluster.get_app(app).unwrap().envs.clone();
        assert_eq!(envs.len(), 30);
        assert!(envs.values().all(|v| v == app));
    }
}
