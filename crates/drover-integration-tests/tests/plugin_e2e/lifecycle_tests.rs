use std::collections::BTreeMap;
use std::time::Duration;

use drover_plugins::{LifecycleAction, LoadOptions, PluginError, PluginState};
use tokio::time::{sleep, timeout};

use crate::common::{hello_plugin, legacy_plugin, manager};

#[tokio::test(flavor = "multi_thread")]
async fn start_check_stop() {
    let plugin = hello_plugin();
    let manager = manager();
    let instance = manager.load(&plugin.path).await.unwrap();

    manager.start("hello").await.unwrap();
    assert_eq!(instance.state(), PluginState::Started);

    let health = manager.health_check("hi").await.unwrap();
    assert_eq!(health.plugin, "hello");
    assert_eq!(health.state, PluginState::Started);
    assert!(health.process_alive);
    assert!(health.healthy);

    manager.stop("hello").await.unwrap();
    assert_eq!(instance.state(), PluginState::Stopped);
    assert!(instance.is_process_alive().await);

    let err = manager
        .execute_command("hello", "hello", vec![], BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Stopped(ref name) if name == "hello"), "{err}");

    let health = manager.health_check("hello").await.unwrap();
    assert!(!health.healthy);

    assert!(manager.cleanup().await.is_clean());
    assert!(!instance.is_process_alive().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn transitions_are_one_way() {
    let plugin = hello_plugin();
    let manager = manager();
    manager.load(&plugin.path).await.unwrap();

    manager.start("hello").await.unwrap();
    let err = manager.start("hello").await.unwrap_err();
    assert!(
        matches!(
            err,
            PluginError::InvalidTransition {
                action: LifecycleAction::Start,
                from: PluginState::Started,
                ..
            }
        ),
        "{err}"
    );

    manager.stop("hello").await.unwrap();
    assert!(matches!(
        manager.stop("hello").await,
        Err(PluginError::InvalidTransition { .. })
    ));
    assert!(matches!(
        manager.start("hello").await,
        Err(PluginError::InvalidTransition { .. })
    ));

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unload_frees_name_and_aliases() {
    let plugin = hello_plugin();
    let manager = manager();
    let instance = manager.load(&plugin.path).await.unwrap();

    manager.unload("hi").await.unwrap();
    assert!(manager.is_empty());
    assert_eq!(instance.state(), PluginState::Stopped);
    assert!(!instance.is_process_alive().await);
    assert!(matches!(
        manager.get_plugin("hello"),
        Err(PluginError::NotFound(_))
    ));
    assert!(matches!(
        manager.unload("hello").await,
        Err(PluginError::NotFound(_))
    ));

    manager.load(&plugin.path).await.unwrap();
    let response = manager
        .execute_command("hi", "hello", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(response.stdout_text(), "Hello, World!\n");

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_stops_everything_and_reports_failures() {
    let hello = hello_plugin();
    let legacy = legacy_plugin();
    let manager = manager();

    manager
        .load_with(
            LoadOptions::new(&hello.path).with_config(serde_json::json!({ "failOnStop": true })),
        )
        .await
        .unwrap();
    let legacy_instance = manager.load(&legacy.path).await.unwrap();

    let statuses = manager.health_check_all().await;
    let names: Vec<_> = statuses.iter().map(|s| s.plugin.as_str()).collect();
    assert_eq!(names, ["hello", "legacy"]);
    assert!(statuses.iter().all(|s| s.healthy && s.process_alive));

    let report = manager.cleanup().await;
    assert!(!report.is_clean());
    assert_eq!(report.stopped, vec!["legacy".to_string()]);
    assert_eq!(report.failed.len(), 1);
    let (name, err) = &report.failed[0];
    assert_eq!(name, "hello");
    assert!(
        matches!(err, PluginError::Lifecycle { hook: "stop", message, .. } if message.contains("refusing to stop")),
        "{err}"
    );

    assert!(manager.is_empty());
    assert!(manager.list().is_empty());
    assert!(!legacy_instance.is_process_alive().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_process_is_unhealthy() {
    let plugin = hello_plugin();
    let manager = manager();
    let instance = manager.load(&plugin.path).await.unwrap();
    let pid = instance.pid().await.unwrap();

    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    timeout(Duration::from_secs(10), async {
        while instance.is_process_alive().await {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let health = manager.health_check("hello").await.unwrap();
    assert!(!health.process_alive);
    assert!(!health.healthy);

    let err = timeout(
        Duration::from_secs(10),
        manager.execute_command("hello", "hello", vec![], BTreeMap::new()),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, PluginError::Rpc { .. }), "{err}");

    manager.cleanup().await;
}
