use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use drover_core::protocol::MAGIC_COOKIE_KEY;
use drover_plugins::security::sha256_file;
use drover_plugins::{
    HostConfig, LoadOptions, PluginError, PluginManager, PluginState, ValidationStep,
};

use crate::common::{hello_plugin, legacy_plugin, manager, missing, slow_plugin};

fn manifest_yaml(checksum: &str, config: &str) -> String {
    format!(
        "apiVersion: drover.dev/v1\n\
         kind: Plugin\n\
         metadata:\n  name: hello\n  version: 1.0.0\n\
         spec:\n  executable:\n    name: hello-plugin\n    checksum: {checksum}\n{config}"
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn load_describes_the_plugin() {
    let plugin = hello_plugin();
    let manager = manager();

    let instance = manager.load(&plugin.path).await.unwrap();
    assert_eq!(instance.name(), "hello");
    assert_eq!(instance.descriptor().version, "1.0.0");
    assert_eq!(instance.descriptor().aliases, vec!["hi".to_string()]);
    assert_eq!(instance.state(), PluginState::Initialized);
    assert!(instance.pid().await.is_some());
    assert!(instance.is_process_alive().await);

    let report = instance.validation_report().unwrap();
    assert_eq!(report.checksum.len(), 64);
    assert_eq!(report.checksum, sha256_file(&plugin.path).unwrap());

    let names: Vec<_> = instance
        .commands()
        .list()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["chat", "greet", "hello"]);

    assert!(Arc::ptr_eq(&manager.get_plugin("hi").unwrap(), &instance));
    assert_eq!(manager.list().len(), 1);

    assert!(manager.cleanup().await.is_clean());
}

#[tokio::test(flavor = "multi_thread")]
async fn world_writable_binary_is_rejected_before_launch() {
    let plugin = hello_plugin();
    plugin.chmod(0o777);
    let manager = manager();

    let err = manager.load(&plugin.path).await.unwrap_err();
    assert_eq!(err.validation_step(), Some(ValidationStep::Permissions));
    assert!(err.to_string().contains("0777"), "{err}");
    assert!(matches!(
        manager.get_plugin("hello"),
        Err(PluginError::NotFound(_))
    ));
    assert!(manager.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_binary_is_an_io_rejection() {
    let plugin = hello_plugin();
    let manager = manager();

    let err = manager.load(missing(plugin.dir.path())).await.unwrap_err();
    assert_eq!(err.validation_step(), Some(ValidationStep::Io));
}

#[tokio::test(flavor = "multi_thread")]
async fn sidecar_checksum_mismatch_names_both_digests() {
    let plugin = hello_plugin();
    let declared = "0".repeat(64);
    plugin.write_manifest(&manifest_yaml(&format!("sha256:{declared}"), ""));
    let manager = manager();

    let err = manager.load(&plugin.path).await.unwrap_err();
    assert_eq!(err.validation_step(), Some(ValidationStep::Checksum));
    let message = err.to_string();
    assert!(message.contains(&declared), "{message}");
    assert!(
        message.contains(&sha256_file(&plugin.path).unwrap()),
        "{message}"
    );
    assert!(manager.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn sidecar_config_is_handed_to_the_plugin() {
    let plugin = hello_plugin();
    let digest = sha256_file(&plugin.path).unwrap();
    plugin.write_manifest(&manifest_yaml(
        &format!("sha256:{digest}"),
        "  config:\n    greeting: Howdy\n",
    ));
    let manager = manager();

    manager.load(&plugin.path).await.unwrap();
    let response = manager
        .execute_command("hello", "hello", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(response.stdout_text(), "Howdy, World!\n");

    assert!(manager.cleanup().await.is_clean());
}

#[tokio::test(flavor = "multi_thread")]
async fn caller_config_wins_over_manifest() {
    let plugin = hello_plugin();
    let digest = sha256_file(&plugin.path).unwrap();
    plugin.write_manifest(&manifest_yaml(
        &digest,
        "  config:\n    greeting: Howdy\n",
    ));
    let manager = manager();

    manager
        .load_with(
            LoadOptions::new(&plugin.path).with_config(serde_json::json!({ "greeting": "Ahoy" })),
        )
        .await
        .unwrap();
    let response = manager
        .execute_command("hi", "hey", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(response.stdout_text(), "Ahoy, World!\n");

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_manifest_path_is_used() {
    let plugin = hello_plugin();
    let elsewhere = tempfile::tempdir().unwrap();
    let manifest = elsewhere.path().join("custom.yaml");
    std::fs::write(&manifest, manifest_yaml("sha256:abcdef", "")).unwrap();
    let manager = manager();

    let err = manager
        .load_with(LoadOptions::new(&plugin.path).with_manifest(&manifest))
        .await
        .unwrap_err();
    assert_eq!(err.validation_step(), Some(ValidationStep::Checksum));
}

#[tokio::test(flavor = "multi_thread")]
async fn scripts_are_rejected_at_the_format_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script-plugin");
    std::fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    let manager = manager();

    let err = manager.load(&path).await.unwrap_err();
    assert_eq!(err.validation_step(), Some(ValidationStep::Format));
    assert!(err.to_string().contains("script"), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_plugin_times_out_in_the_handshake() {
    let plugin = slow_plugin();
    let manager = PluginManager::new(
        HostConfig::default().with_handshake_timeout(Duration::from_secs(1)),
    );

    let started = Instant::now();
    let err = manager.load(&plugin.path).await.unwrap_err();
    assert!(matches!(err, PluginError::Launch { .. }), "{err}");
    assert!(err.to_string().contains("handshake"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(manager.is_empty());
}

#[test]
fn running_a_plugin_by_hand_prints_a_notice() {
    let plugin = hello_plugin();
    let output = std::process::Command::new(&plugin.path)
        .env_remove(MAGIC_COOKIE_KEY)
        .stdin(std::process::Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Drover plugin"), "{stderr}");
    assert!(output.stdout.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_name_is_refused_and_first_keeps_working() {
    let first = hello_plugin();
    let second = hello_plugin();
    let manager = manager();

    manager.load(&first.path).await.unwrap();
    let err = manager.load(&second.path).await.unwrap_err();
    assert!(
        matches!(&err, PluginError::AlreadyRegistered(name) if name == "hello"),
        "{err}"
    );

    assert_eq!(manager.len(), 1);
    let response = manager
        .execute_command("hello", "hello", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(response.stdout_text(), "Hello, World!\n");

    assert!(manager.cleanup().await.is_clean());
}

#[tokio::test(flavor = "multi_thread")]
async fn legacy_plugin_loads_through_the_adapter() {
    let plugin = legacy_plugin();
    let manager = manager();

    let instance = manager.load(&plugin.path).await.unwrap();
    assert_eq!(instance.name(), "legacy");
    assert_eq!(instance.descriptor().version, "0.9.0");

    let response = manager
        .execute_command("legacy", "version", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.stdout_text(), "legacy 0.9.0\n");

    assert!(manager.cleanup().await.is_clean());
}
