use std::collections::BTreeMap;
use std::time::Duration;

use drover_core::StreamMessage;
use drover_plugins::{PluginError, PluginManager};
use tokio::time::timeout;

use crate::common::{InstalledPlugin, hello_plugin, manager};

const WAIT: Duration = Duration::from_secs(10);

async fn loaded() -> (InstalledPlugin, PluginManager) {
    let plugin = hello_plugin();
    let manager = manager();
    manager.load(&plugin.path).await.unwrap();
    (plugin, manager)
}

#[tokio::test(flavor = "multi_thread")]
async fn unary_command_round_trip() {
    let (_plugin, manager) = loaded().await;

    let response = manager
        .execute_command("hello", "hello", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.exit_code, 0);
    assert_eq!(response.stdout_text(), "Hello, World!\n");

    let response = manager
        .execute_command("hi", "greet", vec!["Ada".into()], BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(response.stdout_text(), "Hello, Ada!\n");

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn command_alias_resolves_to_canonical() {
    let (_plugin, manager) = loaded().await;

    let response = manager
        .execute_command("hello", "hey", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(response.stdout_text(), "Hello, World!\n");

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn plugin_reported_failure_is_a_response() {
    let (_plugin, manager) = loaded().await;

    let response = manager
        .execute_command("hello", "greet", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.exit_code, 1);
    assert_eq!(response.error.as_deref(), Some("greet needs a name"));

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_names_are_reported() {
    let (_plugin, manager) = loaded().await;

    let err = manager
        .execute_command("nope", "hello", vec![], BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::NotFound(ref name) if name == "nope"));

    let err = manager
        .execute_command("hello", "dance", vec![], BTreeMap::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, PluginError::CommandNotFound { ref command, .. } if command == "dance"),
        "{err}"
    );

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn command_table_lists_every_command() {
    let (_plugin, manager) = loaded().await;

    let table = manager.command_table();
    let rows: Vec<_> = table
        .iter()
        .map(|c| (c.plugin.as_str(), c.name.as_str(), c.interactive))
        .collect();
    assert_eq!(
        rows,
        [
            ("hello", "chat", true),
            ("hello", "greet", false),
            ("hello", "hello", false),
        ]
    );
    assert_eq!(table[2].aliases, vec!["hey".to_string()]);

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn interactive_and_unary_are_not_interchangeable() {
    let (_plugin, manager) = loaded().await;

    let err = manager
        .execute_command("hello", "chat", vec![], BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Usage(_)), "{err}");

    let err = manager
        .start_interactive("hello", "hello", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Usage(_)), "{err}");

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_session_streams_until_exit() {
    let (_plugin, manager) = loaded().await;

    let mut session = manager
        .start_interactive("hello", "chat", vec![])
        .await
        .unwrap();
    assert_eq!(session.plugin(), "hello");

    let first = timeout(WAIT, session.recv()).await.unwrap();
    assert_eq!(first, Some(StreamMessage::stdout("Welcome to interactive mode\n")));

    session.send_stdin("test input\n").await.unwrap();
    session.send_stdin("exit\n").await.unwrap();

    let output = timeout(WAIT, session.wait()).await.unwrap();
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "> You said: test input\n> Goodbye!\n"
    );
    assert!(output.stderr.is_empty());
    assert_eq!(output.exit_code, Some(0));

    assert_eq!(session.exit_code(), Some(0));
    assert!(!session.is_open());
    assert_eq!(session.recv().await, None);
    assert!(matches!(
        session.send_stdin("again\n").await,
        Err(PluginError::SessionClosed { .. })
    ));

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_session_leaves_plugin_usable() {
    let (_plugin, manager) = loaded().await;

    let mut session = manager
        .start_interactive("hello", "chat", vec![])
        .await
        .unwrap();
    let first = timeout(WAIT, session.recv()).await.unwrap();
    assert!(first.is_some());

    session.cancel();
    assert!(!session.is_open());
    let drained = timeout(WAIT, async {
        let mut seen = Vec::new();
        while let Some(message) = session.recv().await {
            seen.push(message);
        }
        seen
    })
    .await
    .unwrap();
    assert!(drained.iter().all(|m| !m.is_exit()));
    assert_eq!(session.exit_code(), None);
    session.close().await;

    let response = manager
        .execute_command("hello", "hello", vec![], BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(response.stdout_text(), "Hello, World!\n");

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unary_calls_run_while_a_session_is_open() {
    let (_plugin, manager) = loaded().await;

    let mut session = manager
        .start_interactive("hi", "chat", vec![])
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        manager.execute_command("hello", "greet", vec!["Ada".into()], BTreeMap::new()),
        manager.execute_command("hello", "greet", vec!["Grace".into()], BTreeMap::new()),
    );
    assert_eq!(a.unwrap().stdout_text(), "Hello, Ada!\n");
    assert_eq!(b.unwrap().stdout_text(), "Hello, Grace!\n");

    session.send_stdin("exit\n").await.unwrap();
    let output = timeout(WAIT, session.wait()).await.unwrap();
    assert_eq!(output.exit_code, Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).ends_with("Goodbye!\n"));

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unread_session_does_not_stall_other_commands() {
    let (_plugin, manager) = loaded().await;

    let mut session = manager
        .start_interactive("hello", "chat", vec![])
        .await
        .unwrap();
    for n in 0..300 {
        if session.send_stdin(format!("line {n}\n")).await.is_err() {
            break;
        }
    }

    let response = timeout(
        WAIT,
        manager.execute_command("hello", "greet", vec!["Ada".into()], BTreeMap::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(response.stdout_text(), "Hello, Ada!\n");

    let _ = session.send_stdin("exit\n").await;
    let output = timeout(WAIT, session.wait()).await.unwrap();
    assert!(
        String::from_utf8_lossy(&output.stdout).starts_with("Welcome to interactive mode\n"),
        "{output:?}"
    );
    assert!(!session.is_open());

    let health = timeout(WAIT, manager.health_check("hello")).await.unwrap().unwrap();
    assert!(health.healthy);

    manager.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn two_sessions_are_independent() {
    let (_plugin, manager) = loaded().await;

    let mut first = manager.start_interactive("hello", "chat", vec![]).await.unwrap();
    let mut second = manager.start_interactive("hello", "chat", vec![]).await.unwrap();
    assert_ne!(first.id(), second.id());

    second.send_stdin("two\nexit\n").await.unwrap();
    first.send_stdin("one\nexit\n").await.unwrap();

    let out1 = timeout(WAIT, first.wait()).await.unwrap();
    let out2 = timeout(WAIT, second.wait()).await.unwrap();
    let text1 = String::from_utf8_lossy(&out1.stdout).into_owned();
    let text2 = String::from_utf8_lossy(&out2.stdout).into_owned();
    assert!(text1.contains("You said: one\n") && !text1.contains("two"), "{text1}");
    assert!(text2.contains("You said: two\n") && !text2.contains("one"), "{text2}");

    manager.cleanup().await;
}
