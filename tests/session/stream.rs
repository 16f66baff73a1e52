//! Stream transport against a real child process.
//!
//! `sh` runs a script that frames its answers the way the engine does in
//! pipe mode, so process-group handling and framing are exercised for real.

#![cfg(unix)]

use crate::common::test_utils::{create_temp_file, mock_engine_script, DEAD_ENGINE_SCRIPT};
use enginelink::error::{EngineError, ProtocolError};
use enginelink::{CommandChannel, EngineConfig, LaunchSpec, TransportKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn sh_config() -> EngineConfig {
    EngineConfig {
        engine_path: PathBuf::from("sh"),
        startup_timeout_secs: 10,
        grace_period_ms: 500,
        ..EngineConfig::default()
    }
}

async fn open_mock() -> (Arc<CommandChannel>, NamedTempFile) {
    let script = mock_engine_script();
    let channel = Arc::new(CommandChannel::new(sh_config()));
    let path = script.path().to_string_lossy().into_owned();
    channel.open(LaunchSpec::raw([path])).await.unwrap();
    (channel, script)
}

#[tokio::test]
async fn test_open_reads_startup_frame_and_probe() {
    let (channel, _script) = open_mock().await;
    let info = channel.session().unwrap();
    assert_eq!(info.kind, TransportKind::Stream);
    assert_eq!(info.version, "5.9.8-mock");
    assert!(info.pid.is_some());
    channel.close().await;
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_responses_are_trimmed() {
    let (channel, _script) = open_mock().await;
    assert_eq!(channel.execute("px 16 @ entry0").await.unwrap(), "px 16 @ entry0");
    assert_eq!(channel.execute("e scr.color=false").await.unwrap(), "");
    channel.close().await;
}

#[tokio::test]
async fn test_residual_output_does_not_leak_into_next_response() {
    let (channel, _script) = open_mock().await;
    assert_eq!(channel.execute("stray").await.unwrap(), "first");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(channel.execute("next").await.unwrap(), "next");
    channel.close().await;
}

#[tokio::test]
async fn test_large_response_grows_buffer() {
    let (channel, _script) = open_mock().await;
    let text = channel.execute("big").await.unwrap();
    assert_eq!(text.len(), 600_000);
    assert!(text.bytes().all(|b| b == b'A'));
    // The session is still usable afterwards.
    assert_eq!(channel.execute("again").await.unwrap(), "again");
    channel.close().await;
}

#[tokio::test]
async fn test_oversized_response_kills_session() {
    let (channel, _script) = open_mock().await;
    let err = channel.execute("huge").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Protocol(ProtocolError::ResponseTooLarge { .. })
    ));
    assert!(!channel.is_connected());
    assert!(matches!(
        channel.execute("again").await,
        Err(EngineError::NotConnected)
    ));
}

#[tokio::test]
async fn test_streamed_response_is_not_capped() {
    let (channel, _script) = open_mock().await;
    let total = channel
        .execute_stream("huge", 0usize, |n, chunk| {
            *n += chunk.len();
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(total, 5_000_000);
    assert_eq!(channel.execute("after").await.unwrap(), "after");
    channel.close().await;
}

#[tokio::test]
async fn test_multiline_command_is_rejected_without_killing_session() {
    let (channel, _script) = open_mock().await;
    let err = channel.execute("a\nb").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert!(channel.is_connected());
    assert_eq!(channel.execute("ok").await.unwrap(), "ok");
    channel.close().await;
}

#[tokio::test]
async fn test_force_close_releases_hung_command() {
    let (channel, _script) = open_mock().await;
    let mut states = channel.subscribe_state();
    let hung = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.execute("hang").await })
    };
    states.wait_for(|s| s.is_executing()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    channel.force_close();
    let err = tokio::time::timeout(Duration::from_secs(5), hung)
        .await
        .expect("force_close did not release the command")
        .unwrap()
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_engine_exiting_before_startup_is_a_startup_failure() {
    let script = create_temp_file(DEAD_ENGINE_SCRIPT.as_bytes());
    let channel = CommandChannel::new(sh_config());
    let path = script.path().to_string_lossy().into_owned();
    let err = channel.open(LaunchSpec::raw([path])).await.unwrap_err();
    assert!(matches!(err, EngineError::StartupFailure(_)));
    assert!(!channel.is_connected());
    assert_eq!(channel.session_id(), 0);
}

#[tokio::test]
async fn test_missing_executable_is_a_startup_failure() {
    let config = EngineConfig {
        engine_path: PathBuf::from("/nonexistent/enginelink-engine"),
        ..EngineConfig::default()
    };
    let channel = CommandChannel::new(config);
    let err = channel.open(LaunchSpec::file("/bin/ls")).await.unwrap_err();
    match err {
        EngineError::StartupFailure(message) => assert!(message.contains("not found")),
        other => panic!("unexpected error {:?}", other),
    }
}
