//! End-to-end tests against a real sshd.
//!
//! Ignored by default. Point them at a server with:
//!
//! - `GSSH_TEST_HOST` (required), `GSSH_TEST_PORT`, `GSSH_TEST_USER`
//! - one of `GSSH_TEST_PASSWORD`, `GSSH_TEST_KEY` or a running agent
//! - `GSSH_TEST_ACCEPT_ENV=1` if the server's `AcceptEnv` lists `TEST_ENV_NAME`
//!
//! and run `cargo test -- --ignored`.

use std::env;
use std::time::{Duration, Instant};

use gssh::{Client, ConnectionConfig, Error};
use tokio_util::sync::CancellationToken;

fn test_config() -> ConnectionConfig {
    let host = env::var("GSSH_TEST_HOST").expect("GSSH_TEST_HOST must be set");
    let mut config = ConnectionConfig::new(host).use_agent(true);
    if let Some(port) = env::var("GSSH_TEST_PORT").ok().and_then(|p| p.parse().ok()) {
        config = config.port(port);
    }
    if let Ok(user) = env::var("GSSH_TEST_USER") {
        config = config.username(user);
    }
    if let Ok(password) = env::var("GSSH_TEST_PASSWORD") {
        config = config.password(password);
    }
    if let Ok(key) = env::var("GSSH_TEST_KEY") {
        config = config.key_path(key);
    }
    config
}

async fn connected() -> Client {
    let mut client = Client::insecure(test_config());
    client.dial().await.expect("dial");
    client
}

#[tokio::test]
#[ignore]
async fn test_echo_output() {
    let mut client = connected().await;
    let out = client.output("echo Hello, world!").await.unwrap();
    assert_eq!(out, b"Hello, world!\n");
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_command_with_args() {
    let mut client = connected().await;
    let mut cmd = client.command("echo").await.unwrap().arg("Hello,").arg("world!");
    assert_eq!(cmd.output().await.unwrap(), b"Hello, world!\n");
    assert!(matches!(cmd.output().await, Err(Error::NilSession)));
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_output_pipe_delivers_lines_in_order() {
    let mut client = connected().await;
    let mut cmd = client
        .command("for i in 1 2 3 4; do echo $i; sleep 0.1; done")
        .await
        .unwrap();

    let mut lines = Vec::new();
    cmd.output_pipe(|line| {
        lines.push(line.to_string());
        Ok::<(), std::io::Error>(())
    })
    .await
    .unwrap();

    assert_eq!(lines, ["1", "2", "3", "4"]);
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_non_zero_exit_keeps_output() {
    let mut client = connected().await;
    let err = client.output("echo partial; exit 3").await.unwrap_err();
    assert_eq!(err.exit_status().and_then(|s| s.code()), Some(3));
    assert_eq!(err.output(), Some(&b"partial\n"[..]));
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_combined_output_includes_stderr() {
    let mut client = connected().await;
    let out = client.combined_output("echo out; echo err 1>&2").await.unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("out\n"));
    assert!(text.contains("err\n"));
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_setenv_respects_server_allow_list() {
    let mut client = connected().await;
    let mut cmd = client.command("echo $TEST_ENV_NAME").await.unwrap();
    cmd.setenv(["TEST_ENV_NAME=GSSH"]).await.unwrap();
    let out = cmd.output().await.unwrap();

    if env::var("GSSH_TEST_ACCEPT_ENV").is_ok_and(|v| v == "1") {
        assert_eq!(out, b"GSSH\n");
    } else {
        assert_eq!(out, b"\n");
    }
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_cancel_returns_promptly() {
    let mut client = connected().await;
    let token = CancellationToken::new();
    let mut cmd = client
        .command_with_signal(token.clone(), "sleep 30")
        .await
        .unwrap();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
    });

    let started = Instant::now();
    let err = cmd.run().await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    canceller.await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_deadline_exceeded() {
    let mut client = connected().await;
    let err = client
        .combined_output_with_signal(Duration::from_millis(300), "sleep 30")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded(_)));
    assert!(err.is_cancelled());
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_start_then_wait() {
    let mut client = connected().await;
    let mut cmd = client.command("sleep 0.2").await.unwrap();
    let started = cmd.start().await.unwrap();
    started.wait().await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_upload_then_read_back() {
    let mut client = connected().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("upload.txt");
    std::fs::write(&local, "uploaded").unwrap();
    let remote = format!("/tmp/gssh-test-{}", std::process::id());

    client.upload(&local, &remote).await.unwrap();
    assert_eq!(client.read_file(&remote).await.unwrap(), b"uploaded");

    let back = dir.path().join("download.txt");
    client.download(&remote, &back).await.unwrap();
    assert_eq!(std::fs::read(&back).unwrap(), b"uploaded");

    client.remove_file(&remote).await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_cached_sftp_session() {
    let mut client = connected().await;
    let session = client.new_sftp().await.unwrap();
    client.set_sftp(session).await;
    assert!(client.read_file("/nonexistent/gssh").await.is_err());
    client.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_redial_and_ping() {
    let mut client = connected().await;
    let first = client.remote_addr();
    client.ping().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.remote_addr(), first);
    client.close().await.unwrap();
    assert!(matches!(client.dial().await, Err(Error::Closed)));
}
