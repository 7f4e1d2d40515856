#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::env;
use std::io::Write;

use dotenv::dotenv;
use gssh::config::resolve_host_key_policy;
use gssh::policy::policy_for;
use gssh::{Client, ConnectionConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const HOST_ENV_VAR: &str = "GSSH_HOST";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if command.is_empty() {
        return Err("usage: gssh <command...>".into());
    }
    let host = env::var(HOST_ENV_VAR).map_err(|_| format!("{HOST_ENV_VAR} is not set"))?;

    let config = ConnectionConfig::from_env(host);
    let policy = policy_for(resolve_host_key_policy(None), config.known_hosts.as_deref())?;
    info!("Connecting to {} as {} ({})", config.address(), config.username, policy.name());

    let mut client = Client::with_policy(config, policy);
    client.dial().await?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remote command");
            ctrl_c.cancel();
        }
    });

    let mut cmd = client.command_with_signal(token, command).await?;
    let stdout = std::io::stdout();
    let result = cmd
        .output_pipe(|line| {
            let mut out = stdout.lock();
            writeln!(out, "{line}")
        })
        .await;

    client.close().await?;

    if let Err(e) = &result {
        error!("Remote command failed: {}", e);
        if let Some(code) = e.exit_status().and_then(|s| s.code()) {
            std::process::exit(i32::try_from(code).unwrap_or(1));
        }
    }
    result.map_err(Into::into)
}
