//! SSH port forwarding to a database that is only reachable through a
//! bastion host.
//!
//! Runs the system `ssh` client in the background (`ssh -N -L`) and waits
//! until the local end of the forward accepts connections. The forward
//! lives as long as the returned [`Tunnel`]; dropping it kills `ssh`.

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::TunnelConfig;

const READY_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// How long `ssh` must stay alive after the port answers.
const SETTLE_TIME: Duration = Duration::from_millis(500);

/// A running `ssh -L` forward.
pub struct Tunnel {
    child: Child,
    local: String,
}

impl Tunnel {
    pub async fn open(config: &TunnelConfig) -> Result<Self> {
        let local = format!("{}:{}", config.local_bind_address, config.local_bind_port);
        ensure_local_port_free(&local).await?;

        let mut child = Command::new("ssh")
            .args(ssh_args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| "Failed to execute 'ssh'. Is OpenSSH installed?")?;
        debug!(host = %config.host, %local, "ssh started");

        let deadline = Instant::now() + READY_TIMEOUT;
        loop {
            check_alive(&mut child, &config.host).await?;
            if TcpStream::connect(&local).await.is_ok() {
                sleep(SETTLE_TIME).await;
                check_alive(&mut child, &config.host).await?;
                break;
            }
            if Instant::now() >= deadline {
                bail!(
                    "ssh tunnel to {} not ready on {} after {}s",
                    config.host,
                    local,
                    READY_TIMEOUT.as_secs()
                );
            }
            sleep(POLL_INTERVAL).await;
        }

        info!(
            host = %config.host,
            %local,
            remote = %format!("{}:{}", config.remote_bind_address, config.remote_bind_port),
            "ssh tunnel open"
        );
        Ok(Self { child, local })
    }

    pub async fn close(mut self) {
        let _ = self.child.kill().await;
        debug!(local = %self.local, "ssh tunnel closed");
    }
}

/// Fail if something already listens on `local`.
async fn ensure_local_port_free(local: &str) -> Result<()> {
    match TcpListener::bind(local).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(err) => bail!("Cannot forward {}: local port already in use ({})", local, err),
    }
}

async fn check_alive(child: &mut Child, host: &str) -> Result<()> {
    if let Some(status) = child.try_wait()? {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        bail!("ssh tunnel to {} exited ({}): {}", host, status, stderr.trim());
    }
    Ok(())
}

fn ssh_args(config: &TunnelConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-N".into(),
        "-o".into(),
        "ExitOnForwardFailure=yes".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-L".into(),
        format!(
            "{}:{}:{}:{}",
            config.local_bind_address,
            config.local_bind_port,
            config.remote_bind_address,
            config.remote_bind_port
        )
        .into(),
    ];
    if let Some(user) = &config.user {
        args.push("-l".into());
        args.push(user.into());
    }
    if let Some(key) = &config.key_path {
        args.push("-i".into());
        args.push(key.into());
    }
    args.push(config.host.clone().into());
    args
}
