//! Control surface for the managed collector process
//!
//! The collector itself is a black box; the controller only needs a
//! health check, a lightweight reload, and a heavier restart. Both
//! are expressed through a seam trait so the applier can be tested
//! against scripted mocks.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Operations the controller may invoke on the collector.
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// Whether the process is currently serving.
    async fn healthy(&self) -> bool;

    /// Ask the process to re-read its configuration. Best-effort.
    async fn reload(&self) -> Result<()>;

    /// Full restart, the fallback when reload keeps failing.
    async fn restart(&self) -> Result<()>;
}

/// Configuration for the command-backed process driver.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Shell command issuing a reload (e.g. `kill -HUP $(cat pidfile)`
    /// or `systemctl reload collector`)
    pub reload_command: String,
    /// Shell command performing a full restart
    pub restart_command: String,
    /// Optional HTTP health URL; when unset the health check runs
    /// `health_command` instead
    pub health_url: Option<String>,
    /// Shell command returning zero when the process is healthy
    pub health_command: Option<String>,
    /// Timeout applied to each invoked command
    pub command_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            reload_command: "systemctl reload otel-collector".to_string(),
            restart_command: "systemctl restart otel-collector".to_string(),
            health_url: Some("http://localhost:13133/health".to_string()),
            health_command: None,
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Drives the collector through configured shell commands, with an
/// optional HTTP health probe.
pub struct CommandProcess {
    config: ProcessConfig,
    http: reqwest::Client,
}

impl CommandProcess {
    pub fn new(config: ProcessConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.command_timeout.min(Duration::from_secs(5)))
            .build()
            .context("Failed to build health-check HTTP client")?;
        Ok(Self { config, http })
    }

    async fn run_command(&self, command: &str, what: &str) -> Result<()> {
        debug!(command = %command, "Running {what} command");
        let output = tokio::time::timeout(
            self.config.command_timeout,
            Command::new("sh").arg("-c").arg(command).output(),
        )
        .await
        .with_context(|| format!("{what} command timed out"))?
        .with_context(|| format!("Failed to spawn {what} command"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{what} command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ManagedProcess for CommandProcess {
    async fn healthy(&self) -> bool {
        if let Some(url) = &self.config.health_url {
            match self.http.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => {
                    warn!(status = %resp.status(), url = %url, "Health probe returned error status");
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, url = %url, "Health probe failed");
                    return false;
                }
            }
        }
        if let Some(command) = &self.config.health_command {
            return self.run_command(command, "health").await.is_ok();
        }
        // No probe configured; assume the supervisor keeps it alive.
        true
    }

    async fn reload(&self) -> Result<()> {
        self.run_command(&self.config.reload_command, "reload").await
    }

    async fn restart(&self) -> Result<()> {
        self.run_command(&self.config.restart_command, "restart")
            .await
    }
}

#[cfg(test)]
pub mod mock {
    //! Scripted mock used by applier and scheduler tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    pub struct MockProcess {
        pub healthy: AtomicBool,
        pub reload_failures: AtomicU32,
        pub restart_fails: AtomicBool,
        pub reload_calls: AtomicU32,
        pub restart_calls: AtomicU32,
    }

    impl MockProcess {
        /// A healthy process whose first `reload_failures` reload
        /// attempts fail.
        pub fn with_reload_failures(n: u32) -> Self {
            Self {
                healthy: AtomicBool::new(true),
                reload_failures: AtomicU32::new(n),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ManagedProcess for MockProcess {
        async fn healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn reload(&self) -> Result<()> {
            self.reload_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.reload_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.reload_failures.store(remaining - 1, Ordering::SeqCst);
                bail!("reload refused")
            }
            Ok(())
        }

        async fn restart(&self) -> Result<()> {
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
            if self.restart_fails.load(Ordering::SeqCst) {
                bail!("restart refused")
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_process_runs_shell_commands() {
        let config = ProcessConfig {
            reload_command: "true".to_string(),
            restart_command: "false".to_string(),
            health_url: None,
            health_command: Some("true".to_string()),
            command_timeout: Duration::from_secs(5),
        };
        let process = CommandProcess::new(config).unwrap();

        assert!(process.healthy().await);
        assert!(process.reload().await.is_ok());
        assert!(process.restart().await.is_err());
    }

    #[tokio::test]
    async fn test_no_probe_configured_assumes_healthy() {
        let config = ProcessConfig {
            health_url: None,
            health_command: None,
            ..ProcessConfig::default()
        };
        let process = CommandProcess::new(config).unwrap();
        assert!(process.healthy().await);
    }
}
