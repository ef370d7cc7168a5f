//! Synthetic network degradation.
//!
//! Shaping itself is done by `comcast` running inside the target container;
//! this module only decides which command line to run and hands it to a
//! [`CommandExecutor`].

use serde::{Deserialize, Serialize};

use crate::backend::BackendError;

/// Binary used to shape traffic inside a container
pub const SHAPER: &str = "comcast";

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("nothing to run")]
    NothingToRun,
    #[error("failed to run shaping command: {0}")]
    Execute(#[from] BackendError),
}

/// Runs a command on behalf of a single entity
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, cmd: Vec<String>) -> Result<(), BackendError>;
}

/// Degradation applied to an entity's traffic.
///
/// Zero values mean "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// interface to shape, comcast picks eth0 when unset
    #[serde(default)]
    pub target_interface: Option<String>,
    /// addresses or CIDRs affected, all traffic when empty
    #[serde(default)]
    pub target_addrs: Vec<String>,
    /// added latency in milliseconds
    #[serde(default)]
    pub latency: u32,
    /// dropped packets, in percent
    #[serde(default)]
    pub packet_loss: u32,
    /// bandwidth cap in kbit/s
    #[serde(default)]
    pub bandwidth: u32,
}

impl Options {
    /// Cut all traffic towards `targets`
    pub fn blackhole(targets: Vec<String>) -> Self {
        Self {
            target_addrs: targets,
            packet_loss: 100,
            ..Default::default()
        }
    }

    /// Command line that applies these options
    pub fn start_command(&self) -> Result<Vec<String>, NetworkError> {
        let mut cmd = vec![SHAPER.to_string()];
        if self.latency != 0 {
            cmd.push("-latency".to_string());
            cmd.push(self.latency.to_string());
        }
        if self.packet_loss != 0 {
            cmd.push("-packet-loss".to_string());
            cmd.push(self.packet_loss.to_string());
        }
        if self.bandwidth != 0 {
            cmd.push("-target-bw".to_string());
            cmd.push(self.bandwidth.to_string());
        }
        if !self.target_addrs.is_empty() {
            cmd.push("-target-addr".to_string());
            cmd.push(self.target_addrs.join(","));
        }
        if cmd.len() == 1 {
            return Err(NetworkError::NothingToRun);
        }
        if let Some(device) = &self.target_interface {
            cmd.insert(1, "-device".to_string());
            cmd.insert(2, device.clone());
        }
        Ok(cmd)
    }
}

/// Command line that removes every shaping rule
pub fn stop_command() -> Vec<String> {
    vec![SHAPER.to_string(), "-stop".to_string()]
}

/// Apply `opts` through `exec`.
///
/// Options without any shaping field set are rejected before
///  anything is executed.
pub async fn start<E>(exec: &E, opts: &Options) -> Result<(), NetworkError>
where
    E: CommandExecutor + ?Sized,
{
    let cmd = opts.start_command()?;
    tracing::trace!("starting traffic shaping: {}", cmd.join(" "));
    exec.execute(cmd).await?;
    Ok(())
}

/// Clear all shaping through `exec`, whatever was applied before
pub async fn stop<E>(exec: &E) -> Result<(), NetworkError>
where
    E: CommandExecutor + ?Sized,
{
    exec.execute(stop_command()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl CommandExecutor for Recorder {
        async fn execute(&self, cmd: Vec<String>) -> Result<(), BackendError> {
            self.commands.lock().push(cmd.clone());
            if self.fail {
                return Err(BackendError::CommandFailed {
                    cmd: cmd.join(" "),
                    code: Some(1),
                    stderr: "iptables: permission denied".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_empty_options_run_nothing() {
        let exec = Recorder::default();
        let result = start(&exec, &Options::default()).await;
        assert!(matches!(result, Err(NetworkError::NothingToRun)));
        assert!(exec.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn test_interface_alone_is_nothing_to_run() {
        let exec = Recorder::default();
        let opts = Options {
            target_interface: Some("eth1".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            start(&exec, &opts).await,
            Err(NetworkError::NothingToRun)
        ));
        assert!(exec.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_builds_flags_from_non_zero_fields() {
        let exec = Recorder::default();
        let opts = Options {
            target_interface: Some("eth0".to_string()),
            target_addrs: vec!["10.0.170.0/24".to_string(), "10.0.171.3".to_string()],
            latency: 50,
            packet_loss: 0,
            bandwidth: 1024,
        };
        start(&exec, &opts).await.unwrap();
        let commands = exec.commands.lock();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].join(" "),
            "comcast -device eth0 -latency 50 -target-bw 1024 -target-addr 10.0.170.0/24,10.0.171.3"
        );
    }

    #[tokio::test]
    async fn test_blackhole() {
        let exec = Recorder::default();
        start(&exec, &Options::blackhole(vec!["10.0.0.0/24".to_string()]))
            .await
            .unwrap();
        assert_eq!(
            exec.commands.lock()[0].join(" "),
            "comcast -packet-loss 100 -target-addr 10.0.0.0/24"
        );
    }

    #[tokio::test]
    async fn test_stop_is_unconditional() {
        let exec = Recorder::default();
        stop(&exec).await.unwrap();
        assert_eq!(exec.commands.lock()[0], vec!["comcast", "-stop"]);
    }

    #[tokio::test]
    async fn test_executor_failure_is_surfaced() {
        let exec = Recorder {
            fail: true,
            ..Default::default()
        };
        let result = start(&exec, &Options::blackhole(vec![])).await;
        assert!(matches!(result, Err(NetworkError::Execute(_))));
    }
}
