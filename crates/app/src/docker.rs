use std::process::Output;

use common::backend::{Backend, BackendError, CreateOpts, NetOpts, PortBinding};
use tokio::process::Command;

/// Runs cluster containers through the `docker` command line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            bin: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    async fn output(&self, args: &[String]) -> Result<Output, BackendError> {
        tracing::trace!("{} {}", self.bin, args.join(" "));
        Ok(Command::new(&self.bin).args(args).output().await?)
    }

    /// Run and return trimmed stdout; a non-zero exit is an error
    async fn docker(&self, args: Vec<String>) -> Result<String, BackendError> {
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                cmd: format!("{} {}", self.bin, args.join(" ")),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Id of the network `name_or_id`, if it exists
    async fn find_network(&self, name_or_id: &str) -> Result<Option<String>, BackendError> {
        let output = self
            .output(&args(["network", "inspect", "--format", "{{.Id}}", name_or_id]))
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!id.is_empty()).then_some(id))
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Arguments of `docker run` for a detached container
pub fn run_args(id: &str, opts: &CreateOpts) -> Vec<String> {
    let mut out = args(["run", "-d", "--name", id]);
    if let Some(ip) = &opts.ip {
        out.extend(args(["--network", &ip.net_id, "--ip", &ip.ip.to_string()]));
    }
    for port in &opts.ports {
        out.push("-p".to_string());
        out.push(port.to_string());
    }
    if let (Some(host), Some(container)) = (&opts.host_config_path, &opts.container_config_path) {
        out.push("-v".to_string());
        out.push(format!("{}:{}:ro", host.display(), container));
    }
    if let Some(entrypoint) = &opts.entrypoint {
        out.push("--entrypoint".to_string());
        out.push(entrypoint.clone());
    }
    out.push(opts.image.clone());
    out.extend(opts.cmd.iter().cloned());
    out
}

/// Parse `docker port` output, one `host:port` per line
pub fn parse_port_bindings(output: &str) -> Result<Vec<PortBinding>, BackendError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (host, port) = line
                .rsplit_once(':')
                .ok_or_else(|| BackendError::Parse(line.to_string()))?;
            let host_port = port
                .parse()
                .map_err(|_| BackendError::Parse(line.to_string()))?;
            Ok(PortBinding {
                host_ip: host.to_string(),
                host_port,
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl Backend for DockerCli {
    async fn create(&self, id: &str, opts: CreateOpts) -> Result<(), BackendError> {
        let container = self.docker(run_args(id, &opts)).await?;
        tracing::debug!("started container {} ({})", id, container);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.docker(args(["rm", "-f", id])).await.map(|_| ())
    }

    async fn reboot(&self, id: &str) -> Result<(), BackendError> {
        self.docker(args(["restart", id])).await.map(|_| ())
    }

    async fn execute(&self, id: &str, cmd: &[String]) -> Result<(), BackendError> {
        let mut exec = args(["exec", "--privileged", id]);
        exec.extend(cmd.iter().cloned());
        self.docker(exec).await.map(|_| ())
    }

    async fn ensure_network(&self, opts: NetOpts) -> Result<String, BackendError> {
        if let Some(id) = &opts.net_id {
            if let Some(id) = self.find_network(id).await? {
                return Ok(id);
            }
        }
        if let Some(id) = self.find_network(&opts.name).await? {
            tracing::debug!("reusing network {} ({})", opts.name, id);
            return Ok(id);
        }
        let id = self
            .docker(args(["network", "create", "--subnet", &opts.cidr, &opts.name]))
            .await?;
        tracing::info!("created network {} {} ({})", opts.name, opts.cidr, id);
        Ok(id)
    }

    async fn remove_network(&self, net_id: &str) -> Result<(), BackendError> {
        self.docker(args(["network", "rm", net_id])).await.map(|_| ())
    }

    async fn connection_info(&self, id: &str, port: u16) -> Result<Vec<PortBinding>, BackendError> {
        let output = self
            .docker(args(["port", id, &format!("{}/tcp", port)]))
            .await?;
        parse_port_bindings(&output)
    }
}
