use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Static address of a container inside a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAssignment {
    pub net_id: String,
    pub ip: Ipv4Addr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOpts {
    pub image: String,
    /// overrides the image entrypoint when set
    pub entrypoint: Option<String>,
    pub cmd: Vec<String>,
    /// container ports published on the host
    pub ports: Vec<u16>,
    pub ip: Option<IpAssignment>,
    /// host file mounted at `container_config_path`
    pub host_config_path: Option<PathBuf>,
    pub container_config_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetOpts {
    pub name: String,
    pub cidr: String,
    /// id of a network created earlier, reused when it still exists
    pub net_id: Option<String>,
}

/// Host side of a published container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("`{cmd}` exited with {code:?}: {stderr}")]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("container {0} not found")]
    NotFound(String),
    #[error("unexpected backend output: {0}")]
    Parse(String),
}

/// Container runtime the cluster provisions entities on
#[async_trait::async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    async fn create(&self, id: &str, opts: CreateOpts) -> Result<(), BackendError>;

    async fn remove(&self, id: &str) -> Result<(), BackendError>;

    async fn reboot(&self, id: &str) -> Result<(), BackendError>;

    /// Run `cmd` inside the container; a non-zero exit status is an error
    async fn execute(&self, id: &str, cmd: &[String]) -> Result<(), BackendError>;

    /// Create the network, or return the id of the existing one
    async fn ensure_network(&self, opts: NetOpts) -> Result<String, BackendError>;

    async fn remove_network(&self, net_id: &str) -> Result<(), BackendError>;

    /// Host bindings of `port` published by the container
    async fn connection_info(&self, id: &str, port: u16) -> Result<Vec<PortBinding>, BackendError>;
}
