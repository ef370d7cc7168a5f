use clap::Args;

use crate::config::{AppConfig, ConfigError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Prefix for container and network names
    #[arg(long)]
    pub prefix: Option<String>,

    /// Address block of the cluster network
    #[arg(long)]
    pub cidr: Option<String>,

    /// Image used for relays, mailservers and clients
    #[arg(long)]
    pub node_image: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid cidr: {0}")]
    Cidr(#[from] common::ipam::IpamError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig::default();
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(cidr) = &self.cidr {
            common::ipam::Ipam::new(cidr)?;
            config.cidr = cidr.clone();
        }
        if let Some(image) = &self.node_image {
            config.node_image = image.clone();
        }

        config.init(&ctx.config_path)?;

        Ok(format!(
            "Initialized scale config at: {}\n\
             - Prefix: {}\n\
             - Network: {}\n\
             - Node image: {}\n\
             - Bootnode image: {}\n\
             - Rendezvous image: {}",
            ctx.config_path.display(),
            config.prefix,
            config.cidr,
            config.node_image,
            config.bootnode_image,
            config.rendezvous_image,
        ))
    }
}
