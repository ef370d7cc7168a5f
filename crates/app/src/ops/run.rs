use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use common::churn::{ChurnError, ChurnSim, Params};
use common::cluster::{Cluster, ClusterError, MetricsOpts, ScaleOpts};
use common::ipam::{Ipam, IpamError};
use common::metrics::RawMetrics;
use common::network::Options;
use common::rpc::JsonRpcConnector;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ConfigError};
use crate::docker::DockerCli;
use crate::op::OpContext;

/// Provision a cluster, exercise it, then tear it down
#[derive(Args, Debug, Clone)]
pub struct Run {
    #[arg(long, default_value_t = 1)]
    pub boot: usize,

    #[arg(long, default_value_t = 0)]
    pub rendezvous: usize,

    #[arg(long, default_value_t = 2)]
    pub relay: usize,

    #[arg(long, default_value_t = 0)]
    pub mails: usize,

    #[arg(long, default_value_t = 0)]
    pub users: usize,

    #[arg(long, default_value_t = 0)]
    pub mvds: usize,

    /// Added latency on every node, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub latency: u32,

    /// Dropped packets on every node, in percent
    #[arg(long, default_value_t = 0)]
    pub packet_loss: u32,

    /// Bandwidth cap on every node, in kbit/s
    #[arg(long, default_value_t = 0)]
    pub bandwidth: u32,

    /// Part of each churn period a user stays online; churn is off when unset
    #[arg(long)]
    pub churn_rate: Option<f64>,

    #[arg(long, default_value_t = 10)]
    pub churn_period_secs: u64,

    /// How long to keep churning
    #[arg(long, default_value_t = 60)]
    pub churn_secs: u64,

    #[arg(long, default_value_t = 500)]
    pub churn_tick_ms: u64,

    /// Print raw metrics of relays and users before teardown
    #[arg(long)]
    pub metrics: bool,

    /// Leave the cluster running
    #[arg(long)]
    pub keep: bool,

    #[arg(long)]
    pub prefix: Option<String>,

    #[arg(long)]
    pub cidr: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ipam(#[from] IpamError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Churn(#[from] ChurnError),

    #[error("failed to encode metrics: {0}")]
    Metrics(#[from] serde_json::Error),
}

impl Run {
    fn app_config(&self, mut config: AppConfig) -> AppConfig {
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(cidr) = &self.cidr {
            config.cidr = cidr.clone();
        }
        config.keep |= self.keep;
        config
    }

    fn scale_opts(&self) -> ScaleOpts {
        ScaleOpts {
            boot: self.boot,
            relay: self.relay,
            users: self.users,
            mails: self.mails,
            mvds: self.mvds,
            rendezvous: self.rendezvous,
            deploy: true,
            ..Default::default()
        }
    }

    /// Degradation for every node, if any was asked for
    fn conditions(&self) -> Option<Options> {
        let opts = Options {
            latency: self.latency,
            packet_loss: self.packet_loss,
            bandwidth: self.bandwidth,
            ..Default::default()
        };
        (opts != Options::default()).then_some(opts)
    }

    fn churn_params(&self, target_addrs: Vec<String>) -> Option<Params> {
        self.churn_rate.map(|churn_rate| Params {
            target_addrs,
            churn_rate,
            period: Duration::from_secs(self.churn_period_secs),
        })
    }

    async fn scenario(&self, cluster: &Cluster, token: &CancellationToken) -> Result<String, RunError> {
        cluster.create(self.scale_opts()).await?;
        let mut out = vec![format!(
            "cluster {} up on {}: {} boot, {} rendezvous, {} relay, {} mail, {} users, {} mvds",
            cluster.config().prefix,
            cluster.ipam().cidr(),
            self.boot,
            self.rendezvous,
            self.relay,
            self.mails,
            self.users,
            self.mvds,
        )];

        if let Some(opts) = self.conditions() {
            cluster.enable_conditions_globally(&opts).await?;
            out.push(format!("conditions applied: {:?}", opts));
        }

        let targets = cluster.relays().iter().map(|r| r.ip().to_string()).collect();
        if let Some(params) = self.churn_params(targets) {
            let mut sim = ChurnSim::new(cluster.users(), params)?;
            tracing::info!(
                "churning {} users for {}s",
                sim.participants().len(),
                self.churn_secs
            );
            sim.run(
                token,
                Duration::from_millis(self.churn_tick_ms),
                Duration::from_secs(self.churn_secs),
            )
            .await?;
            sim.start_all(token).await?;
            out.push(format!("churned {} users", sim.participants().len()));
        }

        if self.metrics {
            let metrics = Arc::new(RawMetrics::new());
            cluster
                .fill_metrics(metrics.clone(), MetricsOpts::default())
                .await?;
            out.push(serde_json::to_string_pretty(&metrics.to_json())?);
        }
        Ok(out.join("\n"))
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Run {
    type Error = RunError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let config = self.app_config(AppConfig::load_or_default(&ctx.config_path)?);
        let ipam = Arc::new(Ipam::new(&config.cidr)?);
        let cluster = Arc::new(Cluster::new(
            config.cluster_config(),
            ipam,
            Arc::new(DockerCli::new()),
            Arc::new(JsonRpcConnector),
        ));

        let done = CancellationToken::new();
        let watcher = {
            let cluster = cluster.clone();
            let shutdown = ctx.shutdown.clone();
            let done = done.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => cluster.cancel(),
                    _ = done.cancelled() => {}
                }
            })
        };

        let result = self.scenario(&cluster, &ctx.shutdown).await;
        if let Err(e) = &result {
            tracing::error!("scenario failed: {}", e);
        }
        cluster.clean().await;
        done.cancel();
        let _ = watcher.await;
        result
    }
}
