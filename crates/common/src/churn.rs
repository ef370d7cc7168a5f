//! Churn simulation.
//!
//! Every participant alternates between an online window and a jittered
//!  offline window. Going offline blackholes its traffic; coming back
//!  clears the shaping and forces a full history resync instead of
//!  relying on live delivery.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cluster::{Entity, EntityError};
use crate::network::Options;
use crate::rpc::ControlPlaneError;
use crate::utils::poll_immediate_no_error;

const RESYNC_PERIOD: Duration = Duration::from_secs(2);
const RESYNC_TIMEOUT: Duration = Duration::from_secs(30);
const RESYNC_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ChurnError {
    #[error("churn rate must be in (0, 1], got {0}")]
    InvalidRate(f64),
    #[error("churn period {0:?} leaves no room for an offline window")]
    PeriodTooShort(Duration),
    #[error("failed to stop {name}: {source}")]
    Stop { name: String, source: EntityError },
    #[error("failed to disable packet loss on {name}: {source}")]
    Start { name: String, source: EntityError },
    #[error("requesting messages on {name} failed: {source}")]
    Resync { name: String, source: EntityError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    /// traffic towards these addresses is dropped while offline
    pub target_addrs: Vec<String>,
    /// part of the period a participant spends online
    pub churn_rate: f64,
    pub period: Duration,
}

#[derive(Debug)]
pub struct Participant {
    entity: Arc<Entity>,
    live_since: Instant,
    offline_until: Option<Instant>,
    offline: bool,
}

impl Participant {
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn live_since(&self) -> Instant {
        self.live_since
    }

    /// End of the current offline window
    pub fn offline_until(&self) -> Option<Instant> {
        self.offline_until
    }
}

/// Online/offline state machine over a fixed set of participants
#[derive(Debug)]
pub struct ChurnSim {
    params: Params,
    live: Duration,
    jitter: Duration,
    participants: Vec<Participant>,
}

impl ChurnSim {
    pub fn new(participants: Vec<Arc<Entity>>, params: Params) -> Result<Self, ChurnError> {
        if !(params.churn_rate > 0.0 && params.churn_rate <= 1.0) {
            return Err(ChurnError::InvalidRate(params.churn_rate));
        }
        // the offline window is drawn from [jitter, 3 * jitter)
        if (params.period / 2).is_zero() {
            return Err(ChurnError::PeriodTooShort(params.period));
        }
        let now = Instant::now();
        Ok(Self {
            live: params.period.mul_f64(params.churn_rate),
            jitter: params.period / 2,
            participants: participants
                .into_iter()
                .map(|entity| Participant {
                    entity,
                    live_since: now,
                    offline_until: None,
                    offline: false,
                })
                .collect(),
            params,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// How long a participant stays online
    pub fn live_duration(&self) -> Duration {
        self.live
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, i: usize) -> Option<&Participant> {
        self.participants.get(i)
    }

    /// One pass over all participants, in order. The first failure
    ///  aborts the pass.
    pub async fn control(&mut self, token: &CancellationToken) -> Result<(), ChurnError> {
        for i in 0..self.participants.len() {
            self.control_one(token, i).await?;
        }
        Ok(())
    }

    async fn control_one(&mut self, token: &CancellationToken, i: usize) -> Result<(), ChurnError> {
        let now = Instant::now();
        let (live, jitter) = (self.live, self.jitter);
        let target_addrs = &self.params.target_addrs;
        let participant = &mut self.participants[i];
        let name = participant.entity.name().to_string();

        if !participant.offline && now.duration_since(participant.live_since) > live {
            tracing::debug!("peer {} will be stopped", name);
            let blackhole = Options::blackhole(target_addrs.clone());
            if let Err(source) = participant.entity.enable_conditions(&blackhole).await {
                tracing::error!("stopping peer {} failed: {}", name, source);
                return Err(ChurnError::Stop { name, source });
            }
            let offline = jitter + rand::rng().random_range(Duration::ZERO..jitter * 2);
            tracing::debug!("peer {} will be offline for {:?}", name, offline);
            participant.offline_until = Some(now + offline);
            participant.offline = true;
            return Ok(());
        }

        let due = participant.offline_until.is_some_and(|until| now >= until);
        if participant.offline && due {
            tracing::debug!("peer {} will be started", name);
            if let Err(e) = resume(token, &participant.entity).await {
                tracing::error!("starting peer {} failed: {}", name, e);
                return Err(e);
            }
            participant.live_since = Instant::now();
            participant.offline_until = None;
            participant.offline = false;
        }
        Ok(())
    }

    /// Bring every offline participant back, whatever its schedule
    pub async fn start_all(&mut self, token: &CancellationToken) -> Result<(), ChurnError> {
        for participant in self.participants.iter_mut().filter(|p| p.offline) {
            resume(token, &participant.entity).await?;
            participant.live_since = Instant::now();
            participant.offline_until = None;
            participant.offline = false;
        }
        Ok(())
    }

    /// Run a control pass every `tick` until `window` elapses or
    ///  `token` is cancelled. A failing pass ends the loop with its error.
    pub async fn run(
        &mut self,
        token: &CancellationToken,
        tick: Duration,
        window: Duration,
    ) -> Result<(), ChurnError> {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("churn cancelled");
                    return Ok(());
                }
                _ = &mut deadline => {
                    tracing::debug!("churn window of {:?} elapsed", window);
                    return Ok(());
                }
                _ = ticker.tick() => self.control(token).await?,
            }
        }
    }
}

/// Clear shaping, then ask the node to resync its full history until it
///  accepts or the resync timeout runs out
async fn resume(token: &CancellationToken, entity: &Entity) -> Result<(), ChurnError> {
    let name = entity.name().to_string();
    entity
        .disable_conditions()
        .await
        .map_err(|source| ChurnError::Start {
            name: name.clone(),
            source,
        })?;

    poll_immediate_no_error(
        token,
        move |_| async move {
            match tokio::time::timeout(RESYNC_ATTEMPT_TIMEOUT, entity.request_all_history()).await
            {
                Ok(result) => result,
                Err(_) => Err(EntityError::ControlPlane(ControlPlaneError::Timeout)),
            }
        },
        RESYNC_PERIOD,
        RESYNC_TIMEOUT,
    )
    .await
    .map_err(|source| ChurnError::Resync { name, source })
}
