use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Outcome of a retry loop that did not succeed.
enum GaveUp<E> {
    Timeout(E),
    Cancelled(E),
}

/// Call `f` right away, then every `period` until it succeeds,
///  `timeout` elapses or `parent` is cancelled.
///
/// Giving up is not an error here: background pollers use this to
///  try for a while and then move on. The last failure is logged.
pub async fn poll_immediate<F, Fut, E>(
    parent: &CancellationToken,
    f: F,
    period: Duration,
    timeout: Duration,
) where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    match retry(parent, f, period, timeout).await {
        Ok(()) => {}
        Err(GaveUp::Timeout(e)) => {
            tracing::debug!("polling gave up after {:?}: {}", timeout, e);
        }
        Err(GaveUp::Cancelled(e)) => {
            tracing::debug!("polling cancelled: {}", e);
        }
    }
}

/// Same retry shape as [`poll_immediate`], but failing to converge
///  before `timeout` (or cancellation) returns the last error `f` produced.
pub async fn poll_immediate_no_error<F, Fut, E>(
    parent: &CancellationToken,
    f: F,
    period: Duration,
    timeout: Duration,
) -> Result<(), E>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    match retry(parent, f, period, timeout).await {
        Ok(()) => Ok(()),
        Err(GaveUp::Timeout(e)) | Err(GaveUp::Cancelled(e)) => Err(e),
    }
}

/// Retry `f` every `interval` until it succeeds or `timeout` elapses.
///
/// Meant for test assertions over eventually consistent state.
pub async fn eventually<F, Fut, E>(f: F, timeout: Duration, interval: Duration) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut f = f;
    poll_immediate_no_error(&CancellationToken::new(), |_| f(), interval, timeout).await
}

async fn retry<F, Fut, E>(
    parent: &CancellationToken,
    mut f: F,
    period: Duration,
    timeout: Duration,
) -> Result<(), GaveUp<E>>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let token = parent.child_token();
    // anything still holding the token is told to stop once we return
    let _guard = token.clone().drop_guard();

    let mut last = match f(token.clone()).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = parent.cancelled() => return Err(GaveUp::Cancelled(last)),
            _ = &mut deadline => return Err(GaveUp::Timeout(last)),
            _ = tick.tick() => match f(token.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => last = e,
            },
        }
    }
}
