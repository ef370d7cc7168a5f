use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Combined failure of a [`Group`], one line per failed task
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct GroupError(String);

impl GroupError {
    /// The individual task failures, in completion order
    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.0.lines()
    }
}

/// Fan-out runner: every task runs concurrently and the
///  outcome of all of them is reported at once.
///
/// Tasks receive a child of the parent token. [`Group::stop`] (or
///  cancelling the parent) asks them to wind down; nothing is aborted
///  forcibly while [`Group::error`] is waiting.
///
/// Dropping a group without calling [`Group::error`] aborts its tasks.
#[derive(Debug)]
pub struct Group {
    token: CancellationToken,
    tasks: JoinSet<Result<(), String>>,
}

impl Group {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            tasks: JoinSet::new(),
        }
    }

    /// Schedule `f` on the runtime
    pub fn run<F, Fut, E>(&mut self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let fut = f(self.token.clone());
        let span = tracing::Span::current();
        self.tasks
            .spawn(async move { fut.await.map_err(|e| e.to_string()) }.instrument(span));
    }

    /// Number of tasks scheduled and not yet collected
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel the token shared by the tasks of this group
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait for every scheduled task and combine their failures
    pub async fn error(mut self) -> Result<(), GroupError> {
        let mut failures = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(e) => {
                    tracing::error!("group task did not complete: {}", e);
                    failures.push(format!("task did not complete: {}", e));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GroupError(failures.join("\n")))
        }
    }
}
