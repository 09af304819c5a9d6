//! The Fleet Supervisor: runs one operation against a list of devices in parallel,
//! retrying failures with a fixed backoff until each serial succeeds or exhausts its
//! retry budget.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{info, warn};

/// Default retry budget for an operation that mutates device state.
pub const DEFAULT_RETRIES: u32 = 10;
/// Retry budget for a read-only status query: one attempt, no retries.
pub const STATUS_RETRIES: u32 = 0;
/// Fixed delay between retry rounds.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// What a fleet operation reports about one attempt against one serial.
///
/// `Fatal` is distinct from `Retryable` so the supervisor can stop burning the retry
/// budget on a serial whose failure (e.g. a [`crate::error::GspError::is_fatal`]
/// protocol error) will not be resolved by trying again.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Outcome {
    Succeeded,
    Retryable,
    Fatal,
}

/// Outcome of running the fleet operation against one serial.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FleetResult {
    pub serial: String,
    pub succeeded: bool,
    pub attempts: u32,
}

/// Runs `operation` against every serial in `serials`, in parallel within each round,
/// retrying any serial reporting [`Outcome::Retryable`] up to `retries` additional
/// times with [`RETRY_BACKOFF`] between rounds. A serial reporting [`Outcome::Fatal`]
/// is recorded as failed immediately and excluded from further rounds — it is counted
/// in `attempts` exactly once.
///
/// `operation` reports an [`Outcome`] rather than a `Result` because the fleet only
/// needs to know whether (and how) to retry — the operation itself is responsible for
/// logging or surfacing the underlying error before returning.
pub async fn run_fleet<F, Fut>(serials: Vec<String>, retries: u32, operation: F) -> Vec<FleetResult>
where
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let mut results: Vec<FleetResult> = serials
        .into_iter()
        .map(|serial| FleetResult { serial, succeeded: false, attempts: 0 })
        .collect();
    let mut fatal = vec![false; results.len()];

    for attempt in 0..=retries {
        let pending: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(index, result)| !result.succeeded && !fatal[*index])
            .map(|(index, _)| index)
            .collect();

        if pending.is_empty() {
            break;
        }

        if attempt > 0 {
            info!(attempt, remaining_serials = pending.len(), "retrying fleet round after backoff");
            sleep(RETRY_BACKOFF).await;
        }

        let mut round: JoinSet<(usize, Outcome)> = JoinSet::new();
        for index in pending {
            let serial = results[index].serial.clone();
            let operation = operation.clone();
            round.spawn(async move {
                let outcome = operation(serial).await;
                (index, outcome)
            });
        }

        while let Some(outcome) = round.join_next().await {
            match outcome {
                Ok((index, Outcome::Succeeded)) => {
                    results[index].attempts += 1;
                    results[index].succeeded = true;
                }
                Ok((index, Outcome::Retryable)) => {
                    results[index].attempts += 1;
                }
                Ok((index, Outcome::Fatal)) => {
                    results[index].attempts += 1;
                    fatal[index] = true;
                }
                Err(join_error) => warn!(%join_error, "fleet task panicked"),
            }
        }
    }

    results
}
