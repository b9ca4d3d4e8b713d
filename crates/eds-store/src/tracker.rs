use std::time::Duration;

use eds_shard::{Pending, ShardError, ShardResult};
use eds_types::ShardKey;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::context::Context;
use crate::error::{StoreError, StoreResult};

/// Results arriving sooner than this after the caller left are not reported.
const QUIET_PERIOD: Duration = Duration::from_secs(1);

/// Wait for a lifecycle result unless `ctx` finishes first.
///
/// On cancellation the result is handed to a detached tracker that waits
/// up to `ceiling` for it, so the operation's outcome is still logged.
pub(crate) async fn await_pending<T: Send + 'static>(
    ctx: &Context,
    op: &'static str,
    key: &ShardKey,
    mut pending: Pending<T>,
    ceiling: Duration,
) -> StoreResult<ShardResult<T>> {
    let delivered = tokio::select! {
        biased;
        res = &mut pending => Some(res),
        _ = ctx.done() => None,
    };
    match delivered {
        Some(Ok(result)) => Ok(result),
        Some(Err(_)) => Ok(Err(ShardError::Closed)),
        None => {
            track_late_result(op, key.clone(), pending, ceiling);
            Err(StoreError::Cancelled {
                op,
                key: key.clone(),
            })
        }
    }
}

/// Log the outcome of an operation whose caller stopped waiting.
pub(crate) fn track_late_result<T: Send + 'static>(
    op: &'static str,
    key: ShardKey,
    pending: Pending<T>,
    ceiling: Duration,
) {
    let abandoned = Instant::now();
    tokio::spawn(async move {
        let outcome = tokio::time::timeout(ceiling, pending).await;
        let elapsed = abandoned.elapsed();
        match outcome {
            Err(_) => {
                error!(op, key = %key, ?ceiling, "timed out waiting for abandoned operation")
            }
            Ok(_) if elapsed < QUIET_PERIOD => {}
            Ok(Ok(Ok(_))) => {
                warn!(op, key = %key, ?elapsed, "operation finished after its caller gave up")
            }
            Ok(Ok(Err(e))) => {
                error!(op, key = %key, ?elapsed, error = %e, "abandoned operation failed")
            }
            Ok(Err(_)) => {
                error!(op, key = %key, ?elapsed, "abandoned operation dropped its result")
            }
        }
    });
}
