use std::sync::mpsc::{self, RecvTimeoutError};
use tracing::{error, info, info_span, warn, Instrument};

use super::{Operation, OperationError, OperationResult};

/// Execute an operation to completion under its timeout and collapse every
/// outcome into an [`OperationResult`].
///
/// The operation runs on its own thread with a fresh current-thread tokio
/// runtime, so this may be called from anywhere, including from inside
/// another runtime's blocking pool. When the timeout expires the caller
/// gets a failure right away and the worker is abandoned.
pub fn run(mut operation: Operation) -> OperationResult {
    let timeout = operation.timeout();
    let trace = operation.state().trace.clone();
    let conversation_id = operation.state().conversation_id.clone();
    let (tx, rx) = mpsc::channel();

    let span = info_span!("operation", trace = %trace, conversation_id = %conversation_id);
    let spawned = std::thread::Builder::new()
        .name(format!("operation-{}", conversation_id))
        .spawn(move || {
            let outcome = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt.block_on(
                    async move {
                        match tokio::time::timeout(timeout, operation.execute()).await {
                            Ok(outcome) => outcome,
                            Err(_) => Err(OperationError::Timeout { after: timeout }),
                        }
                    }
                    .instrument(span),
                ),
                Err(e) => Err(OperationError::Worker(format!("could not start runtime: {}", e))),
            };
            // The caller may have stopped listening after a timeout
            let _ = tx.send(outcome);
        });

    if let Err(e) = spawned {
        error!("{}: could not spawn operation worker: {}", trace, e);
        return OperationResult::failure(OperationError::Worker(e.to_string()).to_string());
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => {
            info!("{}: finished (success: {})", trace, result.success);
            result
        }
        Ok(Err(e)) => {
            error!("{}: {}", trace, e);
            OperationResult::failure(e.to_string())
        }
        Err(RecvTimeoutError::Timeout) => {
            let e = OperationError::Timeout { after: timeout };
            warn!("{}: {}", trace, e);
            OperationResult::failure(e.to_string())
        }
        Err(RecvTimeoutError::Disconnected) => {
            let e = OperationError::Worker("worker exited without a result".to_string());
            error!("{}: {}", trace, e);
            OperationResult::failure(e.to_string())
        }
    }
}

/// [`run`] from async code without blocking the calling runtime
pub async fn run_async(operation: Operation) -> OperationResult {
    match tokio::task::spawn_blocking(move || run(operation)).await {
        Ok(result) => result,
        Err(e) => OperationResult::failure(OperationError::Worker(e.to_string()).to_string()),
    }
}
