//! Race "the engine became reachable" against "the engine exited".

use std::future::Future;

use crate::error::{LaunchError, WaitError};
use crate::process::ExitStatus;

/// Wait for `readiness` while watching `background` for an early exit.
///
/// `background` completing is the failure case: if it resolves first the
/// engine died during startup and this returns
/// [`LaunchError::UnexpectedTermination`] with its exit status. If
/// `readiness` resolves first this returns `Ok(())` and `background` is
/// dropped here; callers keep their own clone of it to await later.
pub async fn race_readiness<R, B>(readiness: R, background: B) -> Result<(), LaunchError>
where
    R: Future<Output = ()>,
    B: Future<Output = Result<ExitStatus, WaitError>>,
{
    tokio::select! {
        // An exit observed in the same poll as an open port still counts as a failure.
        biased;

        outcome = background => match outcome {
            Ok(status) => Err(LaunchError::UnexpectedTermination { status }),
            Err(e) => Err(LaunchError::Wait(e)),
        },
        () = readiness => Ok(()),
    }
}
