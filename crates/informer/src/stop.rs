//! Process-wide stop signal helpers.

use std::time::Duration;

use tokio::sync::watch;

/// Resolves once the stop signal reads `true`.
///
/// A dropped sender never resolves: nobody is left to ask for a stop.
pub async fn stopped(stop: &mut watch::Receiver<bool>) {
    let closed = stop.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `delay` unless stopped first. Returns `false` on stop.
pub async fn pause(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        () = stopped(stop) => false,
        () = tokio::time::sleep(delay) => true,
    }
}
