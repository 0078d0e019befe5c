//! Process-wide error channel
//!
//! Watchers and actions never propagate errors to their parents. They report
//! them here and keep going (or stop themselves); the hosting shell drains the
//! receiving end, usually with [`log_errors`].

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Error;

/// Cloneable handle for reporting errors to the hosting shell.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<Error>,
}

impl ErrorReporter {
    /// Create a reporter and the receiver that drains it.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an error. Never blocks; errors reported after the receiver is
    /// gone are only logged.
    pub fn report(&self, err: Error) {
        if let Err(mpsc::error::SendError(err)) = self.tx.send(err) {
            debug!(error = %err, "Error channel closed, dropping error");
        }
    }
}

/// Drain the error channel into the log until cancelled or every reporter
/// has been dropped.
pub async fn log_errors(mut rx: mpsc::UnboundedReceiver<Error>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(err) => error!(error = %err, "Automation error"),
                None => break,
            },
        }
    }
    info!("Error logger stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_and_receive() {
        let (reporter, mut rx) = ErrorReporter::channel();
        reporter.report(Error::WatcherStopped { trigger_id: 3 });
        reporter.clone().report(Error::Cancelled);

        assert!(matches!(
            rx.recv().await,
            Some(Error::WatcherStopped { trigger_id: 3 })
        ));
        assert!(matches!(rx.recv().await, Some(Error::Cancelled)));
    }

    #[test]
    fn test_report_after_receiver_dropped() {
        let (reporter, rx) = ErrorReporter::channel();
        drop(rx);
        // Closed channel must not panic
        reporter.report(Error::Cancelled);
    }

    #[tokio::test]
    async fn test_log_errors_stops_when_reporters_dropped() {
        let (reporter, rx) = ErrorReporter::channel();
        reporter.report(Error::Config("bad".to_string()));
        drop(reporter);

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            log_errors(rx, CancellationToken::new()),
        )
        .await
        .expect("logger should stop once the channel closes");
    }

    #[tokio::test]
    async fn test_log_errors_stops_on_cancel() {
        let (_reporter, rx) = ErrorReporter::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), log_errors(rx, cancel))
            .await
            .expect("logger should stop on cancellation");
    }
}
