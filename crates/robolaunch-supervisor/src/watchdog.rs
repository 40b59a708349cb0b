//! Crash watchdog
//!
//! Waits for the worker to exit and tells a requested stop apart from a crash.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use robolaunch_core::prelude::*;
use robolaunch_core::{SupervisionState, TerminationReason};
use robolaunch_remote::ExitFuture;

use crate::state::{transition, StateSender};
use crate::stop_flag::StopFlag;

/// Spawn the watchdog for a ready worker.
///
/// When `exit` resolves:
/// - with `stop` raised, publishes `Terminated(RequestedStop)` and reports nothing
/// - otherwise publishes `Terminated(UnexpectedExit(code))` and sends exactly
///   one [`Error::UnexpectedTermination`] on `error_tx`
pub(crate) fn spawn_watchdog(
    exit: ExitFuture,
    stop: StopFlag,
    state_tx: Arc<StateSender>,
    error_tx: mpsc::Sender<Error>,
    log_path: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(watch_exit(exit, stop, state_tx, error_tx, log_path))
}

async fn watch_exit(
    exit: ExitFuture,
    stop: StopFlag,
    state_tx: Arc<StateSender>,
    error_tx: mpsc::Sender<Error>,
    log_path: PathBuf,
) {
    let code = exit.await;

    if stop.is_raised() {
        info!("Worker exited after stop request (code {:?})", code);
        transition(
            &state_tx,
            SupervisionState::Terminated(TerminationReason::RequestedStop),
        );
        return;
    }

    error!("Worker exited unexpectedly (code {:?})", code);
    transition(
        &state_tx,
        SupervisionState::Terminated(TerminationReason::UnexpectedExit(code)),
    );

    let err = Error::UnexpectedTermination { code, log_path };
    if error_tx.send(err).await.is_err() {
        debug!("Error channel closed, unexpected exit not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robolaunch_remote::test_utils::live_process;
    use tokio::sync::watch;

    struct Harness {
        stop: StopFlag,
        state_rx: watch::Receiver<SupervisionState>,
        error_rx: mpsc::Receiver<Error>,
        task: JoinHandle<()>,
    }

    fn harness(exit: ExitFuture) -> Harness {
        let stop = StopFlag::new();
        let (state_tx, state_rx) = watch::channel(SupervisionState::Running);
        let (error_tx, error_rx) = mpsc::channel(4);
        let task = spawn_watchdog(
            exit,
            stop.clone(),
            Arc::new(state_tx),
            error_tx,
            PathBuf::from("robolaunch.log"),
        );
        Harness {
            stop,
            state_rx,
            error_rx,
            task,
        }
    }

    #[tokio::test]
    async fn test_exit_after_stop_is_quiet() {
        let (process, mut worker) = live_process();
        let mut h = harness(process.exit);

        h.stop.raise();
        worker.exit(Some(143));
        h.task.await.unwrap();

        assert_eq!(
            *h.state_rx.borrow(),
            SupervisionState::Terminated(TerminationReason::RequestedStop)
        );
        assert!(h.error_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unexpected_exit_reported_once() {
        let (process, mut worker) = live_process();
        let mut h = harness(process.exit);

        worker.exit(Some(1));
        h.task.await.unwrap();

        let err = h.error_rx.recv().await.unwrap();
        match &err {
            Error::UnexpectedTermination { code, log_path } => {
                assert_eq!(*code, Some(1));
                assert_eq!(log_path, &PathBuf::from("robolaunch.log"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Sender dropped with the task: nothing else follows
        assert!(h.error_rx.recv().await.is_none());
        assert_eq!(
            *h.state_rx.borrow(),
            SupervisionState::Terminated(TerminationReason::UnexpectedExit(Some(1)))
        );
    }

    #[tokio::test]
    async fn test_vanished_worker_has_no_code() {
        let (process, worker) = live_process();
        let mut h = harness(process.exit);

        drop(worker);
        h.task.await.unwrap();

        assert!(matches!(
            h.error_rx.recv().await,
            Some(Error::UnexpectedTermination { code: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_error_channel_does_not_panic() {
        let (process, mut worker) = live_process();
        let h = harness(process.exit);
        drop(h.error_rx);

        worker.exit(Some(2));
        h.task.await.unwrap();
        assert!(h.state_rx.borrow().is_terminated());
    }
}
