//! Device handle
//!
//! [`DeviceHandle`] owns the whole supervision of one worker on one device:
//! reachability probe, installation, launch, readiness, and then the watchdog
//! and forwarder tasks until the worker is stopped or dies.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use robolaunch_core::prelude::*;
use robolaunch_core::{RemoteTarget, SupervisionState, TerminationReason};
use robolaunch_remote::{InputStream, ProcessHandle, RemoteSession};

use crate::bootstrap::run_bootstrap;
use crate::config::{CommandSet, SupervisorOptions};
use crate::forwarder::spawn_forwarder;
use crate::install::ensure_installed;
use crate::launcher::{launch, stop_previous};
use crate::log_sink::LogSink;
use crate::readiness::await_ready;
use crate::state::{transition, StateSender};
use crate::stop_flag::StopFlag;
use crate::watchdog::spawn_watchdog;

/// Capacity of the out-of-band error channel
const ERROR_CHANNEL_CAPACITY: usize = 8;

/// A running worker on one remote device.
///
/// Returned by [`start`](Self::start) only once the worker reported ready.
/// Dropping the handle raises the stop flag, aborts the background tasks and
/// closes the worker log; it does not run the remote stop command. Call
/// [`shutdown`](Self::shutdown) for an orderly stop.
pub struct DeviceHandle<S>
where
    S: RemoteSession + Sync + 'static,
{
    session: Arc<S>,
    target: RemoteTarget,
    stop_command: String,
    stop: StopFlag,
    sink: Arc<LogSink>,
    state_tx: Arc<StateSender>,
    state_rx: watch::Receiver<SupervisionState>,
    error_rx: mpsc::Receiver<Error>,
    watchdog: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
    /// Held open for the worker's lifetime
    _input: Mutex<InputStream>,
    stop_grace: Duration,
}

impl<S> DeviceHandle<S>
where
    S: RemoteSession + Sync + 'static,
{
    /// Deploy and start the worker on `target`.
    ///
    /// Sequence: probe (with the bootstrap and a second probe if the first
    /// fails), install, launch, readiness, then spawn the watchdog and
    /// forwarder. Every failure before readiness is returned here, names the
    /// worker log, and no handle is created; a launched worker is stopped
    /// first.
    pub async fn start(
        session: Arc<S>,
        target: RemoteTarget,
        commands: CommandSet,
        options: SupervisorOptions,
    ) -> Result<Self> {
        let (state_tx, state_rx) = watch::channel(SupervisionState::Uninstalled);
        let state_tx = Arc::new(state_tx);
        let sink = LogSink::open(&options.log_path).context("Failed to open worker log")?;
        let sink = Arc::new(sink);

        info!(
            "Supervising worker on {} (log: {})",
            target.destination(),
            sink.path().display()
        );

        let bootstrap = commands.bootstrap.as_deref();
        if !reach(&*session, &target, bootstrap, &options, &sink).await {
            abort_start(&state_tx, &sink, TerminationReason::Unreachable);
            return Err(Error::unreachable(
                &target.host,
                options.probe_port,
                sink.path(),
            ));
        }

        transition(&state_tx, SupervisionState::Installing);
        if let Err(e) = ensure_installed(&*session, &commands.install, sink.path()).await {
            if let Error::Installation { stderr, .. } = &e {
                let _ = sink.append(stderr);
            }
            abort_start(&state_tx, &sink, TerminationReason::InstallFailed);
            return Err(e.with_log_path(sink.path()));
        }

        transition(&state_tx, SupervisionState::Stopped);
        transition(&state_tx, SupervisionState::Starting);
        let process = match launch(&*session, &commands.launch, options.settle).await {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to launch worker: {}", e);
                let _ = sink.append(&format!("Failed to launch worker: {}", e));
                abort_start(&state_tx, &sink, TerminationReason::UnexpectedExit(None));
                return Err(e.with_log_path(sink.path()));
            }
        };

        let ProcessHandle {
            input,
            mut output,
            errors,
            exit,
        } = process;

        if let Err(e) = await_ready(&mut output, &sink, &options.sentinel, options.readiness).await
        {
            // Streams and exit future are dropped with this scope
            stop_previous(&*session, &commands.launch.stop).await;
            let reason = match &e {
                Error::ReadinessTimeout { .. } => TerminationReason::ReadinessTimeout,
                _ => TerminationReason::UnexpectedExit(None),
            };
            abort_start(&state_tx, &sink, reason);
            return Err(e.with_log_path(sink.path()));
        }
        transition(&state_tx, SupervisionState::Ready);

        let stop = StopFlag::new();
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let watchdog = spawn_watchdog(
            exit,
            stop.clone(),
            state_tx.clone(),
            error_tx,
            sink.path().to_path_buf(),
        );
        let forwarder = spawn_forwarder(output, errors, sink.clone(), stop.clone());
        transition(&state_tx, SupervisionState::Running);

        Ok(Self {
            session,
            target,
            stop_command: commands.launch.stop,
            stop,
            sink,
            state_tx,
            state_rx,
            error_rx,
            watchdog: Some(watchdog),
            forwarder: Some(forwarder),
            _input: Mutex::new(input),
            stop_grace: options.stop_grace,
        })
    }

    /// Ask the worker to stop.
    ///
    /// Raises the stop flag, then runs the stop command. Only the first call
    /// does anything. Returns without waiting for the worker to exit.
    pub async fn stop(&self) {
        if !self.stop.raise() {
            debug!("Stop already requested for {}", self.target.host);
            return;
        }

        transition(&self.state_tx, SupervisionState::Stopping);
        info!("Stopping worker on {}", self.target.host);
        stop_previous(&*self.session, &self.stop_command).await;
    }

    /// Stop the worker, wait up to the grace period for the background
    /// tasks, then close the worker log.
    pub async fn shutdown(mut self) {
        self.stop().await;

        let grace = self.stop_grace;
        for (name, task) in [
            ("watchdog", self.watchdog.take()),
            ("forwarder", self.forwarder.take()),
        ] {
            let Some(mut task) = task else { continue };
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(())) => debug!("{} finished", name),
                Ok(Err(e)) => warn!("{} task failed: {}", name, e),
                Err(_) => {
                    warn!("{} still running after {:?}, aborting", name, grace);
                    task.abort();
                }
            }
        }

        self.sink.close();
    }

    /// Wait until the worker reaches `Terminated` and return why.
    pub async fn wait_terminated(&self) -> Result<TerminationReason> {
        let mut state = self.subscribe();
        let reached = state
            .wait_for(SupervisionState::is_terminated)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reached.termination_reason().ok_or(Error::ChannelClosed)
    }

    /// Next out-of-band error, such as an unexpected worker exit.
    ///
    /// `None` once the watchdog has finished and every error was received.
    pub async fn recv_error(&mut self) -> Option<Error> {
        self.error_rx.recv().await
    }

    /// Non-blocking variant of [`recv_error`](Self::recv_error)
    pub fn try_recv_error(&mut self) -> Option<Error> {
        self.error_rx.try_recv().ok()
    }

    pub fn state(&self) -> SupervisionState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SupervisionState> {
        self.state_rx.clone()
    }

    pub fn log_path(&self) -> &Path {
        self.sink.path()
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_raised()
    }
}

impl<S> Drop for DeviceHandle<S>
where
    S: RemoteSession + Sync + 'static,
{
    fn drop(&mut self) {
        if self.stop.raise() {
            warn!(
                "DeviceHandle for {} dropped without stop, worker may still be running",
                self.target.host
            );
        }
        for task in [self.watchdog.take(), self.forwarder.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        self.sink.close();
    }
}

impl<S> fmt::Debug for DeviceHandle<S>
where
    S: RemoteSession + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("target", &self.target.destination())
            .field("state", &self.state())
            .field("log_path", &self.sink.path())
            .field("stop_requested", &self.stop.is_raised())
            .finish_non_exhaustive()
    }
}

/// Probe the target. When that fails and a bootstrap is configured, run it and
/// probe once more.
async fn reach<S>(
    session: &S,
    target: &RemoteTarget,
    bootstrap: Option<&str>,
    options: &SupervisorOptions,
    sink: &LogSink,
) -> bool
where
    S: RemoteSession + Sync,
{
    let (port, timeout) = (options.probe_port, options.probe_timeout);
    if session.is_reachable(port, timeout).await {
        return true;
    }
    let _ = sink.append(&format!(
        "Device {}:{} did not answer within {:?}",
        target.host, port, timeout
    ));

    let Some(bootstrap) = bootstrap else {
        return false;
    };
    warn!("{} unreachable, running bootstrap", target.host);
    if let Err(e) = run_bootstrap(bootstrap, sink, options.bootstrap_timeout).await {
        error!("Bootstrap failed: {}", e);
        let _ = sink.append(&format!("Bootstrap failed: {}", e));
        return false;
    }

    if session.is_reachable(port, timeout).await {
        info!("{} reachable after bootstrap", target.host);
        return true;
    }
    let _ = sink.append(&format!(
        "Device {}:{} still unreachable after bootstrap",
        target.host, port
    ));
    false
}

fn abort_start(state_tx: &StateSender, sink: &LogSink, reason: TerminationReason) {
    transition(state_tx, SupervisionState::Terminated(reason));
    sink.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::InstallCommands;
    use crate::launcher::LaunchCommands;
    use crate::readiness::DEFAULT_SENTINEL;
    use robolaunch_core::Credentials;
    use robolaunch_remote::test_utils::{live_process, scripted_process, MockSession, SessionCall};
    use robolaunch_remote::{CommandOutput, ReadBound};
    use tempfile::TempDir;

    const START: &str = "python worker.py";
    const STOP: &str = "pkill -f worker.py";

    fn commands() -> CommandSet {
        CommandSet {
            install: InstallCommands {
                probe: "check-runtime".to_string(),
                installed_marker: "already installed".to_string(),
                install: "install-runtime".to_string(),
                install_success_marker: "successfully installed".to_string(),
            },
            launch: LaunchCommands {
                start: START.to_string(),
                stop: STOP.to_string(),
            },
            bootstrap: None,
        }
    }

    fn with_bootstrap(command: &str) -> CommandSet {
        CommandSet {
            bootstrap: Some(command.to_string()),
            ..commands()
        }
    }

    fn target() -> RemoteTarget {
        RemoteTarget::new("10.0.0.7", Credentials::new("nao").with_password("nao"))
    }

    fn options(dir: &TempDir) -> SupervisorOptions {
        let mut options = SupervisorOptions::default()
            .with_log_path(dir.path().join("worker.log"))
            .with_settle(Duration::ZERO);
        options.stop_grace = Duration::from_millis(100);
        options
    }

    fn installed_session() -> Arc<MockSession> {
        let session = MockSession::new();
        session.respond("check-runtime", CommandOutput::ok("SIC already installed"));
        Arc::new(session)
    }

    fn read_log(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    async fn wait_for_log(path: &Path, expected: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while read_log(path) != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("log never became {expected:?}, got {:?}", read_log(path)));
    }

    #[tokio::test]
    async fn test_start_sequences_probe_install_stop_start() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, _worker) = scripted_process(&[DEFAULT_SENTINEL]);
        session.push_process(process);

        let handle = DeviceHandle::start(session.clone(), target(), commands(), options(&dir))
            .await
            .unwrap();

        assert_eq!(
            session.calls(),
            vec![
                SessionCall::Probe(22),
                SessionCall::Run("check-runtime".to_string()),
                SessionCall::Run(STOP.to_string()),
                SessionCall::Spawn(START.to_string()),
            ]
        );
        assert_eq!(handle.state(), SupervisionState::Running);
        assert_eq!(handle.log_path(), dir.path().join("worker.log"));
    }

    #[tokio::test]
    async fn test_forwarder_gets_lines_after_sentinel() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, _worker) = scripted_process(&["a", "b", DEFAULT_SENTINEL, "c", "d"]);
        session.push_process(process);

        let handle = DeviceHandle::start(session, target(), commands(), options(&dir))
            .await
            .unwrap();

        let expected = format!("a\nb\n{}\nc\nd\n", DEFAULT_SENTINEL);
        wait_for_log(handle.log_path(), &expected).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_readiness_timeout_returns_no_handle() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let noise: Vec<String> = (0..500).map(|i| format!("noise {}", i)).collect();
        let noise: Vec<&str> = noise.iter().map(String::as_str).collect();
        let (process, _worker) = scripted_process(&noise);
        session.push_process(process);

        let opts = options(&dir).with_readiness(ReadBound::lines(300));
        let err = DeviceHandle::start(session.clone(), target(), commands(), opts)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ReadinessTimeout { attempts: 300, .. }));
        // Stop before launch, and again to clean up the failed worker
        assert_eq!(session.count_matching(STOP), 2);

        // Nothing keeps draining the stream
        tokio::time::sleep(Duration::from_millis(20)).await;
        let logged = read_log(&dir.path().join("worker.log"));
        assert_eq!(logged.lines().count(), 300);
    }

    #[tokio::test]
    async fn test_stop_then_exit_is_requested_stop() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, mut worker) = live_process();
        worker.emit(DEFAULT_SENTINEL).await;
        session.push_process(process);

        let mut handle = DeviceHandle::start(session, target(), commands(), options(&dir))
            .await
            .unwrap();

        handle.stop().await;
        assert_eq!(handle.state(), SupervisionState::Stopping);
        worker.exit(Some(143));

        let reason = tokio::time::timeout(Duration::from_secs(1), handle.wait_terminated())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, TerminationReason::RequestedStop);

        let next = tokio::time::timeout(Duration::from_secs(1), handle.recv_error())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_unexpected_exit_reported_exactly_once() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, mut worker) = live_process();
        worker.emit(DEFAULT_SENTINEL).await;
        session.push_process(process);

        let mut handle = DeviceHandle::start(session, target(), commands(), options(&dir))
            .await
            .unwrap();
        worker.exit(Some(3));

        let first = tokio::time::timeout(Duration::from_secs(1), handle.recv_error())
            .await
            .unwrap();
        assert!(matches!(
            first,
            Some(Error::UnexpectedTermination { code: Some(3), .. })
        ));
        let second = tokio::time::timeout(Duration::from_secs(1), handle.recv_error())
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(
            handle.state(),
            SupervisionState::Terminated(TerminationReason::UnexpectedExit(Some(3)))
        );
    }

    #[tokio::test]
    async fn test_stop_twice_issues_stop_command_once() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, mut worker) = live_process();
        worker.emit(DEFAULT_SENTINEL).await;
        session.push_process(process);

        let handle = DeviceHandle::start(session.clone(), target(), commands(), options(&dir))
            .await
            .unwrap();
        let before = session.count_matching(STOP);

        handle.stop().await;
        handle.stop().await;

        assert_eq!(session.count_matching(STOP), before + 1);
        assert!(handle.is_stop_requested());
    }

    #[tokio::test]
    async fn test_log_holds_every_line_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, mut worker) = live_process();
        worker.emit("booting").await;
        worker.emit(DEFAULT_SENTINEL).await;
        session.push_process(process);

        let handle = DeviceHandle::start(session, target(), commands(), options(&dir))
            .await
            .unwrap();

        let mut expected = format!("booting\n{}\n", DEFAULT_SENTINEL);
        for i in 0..50 {
            let line = format!("frame {}", i);
            worker.emit(&line).await;
            expected.push_str(&line);
            expected.push('\n');
        }
        worker.close_output();
        wait_for_log(handle.log_path(), &expected).await;

        let log_path = handle.log_path().to_path_buf();
        handle.shutdown().await;
        assert_eq!(read_log(&log_path), expected);
    }

    #[tokio::test]
    async fn test_unreachable_target_runs_nothing() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        session.set_reachable(false);

        let err = DeviceHandle::start(session.clone(), target(), commands(), options(&dir))
            .await
            .unwrap_err();

        match &err {
            Error::Unreachable {
                host,
                port,
                log_path,
            } => {
                assert_eq!(host, "10.0.0.7");
                assert_eq!(*port, 22);
                assert_eq!(log_path, &dir.path().join("worker.log"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(session.commands().is_empty());
        assert!(read_log(&dir.path().join("worker.log")).contains("did not answer"));
    }

    #[tokio::test]
    async fn test_install_failure_stops_before_launch() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(MockSession::new());
        session.respond(
            "install-runtime",
            CommandOutput::new("", "No space left on device", Some(1)),
        );

        let err = DeviceHandle::start(session.clone(), target(), commands(), options(&dir))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Installation { .. }));
        assert!(session.position_of(START).is_none());
        assert!(read_log(&dir.path().join("worker.log")).contains("No space left"));
    }

    #[tokio::test]
    async fn test_early_exit_before_ready_is_output_closed() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, _worker) = scripted_process(&["ImportError: No module named redis"]);
        session.push_process(process);

        let err = DeviceHandle::start(session.clone(), target(), commands(), options(&dir))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OutputClosed { lines_read: 1, .. }));
        assert_eq!(session.count_matching(STOP), 2);
    }

    #[tokio::test]
    async fn test_drop_aborts_background_tasks() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, mut worker) = live_process();
        worker.emit(DEFAULT_SENTINEL).await;
        session.push_process(process);

        let handle = DeviceHandle::start(session.clone(), target(), commands(), options(&dir))
            .await
            .unwrap();
        let mut state = handle.subscribe();
        let stops_before = session.count_matching(STOP);
        drop(handle);

        // Every sender goes away once the aborted watchdog is torn down
        tokio::time::timeout(Duration::from_secs(1), async {
            while state.changed().await.is_ok() {}
        })
        .await
        .unwrap();
        assert_eq!(session.count_matching(STOP), stops_before);

        // The aborted forwarder released the output stream
        tokio::time::timeout(Duration::from_secs(1), async {
            while worker.emit("after drop").await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_names_log_file() {
        let dir = TempDir::new().unwrap();
        // No process queued: spawn fails
        let session = installed_session();

        let err = DeviceHandle::start(session, target(), commands(), options(&dir))
            .await
            .unwrap_err();

        let log_path = dir.path().join("worker.log");
        assert_eq!(err.log_path(), Some(log_path.as_path()));
        assert!(err.is_fatal());
        assert!(matches!(&err, Error::Launch { source, .. } if matches!(**source, Error::Remote { .. })));
        assert!(err.to_string().contains(&log_path.display().to_string()));
        assert!(read_log(&log_path).contains("no scripted process queued"));
    }

    #[tokio::test]
    async fn test_bootstrap_brings_target_up() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        session.set_reachable(false).answer_probes(&[false, true]);
        let (process, _worker) = scripted_process(&[DEFAULT_SENTINEL]);
        session.push_process(process);

        let handle = DeviceHandle::start(
            session.clone(),
            target(),
            with_bootstrap("echo starting sshd"),
            options(&dir),
        )
        .await
        .unwrap();

        let calls = session.calls();
        assert_eq!(&calls[..2], &[SessionCall::Probe(22), SessionCall::Probe(22)]);
        assert!(session.position_of(START).is_some());
        assert_eq!(handle.state(), SupervisionState::Running);

        let log = read_log(handle.log_path());
        assert!(log.starts_with("Device 10.0.0.7:22 did not answer"));
        assert!(log.contains("starting sshd\n"));
    }

    #[tokio::test]
    async fn test_bootstrap_without_effect_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        session.set_reachable(false);

        let err = DeviceHandle::start(
            session.clone(),
            target(),
            with_bootstrap("true"),
            options(&dir),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Unreachable { .. }));
        assert_eq!(session.calls(), vec![SessionCall::Probe(22), SessionCall::Probe(22)]);
        assert!(read_log(&dir.path().join("worker.log")).contains("still unreachable after bootstrap"));
    }

    #[tokio::test]
    async fn test_failed_bootstrap_skips_second_probe() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        session.set_reachable(false);

        let err = DeviceHandle::start(
            session.clone(),
            target(),
            with_bootstrap("echo adb: no devices >&2; exit 1"),
            options(&dir),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Unreachable { .. }));
        assert_eq!(session.calls(), vec![SessionCall::Probe(22)]);
        let log = read_log(&dir.path().join("worker.log"));
        assert!(log.contains("[stderr] adb: no devices"));
        assert!(log.contains("Bootstrap failed"));
    }

    #[tokio::test]
    async fn test_debug_shows_target_and_state() {
        let dir = TempDir::new().unwrap();
        let session = installed_session();
        let (process, mut worker) = live_process();
        worker.emit(DEFAULT_SENTINEL).await;
        session.push_process(process);

        let handle = DeviceHandle::start(session, target(), commands(), options(&dir))
            .await
            .unwrap();

        let debug = format!("{:?}", handle);
        assert!(debug.starts_with("DeviceHandle"));
        assert!(debug.contains("10.0.0.7"));
        assert!(debug.contains("Running"));
        assert!(debug.ends_with(".. }"));
    }
}
