//! The collector service lifecycle.
//!
//! [`ServiceLifecycle`] is the state machine behind start and stop:
//!
//! ```text
//!   Stopped --start--> Starting --worker ready--> Running
//!      ^                  |                          |
//!      +--- start failed -+                         stop
//!      |                                             v
//!      +-------------- worker exited ----------- Stopping
//! ```
//!
//! A wake-lock and a collection worker exist exactly while the state is not
//! `Stopped`. Both are owned by the lifecycle and released on every exit
//! path, including a failed start and dropping the lifecycle while running.
//!
//! The one exception is a worker that misses the stop timeout. Its wake-lock
//! is released anyway, but the lifecycle keeps its handle, and the next
//! `start` waits for it to exit before spawning another worker. If it is
//! still alive, `start` fails with [`Error::WorkerStillRunning`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use sensord_types::ServiceState;

use crate::error::{Error, Result};
use crate::wakelock::{WakeLock, WakeLockGuard};
use crate::worker::{
    Collaborators, CollectionWorker, ScanAvailability, WorkerHandle, WorkerOptions, WorkerSummary,
};

/// Default time `stop` waits for the worker to exit.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(250);
/// Default time `start` waits for the worker to register its sources.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_millis(250);

/// Lifecycle tunables.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Options handed to each worker.
    pub worker: WorkerOptions,
    /// How long `start` waits for the worker's readiness report.
    pub startup_timeout: Duration,
    /// How long `stop` waits for the worker to exit.
    pub stop_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            worker: WorkerOptions::default(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Result of a successful `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReport {
    /// State of the scan source.
    pub scan: ScanAvailability,
    /// The overwrite policy the session runs with.
    pub overwrite: bool,
}

/// How the worker ended during `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker exited and reported its counters.
    Clean(WorkerSummary),
    /// The worker did not exit within the stop timeout.
    TimedOut(Duration),
    /// The worker thread panicked.
    Panicked,
}

/// Result of a successful `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// How the worker ended.
    pub exit: WorkerExit,
    /// How long the session ran.
    pub uptime: Duration,
}

struct RunningSession {
    worker: WorkerHandle,
    wake_lock: WakeLockGuard,
    started_at: Instant,
}

/// Owns the wake-lock and the collection worker across start/stop cycles.
///
/// All methods take `&self`; share the lifecycle behind an [`Arc`] to drive
/// it from several threads.
pub struct ServiceLifecycle {
    wake_lock: Arc<dyn WakeLock>,
    collaborators: Collaborators,
    options: LifecycleOptions,
    overwrite: AtomicBool,
    state: Mutex<ServiceState>,
    session: Mutex<Option<RunningSession>>,
    straggler: Mutex<Option<WorkerHandle>>,
}

impl ServiceLifecycle {
    /// Create a stopped lifecycle with default options.
    pub fn new(wake_lock: Arc<dyn WakeLock>, collaborators: Collaborators) -> Self {
        Self::with_options(wake_lock, collaborators, LifecycleOptions::default())
    }

    /// Create a stopped lifecycle with custom options.
    pub fn with_options(
        wake_lock: Arc<dyn WakeLock>,
        collaborators: Collaborators,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            wake_lock,
            collaborators,
            options,
            overwrite: AtomicBool::new(false),
            state: Mutex::new(ServiceState::Stopped),
            session: Mutex::new(None),
            straggler: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> ServiceState {
        *self.lock_state()
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Set the overwrite policy used by the next `start`.
    ///
    /// A running session keeps the value it started with.
    pub fn set_overwrite_policy(&self, overwrite: bool) {
        self.overwrite.store(overwrite, Ordering::SeqCst);
    }

    /// The overwrite policy the next `start` will use.
    pub fn overwrite_policy(&self) -> bool {
        self.overwrite.load(Ordering::SeqCst)
    }

    /// Start collecting.
    ///
    /// Fails with [`Error::AlreadyRunning`] unless stopped, with
    /// [`Error::WorkerStillRunning`] if a worker abandoned by an earlier
    /// `stop` has not exited yet, and with [`Error::ResourceUnavailable`] if
    /// the wake-lock cannot be acquired.
    /// On any failure the service is left stopped with nothing held.
    pub fn start(&self) -> Result<StartReport> {
        {
            let mut state = self.lock_state();
            if *state != ServiceState::Stopped {
                return Err(Error::AlreadyRunning);
            }
            *state = ServiceState::Starting;
        }

        match self.spawn_session() {
            Ok((session, report)) => {
                *self.lock_session() = Some(session);
                *self.lock_state() = ServiceState::Running;
                info!(scan = %report.scan, overwrite = report.overwrite, "Collector started");
                Ok(report)
            }
            Err(e) => {
                *self.lock_state() = ServiceState::Stopped;
                warn!(error = %e, "Collector failed to start");
                Err(e)
            }
        }
    }

    fn spawn_session(&self) -> Result<(RunningSession, StartReport)> {
        self.reap_straggler()?;
        let wake_lock =
            WakeLockGuard::acquire(Arc::clone(&self.wake_lock)).map_err(Error::ResourceUnavailable)?;
        let overwrite = self.overwrite_policy();

        // The guard is dropped, and the lock released, if spawning fails.
        let worker = CollectionWorker::spawn(
            self.collaborators.clone(),
            self.options.worker.clone(),
            overwrite,
        )?;
        let scan = worker.wait_ready(self.options.startup_timeout);

        let session = RunningSession {
            worker,
            wake_lock,
            started_at: Instant::now(),
        };
        Ok((session, StartReport { scan, overwrite }))
    }

    /// Stop collecting.
    ///
    /// Fails with [`Error::NotRunning`] when stopped and with
    /// [`Error::InTransition`] while a start or stop is in progress. A
    /// worker that does not exit within the stop timeout is logged and
    /// abandoned; the wake-lock is released regardless.
    pub fn stop(&self) -> Result<StopReport> {
        {
            let mut state = self.lock_state();
            match *state {
                ServiceState::Stopped => return Err(Error::NotRunning),
                ServiceState::Starting | ServiceState::Stopping => {
                    return Err(Error::InTransition(*state));
                }
                ServiceState::Running => *state = ServiceState::Stopping,
            }
        }

        let session = self.lock_session().take();
        let report = match session {
            Some(session) => self.end_session(session),
            None => StopReport {
                exit: WorkerExit::Panicked,
                uptime: Duration::ZERO,
            },
        };

        *self.lock_state() = ServiceState::Stopped;
        info!(uptime = ?report.uptime, exit = ?report.exit, "Collector stopped");
        Ok(report)
    }

    fn end_session(&self, session: RunningSession) -> StopReport {
        let RunningSession {
            mut worker,
            wake_lock,
            started_at,
        } = session;

        let exit = match worker.quit(self.options.stop_timeout) {
            Ok(summary) => WorkerExit::Clean(summary),
            Err(Error::WorkerShutdownTimeout { timeout }) => {
                warn!(?timeout, "Worker did not confirm shutdown; releasing wake-lock anyway");
                *self.lock_straggler() = Some(worker);
                WorkerExit::TimedOut(timeout)
            }
            Err(e) => {
                warn!(error = %e, "Worker ended abnormally");
                WorkerExit::Panicked
            }
        };
        wake_lock.release();

        StopReport {
            exit,
            uptime: started_at.elapsed(),
        }
    }

    /// Wait for a worker left behind by a timed-out `stop`.
    fn reap_straggler(&self) -> Result<()> {
        let mut straggler = self.lock_straggler();
        let Some(worker) = straggler.as_mut() else {
            return Ok(());
        };
        match worker.quit(self.options.stop_timeout) {
            Err(Error::WorkerShutdownTimeout { .. }) => {
                warn!("Previous collection worker has not exited; refusing to start");
                Err(Error::WorkerStillRunning)
            }
            Ok(summary) => {
                info!(submitted = summary.submitted, "Previous collection worker exited late");
                *straggler = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Previous collection worker ended abnormally");
                *straggler = None;
                Ok(())
            }
        }
    }

    fn lock_straggler(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.straggler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<RunningSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ServiceLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLifecycle")
            .field("state", &self.state())
            .field("overwrite", &self.overwrite_policy())
            .field("options", &self.options)
            .finish()
    }
}

impl Drop for ServiceLifecycle {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
