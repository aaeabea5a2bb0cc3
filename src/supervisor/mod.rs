//! Master process: forks the workers, watches them, tears them down.
//!
//! # Lifecycle
//!
//! ```text
//!  Init ──▶ Forking ──▶ Monitoring ──▶ ShuttingDown ──▶ Terminated
//!              │                            ▲
//!              └──── fork failure ──────────┘
//! ```
//!
//! Transitions only move forward. A worker that exits on its own is reaped
//! and dropped from the tracked set but is not replaced, so the pool shrinks
//! for the rest of the server's lifetime. If the pool empties before a
//! shutdown signal arrives, [`Supervisor::run`] reports it as an error.

pub mod signal;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::server::listener::run_worker;

/// A live worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRecord {
    pub pid: Pid,
    /// Ordinal assigned at fork time, `0..worker_count`
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SupervisorState {
    Init,
    Forking,
    Monitoring,
    ShuttingDown,
    Terminated,
}

#[derive(Debug)]
pub enum SupervisorError {
    SignalSetupFailed(Errno),
    ForkFailed { index: usize, errno: Errno },
    /// Monitoring ended without a shutdown request
    WorkersExited { failed: usize },
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::SignalSetupFailed(e) => {
                write!(f, "failed to install signal handlers: {}", e)
            }
            SupervisorError::ForkFailed { index, errno } => {
                write!(f, "failed to fork worker {}: {}", index, errno)
            }
            SupervisorError::WorkersExited { failed } => {
                write!(f, "all workers exited before shutdown ({} failed)", failed)
            }
        }
    }
}

impl std::error::Error for SupervisorError {}

/// Forks and supervises `worker_count` processes running `worker_main`.
///
/// `worker_main` receives the worker's ordinal. It runs only in the child;
/// the child exits with 0 if it returns `Ok`, 1 on `Err` or panic.
pub struct Supervisor<F> {
    worker_count: usize,
    worker_main: F,
    workers: Vec<WorkerRecord>,
    state: SupervisorState,
    failed_exits: usize,
}

impl<F> Supervisor<F>
where
    F: Fn(usize) -> anyhow::Result<()>,
{
    pub fn new(worker_count: usize, worker_main: F) -> Self {
        Self {
            worker_count,
            worker_main,
            workers: Vec::with_capacity(worker_count),
            state: SupervisorState::Init,
            failed_exits: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn workers(&self) -> &[WorkerRecord] {
        &self.workers
    }

    /// Workers that exited non-zero or were killed by a signal while monitored.
    pub fn failed_exits(&self) -> usize {
        self.failed_exits
    }

    /// Full lifecycle: handlers, fork, monitor until told to stop, shut down.
    ///
    /// Succeeds only when a shutdown signal ended monitoring.
    pub fn run(&mut self) -> Result<(), SupervisorError> {
        signal::install_shutdown_handlers().map_err(SupervisorError::SignalSetupFailed)?;

        self.spawn_workers()?;
        let requested = self.monitor();
        self.shutdown();

        if requested {
            Ok(())
        } else {
            Err(SupervisorError::WorkersExited {
                failed: self.failed_exits,
            })
        }
    }

    /// Forks every worker. On failure the ones already started are
    /// terminated and reaped before the error is returned.
    pub fn spawn_workers(&mut self) -> Result<(), SupervisorError> {
        self.transition(SupervisorState::Forking);

        for index in 0..self.worker_count {
            // SAFETY: the child never returns into the caller; it runs the
            // worker body and leaves through `_exit`.
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => {
                    info!(pid = child.as_raw(), worker = index, "Worker started");
                    self.workers.push(WorkerRecord { pid: child, index });
                }
                Ok(ForkResult::Child) => self.run_child(index),
                Err(errno) => {
                    error!(worker = index, error = %errno, "Fork failed, stopping started workers");
                    self.shutdown();
                    return Err(SupervisorError::ForkFailed { index, errno });
                }
            }
        }

        self.transition(SupervisorState::Monitoring);
        Ok(())
    }

    fn run_child(&self, index: usize) -> ! {
        if let Err(e) = signal::restore_default_handlers() {
            error!(worker = index, error = %e, "Failed to reset signal handlers");
            // SAFETY: leaves the forked child without running the master's
            // atexit handlers or flushing its inherited stdio buffers
            unsafe { libc::_exit(1) };
        }

        let code = match panic::catch_unwind(AssertUnwindSafe(|| (self.worker_main)(index))) {
            Ok(Ok(())) => 0,
            Ok(Err(e)) => {
                error!(worker = index, "Worker failed: {:#}", e);
                1
            }
            Err(_) => {
                error!(worker = index, "Worker panicked");
                1
            }
        };

        // SAFETY: as above
        unsafe { libc::_exit(code) }
    }

    /// Blocks on child state changes until every worker is gone or a
    /// shutdown signal arrives. Returns whether shutdown was requested.
    pub fn monitor(&mut self) -> bool {
        let pipe = match signal::install_child_handler().and_then(|()| signal::WakePipe::open()) {
            Ok(pipe) => pipe,
            Err(e) => {
                error!(error = %e, "Cannot watch workers, shutting down");
                return signal::shutdown_requested();
            }
        };

        loop {
            if !self.reap_exited() {
                break;
            }
            if self.workers.is_empty() || signal::shutdown_requested() {
                break;
            }
            if let Err(e) = pipe.wait() {
                error!(error = %e, "Waiting for workers failed, shutting down");
                break;
            }
        }

        let requested = signal::shutdown_requested();
        if requested {
            info!(remaining = self.workers.len(), "Shutdown requested");
        } else if self.workers.is_empty() {
            warn!(failed = self.failed_exits, "All workers have exited");
        }
        requested
    }

    /// Collects every child that has already changed state. Returns false
    /// when `waitpid` itself fails.
    fn reap_exited(&mut self) -> bool {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => return true,
                Ok(WaitStatus::Exited(pid, code)) => {
                    self.on_worker_exit(pid, code != 0, format!("exit code {}", code));
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    self.on_worker_exit(pid, true, format!("signal {}", sig.as_str()));
                }
                Ok(other) => {
                    debug!(status = ?other, "Ignoring child state change");
                }
                Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => {
                    if !self.workers.is_empty() {
                        warn!(tracked = self.workers.len(), "No child processes left");
                        self.workers.clear();
                    }
                    return true;
                }
                Err(e) => {
                    error!(error = %e, "waitpid failed, shutting down");
                    return false;
                }
            }
        }
    }

    fn on_worker_exit(&mut self, pid: Pid, failed: bool, how: String) {
        match self.workers.iter().position(|w| w.pid == pid) {
            Some(pos) => {
                let worker = self.workers.remove(pos);
                if failed {
                    self.failed_exits += 1;
                }
                warn!(
                    pid = pid.as_raw(),
                    worker = worker.index,
                    remaining = self.workers.len(),
                    "Worker exited ({}), not restarting",
                    how
                );
            }
            None => debug!(pid = pid.as_raw(), "Reaped untracked child ({})", how),
        }
    }

    /// Sends SIGTERM to every tracked worker, then reaps each one.
    ///
    /// Workers that already exited are not an error. Returns once the
    /// tracked set is empty.
    pub fn shutdown(&mut self) {
        self.transition(SupervisorState::ShuttingDown);

        for worker in &self.workers {
            match kill(worker.pid, Signal::SIGTERM) {
                Ok(()) => debug!(pid = worker.pid.as_raw(), worker = worker.index, "Sent SIGTERM"),
                Err(Errno::ESRCH) => {
                    debug!(pid = worker.pid.as_raw(), worker = worker.index, "Worker already gone")
                }
                Err(e) => warn!(pid = worker.pid.as_raw(), error = %e, "Failed to signal worker"),
            }
        }

        while let Some(worker) = self.workers.first().copied() {
            match waitpid(worker.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    info!(pid = worker.pid.as_raw(), worker = worker.index, code, "Worker reaped");
                    self.workers.remove(0);
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    info!(pid = worker.pid.as_raw(), worker = worker.index, signal = sig.as_str(), "Worker reaped");
                    self.workers.remove(0);
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => {
                    debug!(pid = worker.pid.as_raw(), "Worker was already reaped");
                    self.workers.remove(0);
                }
                Err(e) => {
                    warn!(pid = worker.pid.as_raw(), error = %e, "Could not reap worker");
                    self.workers.remove(0);
                }
            }
        }

        self.transition(SupervisorState::Terminated);
    }

    fn transition(&mut self, next: SupervisorState) {
        debug_assert!(next >= self.state, "{:?} -> {:?}", self.state, next);
        debug!(from = ?self.state, to = ?next, "Supervisor state change");
        self.state = next;
    }
}

/// Runs the whole server: one supervisor, `worker_count` static-file workers.
pub fn start(settings: &Settings) -> Result<(), SupervisorError> {
    info!(
        workers = settings.worker_count,
        addr = %settings.bind_addr(),
        root = %settings.root_path,
        "Starting master"
    );

    if !std::path::Path::new(&settings.root_path).is_dir() {
        warn!(root = %settings.root_path, "Document root is not a directory");
    }

    let worker_settings = settings.clone();
    let mut supervisor = Supervisor::new(settings.worker_count, move |index| {
        run_worker(index, &worker_settings)
    });

    supervisor.run()?;

    info!("All workers stopped");
    Ok(())
}
