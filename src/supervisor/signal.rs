//! Signal handling for the master process.
//!
//! Handlers only store into atomics and write one byte into the wake pipe.
//! The monitoring loop checks the shutdown flag and reaps children, then
//! sleeps in `poll` on the pipe. A signal that lands between the check and
//! the `poll` leaves a byte behind, so the wakeup is never lost.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Write end of the active wake pipe, -1 when nobody is waiting.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

const SHUTDOWN_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

fn wake() {
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd < 0 {
        return;
    }

    let saved = Errno::last_raw();
    // SAFETY: write(2) is async-signal-safe; a full pipe already holds a wakeup
    unsafe { libc::write(fd, [1u8].as_ptr().cast(), 1) };
    Errno::set_raw(saved);
}

extern "C" fn on_shutdown_signal(_signal: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    wake();
}

extern "C" fn on_child_signal(_signal: libc::c_int) {
    wake();
}

/// Installs the flag-setting handler for SIGINT and SIGTERM.
///
/// No SA_RESTART: a blocking call in the master returns EINTR instead.
pub fn install_shutdown_handlers() -> Result<(), Errno> {
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );

    for signal in SHUTDOWN_SIGNALS {
        // SAFETY: the handler only touches atomics and calls write(2)
        unsafe { sigaction(signal, &action) }?;
    }

    Ok(())
}

/// Makes child exits wake the monitoring loop.
pub fn install_child_handler() -> Result<(), Errno> {
    let action = SigAction::new(
        SigHandler::Handler(on_child_signal),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );

    // SAFETY: the handler only calls write(2)
    unsafe { sigaction(Signal::SIGCHLD, &action) }?;
    Ok(())
}

/// Puts SIGINT, SIGTERM and SIGCHLD back to their default action.
///
/// Called in each forked worker so the master's SIGTERM ends it.
pub fn restore_default_handlers() -> Result<(), Errno> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());

    for signal in SHUTDOWN_SIGNALS.into_iter().chain([Signal::SIGCHLD]) {
        // SAFETY: restoring the default disposition installs no code
        unsafe { sigaction(signal, &action) }?;
    }

    WAKE_FD.store(-1, Ordering::SeqCst);
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Same effect as receiving SIGINT/SIGTERM.
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    wake();
}

/// Clears the flag. Only meaningful before a supervisor starts.
pub fn reset_shutdown() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
}

/// Self-pipe the signal handlers write into while it is alive.
pub struct WakePipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl WakePipe {
    pub fn open() -> Result<Self, Errno> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        WAKE_FD.store(write.as_raw_fd(), Ordering::SeqCst);
        Ok(Self { read, write })
    }

    /// Sleeps until a handler has run since the last call.
    pub fn wait(&self) -> Result<(), Errno> {
        let mut fds = [PollFd::new(self.read.as_fd(), PollFlags::POLLIN)];

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(e),
        }

        self.drain();
        Ok(())
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = nix::unistd::read(self.read.as_raw_fd(), &mut buf) {
            if n < buf.len() {
                break;
            }
        }
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        let _ = WAKE_FD.compare_exchange(
            self.write.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}
