//! Process-per-connection support: forking workers and reaping them.

use super::{serve, Connection, Dialogue};
use std::io;
use std::os::unix::io::RawFd;
use tracing::{debug, warn};

/// Fork a child that services `conn` and exits.
///
/// The child closes its copy of the listening socket, runs the dialogue, and
/// leaves with `_exit(0)` on success or `_exit(1)` on failure so none of the
/// parent's destructors run twice. The parent's copy of `conn` is dropped
/// before this returns.
pub(crate) fn fork_worker<D: Dialogue + ?Sized>(
    dialogue: &D,
    conn: Connection,
    listener_fd: RawFd,
) -> io::Result<libc::pid_t> {
    // SAFETY: the accept loop is the only thread of control in this mode, so
    // the child starts from a consistent copy of the process.
    let pid = unsafe { libc::fork() };

    match pid {
        -1 => Err(io::Error::last_os_error()),
        0 => {
            // SAFETY: the child owns its descriptor table; the listener's
            // `TcpListener` is never dropped here because we `_exit`.
            unsafe { libc::close(listener_fd) };
            let ok = serve(dialogue, conn);
            // SAFETY: terminating the child without unwinding or running
            // atexit handlers inherited from the parent.
            unsafe { libc::_exit(if ok { 0 } else { 1 }) }
        }
        pid => {
            debug!(pid, conn = conn.id(), "Forked worker");
            drop(conn);
            Ok(pid)
        }
    }
}

/// Collect every exited child without blocking. Returns how many were reaped.
pub(crate) fn reap_children() -> usize {
    let mut reaped = 0;

    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid out-pointer for the call.
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        reaped += 1;

        if libc::WIFEXITED(status) {
            let code = libc::WEXITSTATUS(status);
            if code == 0 {
                debug!(pid, "Worker exited");
            } else {
                warn!(pid, code, "Worker exited with failure");
            }
        } else if libc::WIFSIGNALED(status) {
            warn!(pid, signal = libc::WTERMSIG(status), "Worker killed by signal");
        }
    }

    reaped
}
