use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::interfaces::{OutputChunk, OutputStream};
use crate::logger::CAPTURE_TARGET;
use crate::prelude::*;

/// How long a capture thread blocks in `poll` before looking at the closed flag again.
pub(super) const POLL_TICK: Duration = Duration::from_millis(20);

/// Reads performed after the streams were closed, so a process flooding its pipe cannot keep a
/// capture thread alive.
const MAX_READS_AFTER_CLOSE: usize = 256;

#[derive(Default)]
struct BufferState {
    lines: Vec<String>,
    sealed: bool,
    error: Option<String>,
}

/// Append-only line buffer of one output stream, written by a single capture thread.
#[derive(Default)]
pub(super) struct OutputBuffer {
    state: RwLock<BufferState>,
}

impl OutputBuffer {
    fn read(&self) -> RwLockReadGuard<'_, BufferState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BufferState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, line: String) {
        let mut state = self.write();
        if !state.sealed {
            state.lines.push(line);
        }
    }

    fn set_error(&self, error: String) {
        let mut state = self.write();
        if !state.sealed && state.error.is_none() {
            state.error = Some(error);
        }
    }

    /// No line is accepted after this.
    pub(super) fn seal(&self) {
        self.write().sealed = true;
    }

    pub(super) fn lines(&self) -> Vec<String> {
        self.read().lines.clone()
    }

    pub(super) fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    pub(super) fn chunk_from(&self, offset: usize) -> OutputChunk {
        let state = self.read();
        let start = offset.min(state.lines.len());
        OutputChunk {
            lines: state.lines[start..].to_vec(),
            next_offset: state.lines.len(),
            sealed: state.sealed,
        }
    }
}

/// Start the thread copying `reader` into `buffer` line by line.
///
/// The thread stops at end of file, on a read error (kept on the buffer), or once `closed` is
/// set and nothing is left to read.
pub(super) fn spawn_capture<R>(
    process_name: &str,
    stream: OutputStream,
    reader: R,
    buffer: Arc<OutputBuffer>,
    closed: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + AsRawFd + Send + 'static,
{
    let label = format!("{process_name}:{stream}");
    thread::Builder::new()
        .name(format!("capture-{label}"))
        .spawn(move || {
            if let Err(e) = capture_loop(reader, &buffer, &closed, &label) {
                debug!("Capture of {label} failed: {e}");
                buffer.set_error(format!("Failed to capture {stream}: {e}"));
            }
        })
}

fn capture_loop<R: Read + AsRawFd>(
    mut reader: R,
    buffer: &OutputBuffer,
    closed: &AtomicBool,
    label: &str,
) -> io::Result<()> {
    let fd = reader.as_raw_fd();
    let mut chunk = [0u8; 4096];
    let mut pending = Vec::new();
    let mut reads_after_close = 0;

    let result = loop {
        let is_closed = closed.load(Ordering::Acquire);
        if is_closed {
            reads_after_close += 1;
            if reads_after_close > MAX_READS_AFTER_CLOSE {
                break Ok(());
            }
        }

        match wait_readable(fd, POLL_TICK) {
            Ok(true) => {}
            Ok(false) if is_closed => break Ok(()),
            Ok(false) => continue,
            Err(e) => break Err(e),
        }

        match reader.read(&mut chunk) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                flush_complete_lines(&mut pending, buffer, label);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
    };

    // A last line without its newline still counts
    if !pending.is_empty() {
        push_line(&pending, buffer, label);
    }
    result
}

fn flush_complete_lines(pending: &mut Vec<u8>, buffer: &OutputBuffer, label: &str) {
    let Some(last_newline) = pending.iter().rposition(|&b| b == b'\n') else {
        return;
    };
    for line in pending[..last_newline].split(|&b| b == b'\n') {
        push_line(line, buffer, label);
    }
    pending.drain(..=last_newline);
}

fn push_line(raw: &[u8], buffer: &OutputBuffer, label: &str) {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw).into_owned();
    trace!(target: CAPTURE_TARGET, "[{label}] {line}");
    buffer.push(line);
}

/// Wait until `fd` has data, reached end of file or failed. `Ok(false)` when `timeout` elapsed.
fn wait_readable(fd: i32, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::Interrupted => Ok(false),
            _ => Err(err),
        };
    }
    if ret == 0 {
        return Ok(false);
    }
    if pollfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "file descriptor is not open",
        ));
    }
    // POLLHUP and POLLERR are reported through the following read
    Ok(true)
}
