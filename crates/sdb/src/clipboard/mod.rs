//! One-shot secret hand-off through the X selection
//!
//! [`Clipboard::set_once`] puts a secret in the selection and blocks until
//! exactly one of these happens:
//! - somebody pastes it (the holder process reports a transfer),
//! - a line arrives on the cancellation source (stdin by default),
//! - the holder exits by itself, usually because another client took the
//!   selection.
//!
//! The holder is killed on every path, and the previous selection is put
//! back if the selection is empty afterwards.
//!
//! There is a race that cannot be closed at this layer. Between reading the
//! selection (finding it empty) and restoring the old value, another client
//! can claim the selection, and the restore then overwrites it. The X
//! selection protocol has no acknowledgement of ownership transfer to build on.

mod xsel;

pub use xsel::Xsel;

use crate::input;

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Holder diagnostics that mean a client fetched the selection
const TRANSFER_MARKERS: &[&[u8]] = &[b"(UTF8_STRING)", b"(TEXT)", b"(XSEL_DATA)"];

#[derive(Error, Debug)]
pub enum ClipboardError {
    #[error("{command} failed ({status}): {}", first_line(.output))]
    TransportUnavailable {
        command: String,
        status: String,
        output: String,
    },

    #[error("clipboard I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ClipboardError {
    /// Diagnostic output captured from the transport, if any
    pub fn output(&self) -> &str {
        match self {
            ClipboardError::TransportUnavailable { output, .. } => output,
            ClipboardError::Io(_) => "",
        }
    }
}

fn first_line(output: &str) -> &str {
    output.lines().next().unwrap_or("").trim()
}

/// Access to a selection buffer
pub trait Transport {
    /// Current content. Errors when the buffer is unset or unreachable.
    fn read(&self) -> Result<Vec<u8>, ClipboardError>;

    /// Overwrite the buffer
    fn write(&self, bytes: &[u8]) -> Result<(), ClipboardError>;

    /// Start a process that owns the buffer with `bytes` and reports
    /// transfers on its stderr
    fn hold(&self, bytes: &[u8]) -> Result<Holder, ClipboardError>;
}

/// A running selection owner. Killed and reaped when dropped.
pub struct Holder {
    child: Child,
    stderr: ChildStderr,
    command: String,
}

impl Holder {
    /// Spawn `command`, feed it `bytes` on stdin, and keep its stderr
    pub fn spawn(mut command: Command, bytes: &[u8]) -> Result<Self, ClipboardError> {
        let name = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ClipboardError::TransportUnavailable {
                command: name.clone(),
                status: "not started".to_string(),
                output: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // a holder that died at once shows up as EOF on stderr
            if let Err(e) = stdin.write_all(bytes) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            }
        }

        let stderr = match child.stderr.take() {
            Some(stderr) => stderr,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(io::ErrorKind::Other, "holder stderr unavailable").into());
            }
        };

        Ok(Self {
            child,
            stderr,
            command: name,
        })
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "holder already gone");
        }
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }
}

impl Drop for Holder {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Why a one-shot hand-off ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// A client fetched the content
    Retrieved,
    /// The cancellation source delivered a line, which is consumed
    Cancelled,
    /// The holder exited on its own
    OwnershipLost,
}

/// How [`SecretSink::offer`] hands a secret over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Once,
    Timeout(Duration),
}

/// Anything a secret can be handed to instead of being printed
pub trait SecretSink {
    fn offer(&self, secret: &[u8]) -> Result<(), ClipboardError>;
}

/// A selection buffer plus the cancellation source used while waiting
pub struct Clipboard<T> {
    transport: T,
    cancel: Option<RawFd>,
    mode: Mode,
}

impl<T: Transport> Clipboard<T> {
    /// Cancel on a line from stdin, hand off once
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            cancel: Some(libc::STDIN_FILENO),
            mode: Mode::Once,
        }
    }

    /// Replace the cancellation source. `None` waits for the holder only.
    /// Each hand-off consumes one line from it, so anything else reading
    /// the same descriptor must not buffer ahead (see [`crate::input`]).
    pub fn with_cancel(mut self, fd: Option<RawFd>) -> Self {
        self.cancel = fd;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current content; empty when the buffer is unset or unreachable
    pub fn peek(&self) -> Vec<u8> {
        match self.transport.read() {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "selection unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    /// Overwrite the buffer unconditionally
    pub fn set(&self, bytes: &[u8]) -> Result<(), ClipboardError> {
        self.transport.write(bytes)
    }

    /// Serve `bytes` to exactly one consumer, then restore the old content
    pub fn set_once(&self, bytes: &[u8]) -> Result<Release, ClipboardError> {
        let previous = self.peek();
        let mut holder = self.transport.hold(bytes)?;
        let mut diagnostics = Vec::new();

        let waited = wait_for_release(&mut holder, self.cancel, &mut diagnostics);
        if !matches!(waited, Ok(Release::OwnershipLost)) {
            holder.kill();
        }
        let status = holder.wait()?;
        let release = waited?;

        let clean = match release {
            Release::OwnershipLost => status.success(),
            Release::Retrieved | Release::Cancelled => {
                status.success() || status.signal() == Some(libc::SIGKILL)
            }
        };
        if !clean {
            return Err(ClipboardError::TransportUnavailable {
                command: holder.command.clone(),
                status: describe(status),
                output: String::from_utf8_lossy(&diagnostics).into_owned(),
            });
        }

        // See the module docs for the race in this check
        if !previous.is_empty() && self.peek().is_empty() {
            self.set(&previous)?;
            debug!("previous selection restored");
        }
        info!(?release, "selection hand-off finished");
        Ok(release)
    }

    /// Hold `bytes` for `duration`, then restore the old content unless
    /// someone else has replaced it meanwhile
    pub fn copy_with_timeout(&self, bytes: &[u8], duration: Duration) -> Result<(), ClipboardError> {
        let previous = self.peek();
        self.set(bytes)?;
        std::thread::sleep(duration);
        if self.peek() == bytes {
            self.set(&previous)?;
        } else {
            debug!("selection changed while held, leaving it alone");
        }
        Ok(())
    }
}

impl<T: Transport> SecretSink for Clipboard<T> {
    fn offer(&self, secret: &[u8]) -> Result<(), ClipboardError> {
        match self.mode {
            Mode::Once => self.set_once(secret).map(|_| ()),
            Mode::Timeout(duration) => self.copy_with_timeout(secret, duration),
        }
    }
}

fn describe(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit status {code}"),
        (None, Some(signal)) => format!("killed by signal {signal}"),
        _ => status.to_string(),
    }
}

fn is_transfer_event(line: &[u8]) -> bool {
    TRANSFER_MARKERS
        .iter()
        .any(|marker| line.windows(marker.len()).any(|w| w == *marker))
}

/// Block on the holder's stderr and the cancellation source at once
fn wait_for_release(
    holder: &mut Holder,
    mut cancel: Option<RawFd>,
    diagnostics: &mut Vec<u8>,
) -> Result<Release, ClipboardError> {
    let stderr_fd = holder.stderr.as_raw_fd();
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let mut fds = vec![libc::pollfd {
            fd: stderr_fd,
            events: libc::POLLIN,
            revents: 0,
        }];
        if let Some(fd) = cancel {
            fds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }

        // SAFETY: `fds` is a live, correctly sized array of pollfd
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }

        if let (Some(fd), Some(entry)) = (cancel, fds.get(1)) {
            if entry.revents & libc::POLLNVAL != 0 {
                warn!(fd, "cancellation source is not open, ignoring it");
                cancel = None;
            } else if entry.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                match input::read_line_from(fd) {
                    Ok(0) => {
                        debug!("cancellation source closed");
                        cancel = None;
                    }
                    Ok(_) => return Ok(Release::Cancelled),
                    Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {}
                    Err(e) => {
                        warn!(error = %e, "cancellation source failed, ignoring it");
                        cancel = None;
                    }
                }
            }
        }

        if fds[0].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
            let n = match holder.stderr.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Ok(Release::OwnershipLost);
            }
            diagnostics.extend_from_slice(&buf[..n]);
            pending.extend_from_slice(&buf[..n]);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if is_transfer_event(&line) {
                    return Ok(Release::Retrieved);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FdReader;
    use crate::session::Prompter;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// In-memory selection whose holder is a shell script
    struct Fake {
        buffer: Arc<Mutex<Vec<u8>>>,
        script: &'static str,
        /// What the selection holds once the holder is gone
        after_hold: Vec<u8>,
    }

    impl Fake {
        fn new(script: &'static str) -> Self {
            Self {
                buffer: Arc::new(Mutex::new(Vec::new())),
                script,
                after_hold: Vec::new(),
            }
        }
    }

    impl Transport for Fake {
        fn read(&self) -> Result<Vec<u8>, ClipboardError> {
            Ok(self.buffer.lock().unwrap().clone())
        }

        fn write(&self, bytes: &[u8]) -> Result<(), ClipboardError> {
            *self.buffer.lock().unwrap() = bytes.to_vec();
            Ok(())
        }

        fn hold(&self, bytes: &[u8]) -> Result<Holder, ClipboardError> {
            *self.buffer.lock().unwrap() = self.after_hold.clone();
            let mut command = Command::new("sh");
            command.arg("-c").arg(self.script);
            Holder::spawn(command, bytes)
        }
    }

    const RETRIEVED: &str =
        "cat >/dev/null; echo 'xsel: converting to (UTF8_STRING)' >&2; exec sleep 30";
    const LOST: &str = "cat >/dev/null; echo 'xsel: lost the selection' >&2; exit 0";
    const NO_DISPLAY: &str = r#"cat >/dev/null; echo "xsel: Can't open display: (null)" >&2; exit 1"#;
    const FOREVER: &str = "cat >/dev/null; exec sleep 30";

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds has room for the two descriptors pipe2() writes
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        // SAFETY: the test owns fd
        unsafe { libc::close(fd) };
    }

    #[test]
    fn test_set_once_restores_previous() {
        let clipboard = Clipboard::new(Fake::new(RETRIEVED)).with_cancel(None);
        clipboard.set(b"before").unwrap();

        let release = clipboard.set_once(b"foo").unwrap();
        assert_eq!(release, Release::Retrieved);
        assert_eq!(clipboard.peek(), b"before");
    }

    #[test]
    fn test_set_once_does_not_clobber_new_owner() {
        let mut fake = Fake::new(RETRIEVED);
        fake.after_hold = b"asdf".to_vec();
        let clipboard = Clipboard::new(fake).with_cancel(None);
        clipboard.set(b"before").unwrap();

        clipboard.set_once(b"foo").unwrap();
        assert_eq!(clipboard.peek(), b"asdf");
    }

    #[test]
    fn test_holder_exit_is_ownership_loss() {
        let mut fake = Fake::new(LOST);
        fake.after_hold = b"someone else".to_vec();
        let clipboard = Clipboard::new(fake).with_cancel(None);
        clipboard.set(b"before").unwrap();

        assert_eq!(clipboard.set_once(b"foo").unwrap(), Release::OwnershipLost);
        assert_eq!(clipboard.peek(), b"someone else");
    }

    #[test]
    fn test_failing_holder_reports_output() {
        let clipboard = Clipboard::new(Fake::new(NO_DISPLAY)).with_cancel(None);
        let err = clipboard.set_once(b"a").unwrap_err();
        assert!(matches!(err, ClipboardError::TransportUnavailable { .. }));
        assert!(err.output().starts_with("xsel: Can't open display: "));
        assert!(err.to_string().contains("exit status 1"));
    }

    #[test]
    fn test_cancel_line_releases_promptly() {
        let (read_end, write_end) = pipe();
        // SAFETY: write_end is a valid pipe descriptor
        assert_eq!(unsafe { libc::write(write_end, b"\n".as_ptr() as *const libc::c_void, 1) }, 1);

        let clipboard = Clipboard::new(Fake::new(FOREVER)).with_cancel(Some(read_end));
        let started = Instant::now();
        assert_eq!(clipboard.set_once(b"foo").unwrap(), Release::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));

        close(read_end);
        close(write_end);
    }

    #[test]
    fn test_each_cancel_line_cancels_one_handoff() {
        let (read_end, write_end) = pipe();
        // SAFETY: write_end is a valid pipe descriptor
        assert_eq!(unsafe { libc::write(write_end, b"\n\n".as_ptr() as *const libc::c_void, 2) }, 2);

        let clipboard = Clipboard::new(Fake::new(FOREVER)).with_cancel(Some(read_end));
        let started = Instant::now();
        assert_eq!(clipboard.set_once(b"user").unwrap(), Release::Cancelled);
        assert_eq!(clipboard.set_once(b"pass").unwrap(), Release::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));

        close(read_end);
        close(write_end);
    }

    #[test]
    fn test_cancel_line_after_prompt_is_not_swallowed() {
        let (read_end, write_end) = pipe();
        let typed = b"example.com\n\n";
        // SAFETY: write_end is a valid pipe descriptor
        let n = unsafe { libc::write(write_end, typed.as_ptr() as *const libc::c_void, typed.len()) };
        assert_eq!(n, typed.len() as isize);

        let mut prompter = Prompter::new(FdReader::new(read_end), Vec::new());
        assert_eq!(prompter.prompt("Domain: ", true, false).unwrap(), "example.com");

        let clipboard = Clipboard::new(Fake::new(FOREVER)).with_cancel(Some(read_end));
        let started = Instant::now();
        assert_eq!(clipboard.set_once(b"secret").unwrap(), Release::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));

        close(read_end);
        close(write_end);
    }

    #[test]
    fn test_closed_cancel_source_is_not_a_cancel() {
        let (read_end, write_end) = pipe();
        close(write_end);

        let clipboard = Clipboard::new(Fake::new(
            "cat >/dev/null; sleep 0.2; echo 'got (TEXT)' >&2; exec sleep 30",
        ))
        .with_cancel(Some(read_end));
        assert_eq!(clipboard.set_once(b"foo").unwrap(), Release::Retrieved);

        close(read_end);
    }

    #[test]
    fn test_transfer_markers() {
        assert!(is_transfer_event(b"xsel: ... (UTF8_STRING)\n"));
        assert!(is_transfer_event(b"(TEXT)"));
        assert!(is_transfer_event(b"target is (XSEL_DATA) now\n"));
        assert!(!is_transfer_event(b"xsel: window created\n"));
    }

    #[test]
    fn test_copy_with_timeout_restores() {
        let clipboard = Clipboard::new(Fake::new(FOREVER));
        clipboard.set(b"foobar").unwrap();
        clipboard
            .copy_with_timeout(b"fafa", Duration::from_millis(10))
            .unwrap();
        assert_eq!(clipboard.peek(), b"foobar");
    }

    #[test]
    fn test_copy_with_timeout_respects_new_owner() {
        let fake = Fake::new(FOREVER);
        let buffer = Arc::clone(&fake.buffer);
        let clipboard = Clipboard::new(fake);
        clipboard.set(b"foobar").unwrap();

        let intruder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            *buffer.lock().unwrap() = b"mine".to_vec();
        });
        clipboard
            .copy_with_timeout(b"fafa", Duration::from_millis(300))
            .unwrap();
        intruder.join().unwrap();
        assert_eq!(clipboard.peek(), b"mine");
    }

    #[test]
    fn test_offer_uses_mode() {
        let clipboard = Clipboard::new(Fake::new(FOREVER))
            .with_mode(Mode::Timeout(Duration::from_millis(5)));
        clipboard.set(b"old").unwrap();
        clipboard.offer(b"secret").unwrap();
        assert_eq!(clipboard.peek(), b"old");
    }
}
