//! Unbuffered line input on a raw file descriptor
//!
//! The prompter and the clipboard cancellation source both read stdin. If
//! either kept a userspace buffer, lines typed ahead would be hidden from
//! the other one's `poll`. [`FdReader`] never reads past the byte it hands
//! out, so whatever it has not consumed stays in the kernel.

use std::io::{self, BufRead, Read};
use std::os::unix::io::RawFd;

/// Byte-at-a-time reader over a descriptor it does not own
pub struct FdReader {
    fd: RawFd,
    byte: [u8; 1],
    filled: bool,
}

impl FdReader {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            byte: [0],
            filled: false,
        }
    }

    pub fn stdin() -> Self {
        Self::new(libc::STDIN_FILENO)
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Read for FdReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(first) = buf.first_mut() else {
            return Ok(0);
        };
        if self.filled {
            *first = self.byte[0];
            self.filled = false;
            return Ok(1);
        }
        read_fd(self.fd, &mut buf[..1])
    }
}

impl BufRead for FdReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if !self.filled {
            if read_fd(self.fd, &mut self.byte)? == 0 {
                return Ok(&[]);
            }
            self.filled = true;
        }
        Ok(&self.byte)
    }

    fn consume(&mut self, amt: usize) {
        if amt > 0 {
            self.filled = false;
        }
    }
}

/// Consume exactly one line from `fd`. `Ok(0)` means end of input.
pub fn read_line_from(fd: RawFd) -> io::Result<usize> {
    let mut line = Vec::new();
    FdReader::new(fd).read_until(b'\n', &mut line)
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `buf` is valid for writes of its full length
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_with(content: &[u8]) -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds has room for the two descriptors pipe2() writes
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);
        // SAFETY: fds[1] is the write end just created
        let n = unsafe { libc::write(fds[1], content.as_ptr() as *const libc::c_void, content.len()) };
        assert_eq!(n, content.len() as isize);
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        // SAFETY: the test owns fd
        unsafe { libc::close(fd) };
    }

    #[test]
    fn test_read_line_leaves_the_rest() {
        let (read_end, write_end) = pipe_with(b"one\ntwo\n");
        close(write_end);

        let mut reader = FdReader::new(read_end);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "one\n");

        let mut rest = [0u8; 16];
        let n = read_fd(read_end, &mut rest).unwrap();
        assert_eq!(&rest[..n], b"two\n");

        close(read_end);
    }

    #[test]
    fn test_read_line_from_counts_lines() {
        let (read_end, write_end) = pipe_with(b"\n\nlast");
        close(write_end);

        assert_eq!(read_line_from(read_end).unwrap(), 1);
        assert_eq!(read_line_from(read_end).unwrap(), 1);
        assert_eq!(read_line_from(read_end).unwrap(), 4);
        assert_eq!(read_line_from(read_end).unwrap(), 0);

        close(read_end);
    }

    #[test]
    fn test_read_returns_one_byte() {
        let (read_end, write_end) = pipe_with(b"abc");
        close(write_end);

        let mut reader = FdReader::new(read_end);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'a');
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "bc");

        close(read_end);
    }
}
