use log::{debug, warn};
use std::collections::VecDeque;
use std::io::{self, IsTerminal};
use std::os::unix::io::{AsRawFd, RawFd};

/// Non-blocking source of host key presses.
pub trait KeySource {
    /// Next pending key, if any. Must return immediately.
    fn poll_key(&mut self) -> Option<u8>;
}

/// No host input.
pub struct NoKeys;

impl KeySource for NoKeys {
    fn poll_key(&mut self) -> Option<u8> {
        None
    }
}

/// Keys fed up front.
impl KeySource for VecDeque<u8> {
    fn poll_key(&mut self) -> Option<u8> {
        self.pop_front()
    }
}

/// Reads stdin one byte at a time without blocking. A TTY is switched to
/// cbreak mode (no echo, no line buffering, signals still delivered) for the
/// lifetime of the reader. The fd itself stays blocking; readiness is checked
/// with a zero-timeout `poll` before each read.
pub struct StdinKeys {
    fd: RawFd,
    saved: Option<libc::termios>,
    closed: bool,
}

impl StdinKeys {
    pub fn new(raw_terminal: bool) -> Self {
        let stdin = io::stdin();
        let fd = stdin.as_raw_fd();
        let saved = if raw_terminal && stdin.is_terminal() {
            match enter_cbreak(fd) {
                Ok(saved) => Some(saved),
                Err(e) => {
                    warn!("cannot put terminal in cbreak mode: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self { fd, saved, closed: false }
    }

    fn readable(&self) -> io::Result<bool> {
        let mut pfd = libc::pollfd { fd: self.fd, events: libc::POLLIN, revents: 0 };
        // SAFETY: one valid pollfd, zero timeout.
        let n = unsafe { libc::poll(&mut pfd, 1, 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0)
    }
}

/// Clear ICANON and ECHO only; ISIG stays set so Ctrl-C still stops the monitor.
fn enter_cbreak(fd: RawFd) -> io::Result<libc::termios> {
    // SAFETY: termios is plain data and tcgetattr fills it in.
    let mut saved: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: fd is a TTY and `saved` is a valid out pointer.
    if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut cbreak = saved;
    cbreak.c_lflag &= !(libc::ICANON | libc::ECHO);
    cbreak.c_cc[libc::VMIN] = 0;
    cbreak.c_cc[libc::VTIME] = 0;
    // SAFETY: applying a copy of the attributes read above.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &cbreak) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(saved)
}

impl KeySource for StdinKeys {
    fn poll_key(&mut self) -> Option<u8> {
        if self.closed {
            return None;
        }
        match self.readable() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return None,
            Err(e) => {
                warn!("stdin poll failed, keyboard input disabled: {}", e);
                self.closed = true;
                return None;
            }
        }
        let mut byte = [0u8; 1];
        // SAFETY: reading at most one byte into a local buffer.
        let n = unsafe { libc::read(self.fd, byte.as_mut_ptr().cast(), 1) };
        match n {
            0 => {
                debug!("stdin closed");
                self.closed = true;
                None
            }
            1 => Some(byte[0]),
            _ => {
                let e = io::Error::last_os_error();
                match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => None,
                    _ => {
                        warn!("stdin read failed, keyboard input disabled: {}", e);
                        self.closed = true;
                        None
                    }
                }
            }
        }
    }
}

impl Drop for StdinKeys {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            // SAFETY: restoring the attributes saved in `new`.
            unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &saved) };
        }
    }
}
