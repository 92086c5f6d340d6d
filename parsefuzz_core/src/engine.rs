//! Fork-server side of the engine control protocol.
//!
//! An engine that wants persistent execution hands the harness two pipes on
//! fixed descriptors: requests arrive on [`CONTROL_FD`] and replies go out on
//! [`STATUS_FD`]. The harness announces itself with a hello word, the engine
//! confirms it will deliver cases over shared memory, and from then on every
//! request either resumes the stopped harness child or forks a fresh one.
//! Each reply pair is the child's pid followed by its `waitpid` status.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use thiserror::Error;
use tracing::debug;

/// Descriptor the engine writes requests to.
pub const CONTROL_FD: RawFd = 198;
/// Descriptor the engine reads replies from.
pub const STATUS_FD: RawFd = 199;

const FS_OPT_ENABLED: u32 = 0x8000_0001;
const FS_OPT_SHDMEM_FUZZ: u32 = 0x0100_0000;

/// Options-aware hello asking for test cases over shared memory. The engine
/// must echo both flags back.
pub const HELLO: u32 = FS_OPT_ENABLED | FS_OPT_SHDMEM_FUZZ;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine descriptor {0} is not open")]
    NotConnected(RawFd),
    #[error("Engine declined shared-memory test cases (reply {0:#010x})")]
    Declined(u32),
    #[error("Engine control channel failed: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to fork harness child: {0}")]
    Fork(io::Error),
}

pub fn fd_is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only queries the descriptor table.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// A live, handshaken link to the engine.
#[derive(Debug)]
pub struct ForkServer {
    control: File,
    status: File,
}

impl ForkServer {
    /// Takes over the engine's descriptors and performs the handshake.
    ///
    /// Both descriptors must already be open; a process started without an
    /// engine gets [`EngineError::NotConnected`] and nothing is written.
    pub fn connect() -> Result<Self, EngineError> {
        for fd in [CONTROL_FD, STATUS_FD] {
            if !fd_is_open(fd) {
                return Err(EngineError::NotConnected(fd));
            }
        }
        // SAFETY: both descriptors are open and reserved for the engine;
        // nothing else in the process uses them.
        let (control, status) =
            unsafe { (File::from_raw_fd(CONTROL_FD), File::from_raw_fd(STATUS_FD)) };
        Self::handshake(control, status)
    }

    pub fn handshake(mut control: File, mut status: File) -> Result<Self, EngineError> {
        status.write_all(&HELLO.to_ne_bytes())?;
        let reply = read_word(&mut control)?;
        if reply & HELLO != HELLO {
            return Err(EngineError::Declined(reply));
        }
        debug!("engine handshake complete");
        Ok(Self { control, status })
    }

    /// Serves engine requests until the engine closes the control channel.
    ///
    /// A child that stopped itself after a case is resumed with `SIGCONT` on
    /// the next request; otherwise a new child is forked and runs `harness`,
    /// exiting with its return value. A child still stopped when the engine
    /// leaves is killed.
    pub fn serve<F>(mut self, mut harness: F) -> Result<(), EngineError>
    where
        F: FnMut() -> i32,
    {
        let mut stopped: Option<libc::pid_t> = None;
        loop {
            let previous_killed = match read_word(&mut self.control) {
                Ok(word) => word != 0,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("engine closed the control channel");
                    if let Some(pid) = stopped {
                        terminate(pid);
                    }
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            // The engine already killed the stopped child on a timeout.
            if previous_killed {
                if let Some(pid) = stopped.take() {
                    wait_for(pid)?;
                }
            }

            let pid = match stopped {
                Some(pid) => {
                    // SAFETY: `pid` is our own stopped child.
                    unsafe { libc::kill(pid, libc::SIGCONT) };
                    pid
                }
                None => self.spawn(&mut harness)?,
            };
            self.status.write_all(&pid.to_ne_bytes())?;

            let wait_status = wait_for(pid)?;
            stopped = libc::WIFSTOPPED(wait_status).then_some(pid);
            self.status.write_all(&wait_status.to_ne_bytes())?;
        }
    }

    fn spawn<F>(&self, harness: &mut F) -> Result<libc::pid_t, EngineError>
    where
        F: FnMut() -> i32,
    {
        // SAFETY: the child only closes the control descriptors, runs the
        // harness and leaves through `_exit`.
        match unsafe { libc::fork() } {
            -1 => Err(EngineError::Fork(io::Error::last_os_error())),
            0 => unsafe {
                libc::close(self.control.as_raw_fd());
                libc::close(self.status.as_raw_fd());
                libc::_exit(harness())
            },
            pid => Ok(pid),
        }
    }
}

fn read_word(file: &mut File) -> io::Result<u32> {
    let mut word = [0u8; 4];
    file.read_exact(&mut word)?;
    Ok(u32::from_ne_bytes(word))
}

fn wait_for(pid: libc::pid_t) -> io::Result<libc::c_int> {
    let mut status = 0;
    loop {
        // SAFETY: `status` is a valid out-pointer for the duration of the call.
        if unsafe { libc::waitpid(pid, &mut status, libc::WUNTRACED) } != -1 {
            return Ok(status);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn terminate(pid: libc::pid_t) {
    // SAFETY: `pid` is our own child; reaping it avoids a zombie.
    unsafe {
        libc::kill(pid, libc::SIGKILL);
        libc::waitpid(pid, std::ptr::null_mut(), 0);
    }
}
