use crate::input::InputBuffer;
use std::fs::File;
use std::io::{self, Read, Stdin};
use std::path::Path;
use std::ptr::{self, NonNull};
use thiserror::Error;

/// Errors raised while acquiring a test case.
///
/// Malformed or empty input is never an error; only the transport can fail.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Reading standard input or an input file failed.
    #[error("Failed to read test case: {0}")]
    Io(#[from] io::Error),

    /// The engine advertised a shared-memory id that is not an integer.
    #[error("Invalid shared-memory id {0:?}")]
    InvalidShmId(String),

    /// `shmat`/`shmctl` refused the advertised segment.
    #[error("Failed to attach shared-memory segment {id}: {source}")]
    Attach { id: i32, source: io::Error },

    /// The segment cannot even hold the length header.
    #[error("Shared-memory segment {id} is too small ({size} bytes)")]
    SegmentTooSmall { id: i32, size: usize },
}

/// Produces one candidate input per iteration.
///
/// The returned slice borrows `arena` and is only valid until the next call.
/// `Ok(None)` signals end-of-input, which is a normal terminal condition.
pub trait BufferSource {
    fn acquire<'a>(&mut self, arena: &'a mut InputBuffer)
    -> Result<Option<&'a [u8]>, SourceError>;
}

/// Single-use source that reads one test case from a stream.
///
/// Used when no engine is attached. After the first call every further call
/// reports end-of-input without touching the reader again.
#[derive(Debug)]
pub struct OneShotSource<R: Read> {
    reader: R,
    exhausted: bool,
}

impl<R: Read> OneShotSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            exhausted: false,
        }
    }
}

impl OneShotSource<Stdin> {
    pub fn stdin() -> Self {
        Self::new(io::stdin())
    }
}

impl OneShotSource<File> {
    /// Reads the test case from a file instead of stdin (the `@@` convention).
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> BufferSource for OneShotSource<R> {
    fn acquire<'a>(
        &mut self,
        arena: &'a mut InputBuffer,
    ) -> Result<Option<&'a [u8]>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        self.exhausted = true;
        let bytes = arena.fill_from_reader(&mut self.reader)?;
        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(bytes))
        }
    }
}

const LEN_HEADER: usize = std::mem::size_of::<u32>();

/// An attached System V shared-memory test-case segment.
///
/// Layout, as written by the engine: a native-endian `u32` test-case length
/// followed by the test-case bytes.
#[derive(Debug)]
pub struct ShmChannel {
    id: i32,
    base: NonNull<u8>,
    segment_len: usize,
}

impl ShmChannel {
    /// Parses the id found in the engine's environment variable and attaches it.
    pub fn from_env_value(value: &str) -> Result<Self, SourceError> {
        let id = value
            .trim()
            .parse::<i32>()
            .map_err(|_| SourceError::InvalidShmId(value.to_string()))?;
        Self::attach(id)
    }

    pub fn attach(id: i32) -> Result<Self, SourceError> {
        // SAFETY: IPC_STAT only writes into the zeroed descriptor we own.
        let mut descriptor: libc::shmid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut descriptor) } == -1 {
            return Err(SourceError::Attach {
                id,
                source: io::Error::last_os_error(),
            });
        }
        let segment_len = descriptor.shm_segsz as usize;
        if segment_len < LEN_HEADER {
            return Err(SourceError::SegmentTooSmall {
                id,
                size: segment_len,
            });
        }

        // SAFETY: a null address lets the kernel pick the mapping; failure is
        // reported as (void*)-1 and checked below.
        let raw = unsafe { libc::shmat(id, ptr::null(), libc::SHM_RDONLY) };
        if raw as isize == -1 {
            return Err(SourceError::Attach {
                id,
                source: io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(raw.cast::<u8>()).ok_or_else(|| SourceError::Attach {
            id,
            source: io::Error::other("shmat returned a null mapping"),
        })?;

        Ok(Self {
            id,
            base,
            segment_len,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// The engine's current test case, clamped to the mapped segment.
    pub fn testcase(&self) -> &[u8] {
        // SAFETY: the mapping is page aligned and at least LEN_HEADER bytes
        // long (checked in `attach`). The engine rewrites it between
        // iterations, hence the volatile read.
        let advertised = unsafe { ptr::read_volatile(self.base.as_ptr().cast::<u32>()) } as usize;
        let len = advertised.min(self.segment_len - LEN_HEADER);
        // SAFETY: `LEN_HEADER + len <= segment_len`, all inside the mapping.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(LEN_HEADER), len) }
    }
}

impl Drop for ShmChannel {
    fn drop(&mut self) {
        // SAFETY: `base` came from a successful shmat and is detached once.
        unsafe {
            libc::shmdt(self.base.as_ptr().cast::<libc::c_void>());
        }
    }
}

/// Persistent-mode source fed by the engine through an [`ShmChannel`].
///
/// The first case is already in the segment when the process starts. For
/// every later case the process stops itself; its supervisor (the fork server
/// in [`crate::engine`]) loads the next case and resumes it. There is no
/// timeout here: a hang is the engine's to kill.
#[derive(Debug)]
pub struct PersistentSource {
    channel: ShmChannel,
    started: bool,
}

impl PersistentSource {
    pub fn new(channel: ShmChannel) -> Self {
        Self {
            channel,
            started: false,
        }
    }

    fn wait_for_engine(&self) {
        // SAFETY: raising a signal on ourselves has no memory-safety impact.
        unsafe {
            libc::raise(libc::SIGSTOP);
        }
    }
}

impl BufferSource for PersistentSource {
    fn acquire<'a>(
        &mut self,
        arena: &'a mut InputBuffer,
    ) -> Result<Option<&'a [u8]>, SourceError> {
        if self.started {
            self.wait_for_engine();
        }
        self.started = true;
        Ok(Some(arena.fill_from_slice(self.channel.testcase())))
    }
}

/// Every source the harness binary can be started with.
#[derive(Debug)]
pub enum HarnessSource {
    Persistent(PersistentSource),
    Stdin(OneShotSource<Stdin>),
    File(OneShotSource<File>),
}

impl BufferSource for HarnessSource {
    fn acquire<'a>(
        &mut self,
        arena: &'a mut InputBuffer,
    ) -> Result<Option<&'a [u8]>, SourceError> {
        match self {
            HarnessSource::Persistent(source) => source.acquire(arena),
            HarnessSource::Stdin(source) => source.acquire(arena),
            HarnessSource::File(source) => source.acquire(arena),
        }
    }
}
