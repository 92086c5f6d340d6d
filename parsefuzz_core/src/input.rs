use std::io::{self, Read};

/// Default per-iteration input capacity: 1 MiB.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1 << 20;

/// Fixed-capacity scratch storage for the current test case.
///
/// The iteration loop owns exactly one `InputBuffer` for the whole process and
/// lends it to the buffer source and then to the parser adapter for a single
/// iteration. Its contents are cleared before every refill, so nothing written
/// by one iteration is visible to the next.
///
/// Inputs longer than the capacity are truncated, never rejected.
#[derive(Debug)]
pub struct InputBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl InputBuffer {
    /// Allocates the full capacity up front so refills never reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drops the previous test case without giving back the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Replaces the contents with at most `capacity` bytes read from `reader`.
    ///
    /// Reads until end of stream or until the buffer is full, whichever comes
    /// first. Bytes past the capacity are left unread in `reader`.
    pub fn fill_from_reader<R: Read>(&mut self, reader: &mut R) -> io::Result<&[u8]> {
        self.data.clear();
        reader
            .take(self.capacity as u64)
            .read_to_end(&mut self.data)?;
        Ok(&self.data)
    }

    /// Replaces the contents with the first `capacity` bytes of `bytes`.
    pub fn fill_from_slice(&mut self, bytes: &[u8]) -> &[u8] {
        self.data.clear();
        let keep = bytes.len().min(self.capacity);
        self.data.extend_from_slice(&bytes[..keep]);
        &self.data
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}
