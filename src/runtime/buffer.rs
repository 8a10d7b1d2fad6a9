//! Scratch read buffer shared by all sessions of one event loop.
//!
//! The loop is single-threaded and services one session at a time, so a
//! single buffer is borrowed for the duration of each read/transform/write
//! cycle. Nothing is retained in it across calls.

/// Default chunk size: one read never returns more than this many bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4095;

/// Upper bound accepted for a configured chunk size.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Fixed-size buffer for one read at a time.
pub struct ScratchBuffer {
    buf: Vec<u8>,
}

impl ScratchBuffer {
    /// Create a buffer holding at most `chunk_size` bytes.
    ///
    /// The size is clamped to `1..=MAX_CHUNK_SIZE`; configuration
    /// validation rejects values outside that range before we get here.
    pub fn new(chunk_size: usize) -> Self {
        let size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        Self {
            buf: vec![0u8; size],
        }
    }

    /// Maximum number of bytes a single read can fill.
    pub fn chunk_size(&self) -> usize {
        self.buf.len()
    }

    /// The whole buffer, ready to be read into.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Default for ScratchBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_size() {
        let mut buf = ScratchBuffer::default();
        assert_eq!(buf.chunk_size(), 4095);
        assert_eq!(buf.as_mut_slice().len(), 4095);
    }

    #[test]
    fn test_chunk_size_is_clamped() {
        assert_eq!(ScratchBuffer::new(0).chunk_size(), 1);
        assert_eq!(ScratchBuffer::new(1 << 20).chunk_size(), MAX_CHUNK_SIZE);
        assert_eq!(ScratchBuffer::new(512).chunk_size(), 512);
    }
}
