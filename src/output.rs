//! Capture of a supervised process's standard streams.
//!
//! Stream drainers fan each line out to every attached sink, so a bounded
//! in-memory buffer for assertions and a `tracing` forwarder for diagnostics
//! can observe the same process concurrently.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::debug;

/// Consumer of a supervised process's standard-stream lines.
///
/// Attachment is fan-out: every attached sink receives every line, in order.
pub trait Output: Send + Sync {
    /// Accepts one line of output, without its trailing newline.
    fn accept(&self, line: &str);
}

/// Bounded, thread-safe capture buffer with oldest-first eviction.
///
/// Clones share one underlying buffer, so the handle held by a test observes
/// the bytes appended by the drainer threads. Once the configured maximum is
/// exceeded the oldest bytes are evicted, keeping the most recent output
/// retrievable.
#[derive(Debug, Clone)]
pub struct BufferedOutput {
    max_bytes: usize,
    buffer: Arc<Mutex<VecDeque<u8>>>,
}

impl BufferedOutput {
    /// Creates a buffer retaining at most `max_bytes` of the newest output.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Appends raw bytes, evicting the oldest bytes beyond the capacity.
    pub fn append(&self, bytes: &[u8]) {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buffer.extend(bytes.iter().copied());
        while buffer.len() > self.max_bytes {
            buffer.pop_front();
        }
    }

    /// Returns a snapshot of the retained bytes, oldest first.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Returns the number of retained bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Returns `true` when the retained output contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        String::from_utf8_lossy(&self.contents()).contains(needle)
    }
}

impl fmt::Display for BufferedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.contents()))
    }
}

impl Output for BufferedOutput {
    fn accept(&self, line: &str) {
        self.append(line.as_bytes());
        self.append(b"\n");
    }
}

/// Forwards each captured line to the `tracing` subscriber at debug level.
#[derive(Debug, Clone)]
pub struct TraceOutput {
    source: &'static str,
}

impl TraceOutput {
    /// Creates a forwarder tagging each line with `source`.
    #[must_use]
    pub const fn new(source: &'static str) -> Self { Self { source } }
}

impl Output for TraceOutput {
    fn accept(&self, line: &str) { debug!(source = self.source, "{line}"); }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{BufferedOutput, Output};

    #[test]
    fn retains_everything_under_capacity() {
        let output = BufferedOutput::new(64);
        output.accept("hello");
        output.accept("world");
        assert_eq!(output.to_string(), "hello\nworld\n");
    }

    #[test]
    fn evicts_oldest_bytes_first() {
        let output = BufferedOutput::new(4);
        output.append(b"abcdef");
        assert_eq!(output.contents(), b"cdef");
        output.append(b"gh");
        assert_eq!(output.contents(), b"efgh");
    }

    #[test]
    fn clones_share_one_buffer() {
        let output = BufferedOutput::new(64);
        let observer = output.clone();
        output.accept("ready");
        assert!(observer.contains("ready"));
    }

    proptest! {
        #[test]
        fn keeps_exactly_the_newest_bytes(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..24),
            max_bytes in 0_usize..48,
        ) {
            let output = BufferedOutput::new(max_bytes);
            let mut all: Vec<u8> = Vec::new();
            for chunk in &chunks {
                output.append(chunk);
                all.extend_from_slice(chunk);
            }
            let keep = all.len().min(max_bytes);
            let expected = all.split_off(all.len() - keep);
            prop_assert_eq!(output.contents(), expected);
        }
    }
}
