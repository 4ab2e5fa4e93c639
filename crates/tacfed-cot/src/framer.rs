//! Terminator-delimited stream framing.

use crate::error::CotError;

/// The fixed closing marker that terminates every CoT document.
pub const EVENT_CLOSE_MARKER: &[u8] = b"</event>";

/// Default bound on the accumulation buffer. A peer that streams this
/// much without ever closing an event is sending garbage.
const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;

/// Splits a raw byte stream into discrete CoT documents.
///
/// The wire carries documents back-to-back with no length prefix, so the
/// only way to find a boundary is the `</event>` marker. A single read
/// may contain zero, one, or many complete documents, and a document may
/// span many reads; the framer buffers partial input across calls.
///
/// ```
/// use tacfed_cot::CotFramer;
///
/// let mut framer = CotFramer::new();
/// framer.extend(b"<event uid='a'></event><event uid=");
/// assert!(framer.next_document().unwrap().is_some());
/// assert!(framer.next_document().unwrap().is_none());
/// framer.extend(b"'b'></event>");
/// assert!(framer.next_document().unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct CotFramer {
    buf: Vec<u8>,
    max_buffer: usize,
}

impl Default for CotFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl CotFramer {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_buffer,
        }
    }

    /// Appends newly read bytes to the accumulation buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete document, including its closing marker.
    ///
    /// Returns `Ok(None)` when no complete document is buffered. Call
    /// repeatedly after each [`extend`](Self::extend) until it returns
    /// `None` — one read may have carried several documents.
    ///
    /// # Errors
    ///
    /// Returns [`CotError::BufferOverflow`] and discards the buffer when
    /// it exceeds the bound without containing a marker, so one garbage
    /// stream cannot pin memory or poison later documents.
    pub fn next_document(&mut self) -> Result<Option<Vec<u8>>, CotError> {
        match find_marker(&self.buf) {
            Some(end) => {
                let rest = self.buf.split_off(end);
                let doc = std::mem::replace(&mut self.buf, rest);
                Ok(Some(doc))
            }
            None => {
                if self.buf.len() > self.max_buffer {
                    let buffered = self.buf.len();
                    self.buf.clear();
                    return Err(CotError::BufferOverflow {
                        buffered,
                        max: self.max_buffer,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Number of bytes currently buffered without a complete document.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Returns the index one past the end of the first closing marker.
fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(EVENT_CLOSE_MARKER.len())
        .position(|window| window == EVENT_CLOSE_MARKER)
        .map(|start| start + EVENT_CLOSE_MARKER.len())
}
