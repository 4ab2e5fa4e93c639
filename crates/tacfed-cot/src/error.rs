//! Error types for the CoT codec.

/// Errors that can occur while framing or translating CoT documents.
#[derive(Debug, thiserror::Error)]
pub enum CotError {
    /// The accumulation buffer grew past its bound without a terminator.
    #[error("frame buffer overflow: {buffered} bytes without a closing marker (max {max})")]
    BufferOverflow { buffered: usize, max: usize },

    /// The document is not valid UTF-8.
    #[error("document is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The document is not a well-formed CoT event.
    #[error("malformed CoT document: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// Serializing an event to wire bytes failed.
    #[error("failed to serialize CoT event: {0}")]
    Serialize(#[from] std::io::Error),

    /// The XML writer rejected an event.
    #[error("xml writer error: {0}")]
    Writer(#[from] quick_xml::Error),

    /// The document parsed but is missing a field the bridge requires.
    #[error("CoT document missing required field: {0}")]
    MissingField(&'static str),
}
