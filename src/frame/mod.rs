//! Frame source contract.
//!
//! # Data Flow
//! ```text
//! raw bytes (one read event)
//!     → FrameSource::feed (append, continue in-progress frames)
//!     → FrameSource::frames (ordered sequence, complete + in-progress)
//!     → dispatcher delivers complete frames and removes them
//! ```
//!
//! # Design Decisions
//! - The dispatcher only sees `is_complete` and `classification`
//! - Grammar errors are reported as `FrameError` and end the connection
//! - A frame still present in the sequence has not been delivered yet

pub mod http;

pub use http::{HttpFrame, HttpFrameSource};

/// Whether a frame travels towards the server as a request or back as a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Request,
    Response,
}

impl FrameKind {
    /// Label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Request => "request",
            FrameKind::Response => "response",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded protocol unit.
pub trait Frame: Send + 'static {
    /// True once the decoder has gathered the full message.
    fn is_complete(&self) -> bool;

    /// Method-like tag. Empty for responses.
    fn classification(&self) -> &str;

    /// Route a frame by its classification: empty means response.
    fn kind(&self) -> FrameKind {
        if self.classification().is_empty() {
            FrameKind::Response
        } else {
            FrameKind::Request
        }
    }
}

/// Incremental decoder owning the ordered frame sequence of one connection.
pub trait FrameSource: Send + 'static {
    type Frame: Frame;

    /// Append bytes to the stream. May push new frames and advance in-progress ones.
    fn feed(&mut self, bytes: &[u8]) -> Result<(), FrameError>;

    /// Frames in arrival order.
    fn frames(&self) -> &[Self::Frame];

    /// Mutable access for the dispatcher to drop delivered frames.
    fn frames_mut(&mut self) -> &mut Vec<Self::Frame>;
}

/// Error type for frame decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed start line or headers: {0}")]
    Malformed(String),

    #[error("too many headers (limit {limit})")]
    TooManyHeaders { limit: usize },

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("invalid chunked body: {0}")]
    InvalidChunk(String),

    #[error("message head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("message body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(&'static str);

    impl Frame for Tagged {
        fn is_complete(&self) -> bool {
            true
        }

        fn classification(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn empty_classification_is_response() {
        assert_eq!(Tagged("").kind(), FrameKind::Response);
        assert_eq!(Tagged("GET").kind(), FrameKind::Request);
        assert_eq!(Tagged("M-SEARCH").kind(), FrameKind::Request);
    }
}
