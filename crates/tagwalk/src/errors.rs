//! Error types for tagwalk

use thiserror::Error;

/// Result type for tagwalk operations
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur while parsing, mutating or serializing a tag
#[derive(Debug, Error)]
pub enum Error {
    /// The descriptor tree is malformed: a required key is missing or a
    /// size/pointer specification cannot be interpreted.
    #[error("schema error in '{block}' at '{attr}': {message}")]
    Schema {
        /// Name of the containing Block's descriptor
        block: String,
        /// Name of the offending attribute
        attr: String,
        /// What is wrong
        message: String,
    },

    /// A size change was refused, e.g. growing a field whose descriptor
    /// declares a literal size. Retry after replacing the descriptor.
    #[error("cannot resize '{attr}' in '{block}': {message}")]
    SizeEditRejected {
        /// Name of the containing Block's descriptor
        block: String,
        /// Name of the attribute being resized
        attr: String,
        /// Why the edit was refused
        message: String,
    },

    /// The byte source lacks an operation the descriptor needs
    #[error("byte source does not support '{0}'")]
    Capability(&'static str),

    /// Bytes could not be interpreted under the declared encoding or table
    #[error("decode error at offset {offset}: {message}")]
    Decode {
        /// Absolute byte offset of the field
        offset: usize,
        /// What could not be decoded
        message: String,
    },

    /// A value could not be encoded under its descriptor
    #[error("encode error: {0}")]
    Encode(String),

    /// A value's shape does not match what the target Block holds
    #[error("shape error: {0}")]
    Shape(String),

    /// The byte source ran out while a field was being read
    #[error("unexpected end of data: wanted {wanted} bytes at offset {offset}")]
    OutOfBounds {
        /// Absolute offset of the failed read
        offset: usize,
        /// Number of bytes requested
        wanted: usize,
    },

    /// No attribute with this name or index exists
    #[error("'{block}' has no attribute '{name}'")]
    MissingAttribute {
        /// Name of the Block's descriptor
        block: String,
        /// Requested name or index
        name: String,
    },

    /// The Block behind a handle has been released
    #[error("stale block handle")]
    StaleHandle,

    /// Descriptor nesting exceeded the configured maximum depth
    #[error("descriptor nesting exceeds depth limit of {0}")]
    DepthLimit(usize),

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error annotated with the fields it unwound through.
    /// Frames are stored innermost first.
    #[error("{source} (in {})", render_frames(.frames))]
    Within {
        /// One entry per enclosing field, innermost first
        frames: Vec<String>,
        /// The error that was raised
        source: Box<Error>,
    },
}

fn render_frames(frames: &[String]) -> String {
    frames.iter().rev().cloned().collect::<Vec<_>>().join(" > ")
}

impl Error {
    /// Create a schema error
    pub fn schema(block: &str, attr: &str, message: impl Into<String>) -> Self {
        Error::Schema {
            block: block.to_string(),
            attr: attr.to_string(),
            message: message.into(),
        }
    }

    /// Create a size-edit-rejected error
    pub fn size_rejected(block: &str, attr: &str, message: impl Into<String>) -> Self {
        Error::SizeEditRejected {
            block: block.to_string(),
            attr: attr.to_string(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(offset: usize, message: impl Into<String>) -> Self {
        Error::Decode {
            offset,
            message: message.into(),
        }
    }

    /// Push an enclosing frame onto this error
    pub fn within(self, frame: impl Into<String>) -> Self {
        match self {
            Error::Within { mut frames, source } => {
                frames.push(frame.into());
                Error::Within { frames, source }
            }
            other => Error::Within {
                frames: vec![frame.into()],
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with all frame annotations stripped
    pub fn root(&self) -> &Error {
        match self {
            Error::Within { source, .. } => source.root(),
            other => other,
        }
    }

    /// The enclosing frames, outermost first
    pub fn frames(&self) -> Vec<&str> {
        match self {
            Error::Within { frames, .. } => frames.iter().rev().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Attach a frame to the error of a failed result
pub(crate) trait ResultExt<T> {
    fn within(self, frame: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn within(self, frame: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| e.within(frame()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_accumulate_outward() {
        let err = Error::decode(12, "bad byte")
            .within("name: Str")
            .within("header: Struct")
            .within("gif: Container");

        assert_eq!(err.frames(), vec!["gif: Container", "header: Struct", "name: Str"]);
        assert!(matches!(err.root(), Error::Decode { offset: 12, .. }));

        let text = err.to_string();
        assert!(text.starts_with("decode error at offset 12: bad byte"));
        assert!(text.contains("gif: Container > header: Struct > name: Str"));
    }

    #[test]
    fn test_root_of_plain_error() {
        let err = Error::Capability("peek");
        assert!(matches!(err.root(), Error::Capability("peek")));
        assert!(err.frames().is_empty());
    }
}
