use thiserror::Error;

/// Fatal stream-level errors: the whole cache artifact must be discarded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid stream magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("schema version mismatch: stream {found}, engine {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("feature flags mismatch: stream {found:#x}, engine {expected:#x}")]
    FlagsMismatch { expected: u32, found: u32 },

    #[error("codec registry mismatch: stream {found}, engine {expected}")]
    RegistryMismatch { expected: String, found: String },

    #[error("unknown codec tag {tag} (registry has {bindings} bindings)")]
    UnknownTag { tag: u32, bindings: usize },

    #[error("back-reference to unknown object #{0}")]
    DanglingReference(u32),

    #[error("back-reference to object #{0} before it was constructed")]
    PendingReference(u32),

    #[error("invalid value marker {0:#04x}")]
    InvalidMarker(u8),

    #[error("unexpected end of stream while reading {0}")]
    Truncated(&'static str),

    #[error("varint overflow")]
    VarintOverflow,

    #[error("integer out of range: {0}")]
    OutOfRange(String),

    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8,

    #[error("trailing bytes after root value")]
    TrailingBytes,

    #[error("corrupt payload: {0}")]
    Corrupt(String),
}

/// Errors from the write half of a session.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Recoverable: the value cannot be encoded. Raised by codecs before
    /// they write anything; the context turns it into a problem and a null
    /// placeholder.
    #[error("value rejected: {0}")]
    Rejected(String),

    #[error("problem at {location} cannot be recovered, its bytes were already flushed: {message}")]
    Unrecoverable { location: String, message: String },

    #[error("too many problems ({0}), giving up")]
    TooManyProblems(usize),

    #[error("session cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the read half of a session.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Recoverable: the value was read completely but cannot be rebuilt.
    /// Codecs raise it only after consuming their whole payload.
    #[error("value rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("too many problems ({0}), giving up")]
    TooManyProblems(usize),

    #[error("session cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Format(FormatError::Truncated("stream"))
        } else {
            Self::Io(err)
        }
    }
}

/// Errors describing a structured object's shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("`{shape}` has no field `{field}`")]
    MissingField { shape: String, field: String },

    #[error("`{shape}.{field}` is not a {expected}")]
    WrongType {
        shape: String,
        field: String,
        expected: &'static str,
    },

    #[error("`{shape}` does not declare field `{field}`")]
    UnknownField { shape: String, field: String },

    #[error("{0}")]
    Unsupported(String),
}

pub type FormatResult<T> = Result<T, FormatError>;
pub type EncodeResult<T> = Result<T, EncodeError>;
pub type DecodeResult<T> = Result<T, DecodeError>;
