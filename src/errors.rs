use thiserror::Error;

/// Why a single returned document could not be mapped to its typed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has type {found}, expected {expected}")]
    WrongType { field: &'static str, expected: &'static str, found: String },

    #[error("field `{field}` has an invalid value: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("{op} timed out after {after_ms} ms; outcome unknown")]
    Timeout { op: &'static str, after_ms: u64 },

    #[error("store rejected {op}: {detail}")]
    Store { op: &'static str, detail: String },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShelfError>;

impl ShelfError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Process exit code used by the CLI for this error class.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidSpec(_) => 2,
            Self::Connection(_) => 3,
            Self::Timeout { .. } => 4,
            Self::Store { .. } => 5,
            Self::Decode(_) => 6,
            Self::Config(_) => 7,
            Self::Io(_) => 1,
        }
    }

    /// One-line user-facing message. Store-native detail stays out of it.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Store { op, .. } => format!("the store rejected {op} (see diagnostics for details)"),
            other => other.to_string(),
        }
    }

    /// True when the operation may or may not have been applied by the store.
    #[must_use]
    pub const fn outcome_unknown(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<toml::de::Error> for ShelfError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
