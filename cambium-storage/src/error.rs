use cambium_api::IndexType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted page or fragment chain: {0}")]
    Corruption(String),

    #[error("illegal operation: {0}")]
    Usage(String),

    #[error("internal contract violation: {0}")]
    Invariant(&'static str),

    #[error(
        "trie page irreducible: index {index_type:?}, {entry_count} entries, \
         {remaining_space} bytes free, {required_space} bytes required"
    )]
    SpaceExhausted {
        index_type: IndexType,
        entry_count: u16,
        remaining_space: usize,
        required_space: usize,
    },

    #[error("write conflict: {0}")]
    Conflict(&'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        Error::Usage(msg.into())
    }
}
