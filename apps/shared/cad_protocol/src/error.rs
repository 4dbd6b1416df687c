use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Record truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unknown draw command tag: {0}")]
    UnknownCommandTag(u8),

    #[error("Invalid UTF-8 in string field at offset {0}")]
    InvalidUtf8(usize),

    #[error("Record too large: {0} bytes (max: {1})")]
    RecordTooLarge(usize, usize),

    #[error("Record has {0} trailing bytes")]
    TrailingBytes(usize),
}
