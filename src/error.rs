use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("i/o error: {0}")]
    ErrIo(String),

    #[error("end of stream")]
    ErrEof,

    #[error("not found")]
    ErrNotFound,

    #[error("stream already open")]
    ErrAlreadyOpen,

    #[error("timed out")]
    ErrTimeout,

    #[error("raw is too small for a journal key")]
    ErrKeyTooSmall,
    #[error("unknown journal key type `{typ}`")]
    ErrKeyTypeUnknown { typ: u8 },
    #[error("value is too small for an item header")]
    ErrHeaderTooSmall,
    #[error("corrupt item trailer")]
    ErrCorruptValue,

    #[error("bad request line")]
    ErrParse,

    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::ErrIo(e.into_string())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::ErrIo(e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            e @ Error::ErrEof => io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()),
            e @ Error::ErrNotFound => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
            e @ Error::ErrTimeout => io::Error::new(io::ErrorKind::TimedOut, e.to_string()),
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
