use std::{io, result};

use thiserror::Error;

/// Any error that can occur while configuring a parser or parsing data.
///
/// Every variant maps to a stable integer status code through
/// [`Error::status_code`], for callers bridging to C-style APIs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArguments(&'static str),

    #[error("out of memory")]
    OutOfMemory,

    #[error("parse error: {message}")]
    Parse { message: &'static str },

    #[error("field size exceeds maximum of {max} bytes")]
    FieldTooLarge { max: usize },

    #[error("row size exceeds maximum of {max} bytes")]
    RowTooLarge { max: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn parse(message: &'static str) -> Self {
        Self::Parse { message }
    }

    /// Integer status code of this error.
    ///
    /// `0` is reserved for success and never returned here.
    pub fn status_code(&self) -> i32 {
        match self {
            Error::InvalidArguments(_) => -1,
            Error::OutOfMemory => -2,
            Error::Parse { .. } => -6,
            Error::FieldTooLarge { .. } => -7,
            Error::RowTooLarge { .. } => -8,
            Error::Io(_) => -9,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
