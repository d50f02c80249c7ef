use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: u64 },
}

impl Error {
    /// Classify an I/O error surfaced while reading an upload body.
    ///
    /// The body stream reports an exceeded length limit as an `io::Error`
    /// wrapping [`crate::storage::LimitExceeded`]; that case maps to
    /// [`Error::PayloadTooLarge`] instead of a generic I/O failure.
    #[must_use]
    pub fn from_body_io(err: std::io::Error) -> Self {
        if let Some(limit) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<crate::storage::LimitExceeded>())
        {
            return Self::PayloadTooLarge { limit: limit.limit };
        }
        Self::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
