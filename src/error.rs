use crate::dialog::DialogId;
use crate::transaction::key::TransactionKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SIP message error: {0}")]
    SipMessageError(String),

    #[error("URI syntax error: {0}")]
    UriSyntaxError(String),

    #[error("address resolution error: {0}")]
    AddressResolutionError(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("transaction error: {0}: {1}")]
    TransactionError(String, TransactionKey),

    #[error("dialog error: {0}: {1}")]
    DialogError(String, DialogId),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("user agent is closed")]
    Closed,

    #[error("{0}")]
    Error(String),
}

impl From<rsip::Error> for Error {
    fn from(e: rsip::Error) -> Self {
        Error::SipMessageError(e.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::AddressResolutionError(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::Error(e.to_string())
    }
}
