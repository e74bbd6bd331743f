use thiserror::Error;

#[derive(Error, Debug)]
pub enum SipError {
    /// The backend rejected the login for a pool slot.
    #[error("SIP login failed for slot {slot}")]
    LoginFailed { slot: usize },

    /// Connecting to the backend timed out.
    #[error("SIP connect timeout after {0}ms")]
    ConnectTimeout(u64),

    /// The backend closed the connection mid-message.
    #[error("SIP connection closed by server")]
    ConnectionClosed,

    /// The pool has been shut down; no sessions can be borrowed.
    #[error("SIP pool is closed")]
    PoolClosed,

    /// The response line could not be interpreted.
    #[error("Cannot decode SIP response: {0}")]
    Decode(String),

    /// Line-framing error on the backend link.
    #[error("Protocol error: {0}")]
    Protocol(#[from] rfidbridge_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SipError>;
