//! Library backend (SIP) protocol support.
//!
//! The backend speaks a fixed-format terminal protocol: a two-digit
//! message code, a fixed-position header, then pipe-separated fields
//! tagged with two-letter codes, the whole line terminated by `\r`.
//!
//! This crate builds the four request kinds the bridge needs (login,
//! checkin, checkout, item status), parses responses into the UI item
//! model, and maintains [`SipPool`] — a fixed-size set of authenticated
//! backend connections shared by all sessions, with a single mid-call
//! retry to survive the backend's habit of dropping idle connections.

pub mod error;
pub mod message;
pub mod pool;

pub use error::SipError;
pub use message::{
    checkin_item, checkin_msg, checkout_item, checkout_msg, format_date, item_status_item,
    item_status_msg, login_msg, SipResponse,
};
pub use pool::{SipConfig, SipPool};
