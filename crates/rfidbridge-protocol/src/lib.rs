//! Wire protocol for the RFID reader/writer units.
//!
//! The units speak a carriage-return-terminated text protocol over TCP.
//! This crate provides:
//!
//! - [`LineCodec`]: CR-delimited framing as a Tokio codec, also reused
//!   for the (equally CR-terminated) backend link,
//! - [`ReaderCommand`] / [`ReaderResponse`]: the high-level command and
//!   reply model,
//! - [`VendorCodec`]: the stateful encoder/parser translating between
//!   the two.
//!
//! Encoding and decoding are deliberately asymmetric: commands go out,
//! replies come in, and the only shared state is the write-mode flag
//! that changes how an `OK|…` reply is interpreted.

pub mod command;
pub mod line;
pub mod response;
pub mod vendor;

pub use command::{ReaderCommand, PRE_WRITE_SEQUENCE};
pub use line::LineCodec;
pub use response::ReaderResponse;
pub use vendor::VendorCodec;
