//! The bridge service: couples staff browser sessions, workstation RFID
//! units and a shared library-backend pool.
//!
//! # Architecture
//!
//! ```text
//! Browser ──(WebSocket/JSON)── UI loops ──┐
//!                                         ├── SessionFsm ── reader loops ──(TCP)── RFID unit
//! Hub ── one session per workstation host ┘        │
//!                                                  └── SipPool ──(TCP)── library backend
//! ```
//!
//! The [`hub::Hub`] accepts UI registrations, dials the RFID unit on the
//! same host, performs the version handshake and spawns the per-session
//! tasks. Each session is one [`session::SessionFsm`] driving the
//! transaction logic, plus dedicated reader read/write loops and UI
//! read/write loops. Shared state is owned by single tasks and reached
//! through channels; the only cross-session contention point is the
//! backend pool.

pub mod app;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod session;
pub mod ui;

pub use app::{App, AppState, ServerError};
pub use hub::{Hub, HubEvent};
pub use metrics::{Metrics, StatusReport};
