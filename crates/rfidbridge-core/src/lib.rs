//! Core types for the rfidbridge workspace.
//!
//! This crate defines what the other crates talk about: the item/event
//! model exchanged with the staff UI, the configuration file format with
//! its environment overrides, and the shared error type.

pub mod config;
pub mod error;
pub mod model;

pub use config::{Client, Config};
pub use error::{Error, Result};
pub use model::{Action, Item, RequestItem, UiEvent, UiRequest};
