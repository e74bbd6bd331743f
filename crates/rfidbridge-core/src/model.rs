//! The JSON message model shared with the staff web interface.
//!
//! Field names and omit-empty behavior match what the staff client
//! already speaks: empty strings, zero counts and false flags are left
//! out of the serialized object entirely.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Two-character vendor prefix carried by tag payloads.
///
/// Tags encode the item barcode with this prefix prepended; it is
/// stripped for all business logic (backend lookups, retry-map keys).
pub const TAG_BARCODE_PREFIX: &str = "10";

/// Strip the vendor prefix from a tag-carried barcode.
///
/// Barcodes that do not carry the prefix are returned unchanged.
///
/// # Example
///
/// ```
/// use rfidbridge_core::model::normalize_barcode;
///
/// assert_eq!(normalize_barcode("1003010824124004"), "03010824124004");
/// assert_eq!(normalize_barcode("1234"), "1234");
/// ```
#[must_use]
pub fn normalize_barcode(barcode: &str) -> &str {
    barcode.strip_prefix(TAG_BARCODE_PREFIX).unwrap_or(barcode)
}

/// Transaction actions, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "CONNECT")]
    Connect,
    #[serde(rename = "CHECKIN")]
    Checkin,
    #[serde(rename = "CHECKOUT")]
    Checkout,
    #[serde(rename = "ITEM-INFO")]
    ItemInfo,
    #[serde(rename = "WRITE")]
    Write,
    #[serde(rename = "RETRY-ALARM-ON")]
    RetryAlarmOn,
    #[serde(rename = "RETRY-ALARM-OFF")]
    RetryAlarmOff,
    #[serde(rename = "END")]
    End,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Connect => "CONNECT",
            Action::Checkin => "CHECKIN",
            Action::Checkout => "CHECKOUT",
            Action::ItemInfo => "ITEM-INFO",
            Action::Write => "WRITE",
            Action::RetryAlarmOn => "RETRY-ALARM-ON",
            Action::RetryAlarmOff => "RETRY-ALARM-OFF",
            Action::End => "END",
        };
        write!(f, "{s}")
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// A unit of library material, as presented to the staff UI.
///
/// Built up from backend responses and reader replies; flows only from
/// the session state machine to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Printed item identifier, vendor prefix already stripped.
    #[serde(rename = "Barcode", default, skip_serializing_if = "String::is_empty")]
    pub barcode: String,

    /// Human-readable title.
    #[serde(rename = "Label", default, skip_serializing_if = "String::is_empty")]
    pub label: String,

    /// Transaction date, DD/MM/YYYY. Empty when the transaction did not
    /// actually take place.
    #[serde(rename = "Date", default, skip_serializing_if = "String::is_empty")]
    pub date: String,

    /// Free-text status line to display.
    #[serde(rename = "Status", default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    /// Destination branch when the item is to be transferred; empty
    /// otherwise.
    #[serde(rename = "Transfer", default, skip_serializing_if = "String::is_empty")]
    pub transfer: String,

    /// Expected number of tags for multi-piece items.
    #[serde(rename = "NumTags", default, skip_serializing_if = "is_zero")]
    pub num_tags: u32,

    /// The backend does not know this barcode (withdrawn or mistyped).
    #[serde(rename = "Unknown", default, skip_serializing_if = "is_false")]
    pub unknown: bool,

    #[serde(rename = "TransactionFailed", default, skip_serializing_if = "is_false")]
    pub transaction_failed: bool,

    #[serde(rename = "AlarmOnFailed", default, skip_serializing_if = "is_false")]
    pub alarm_on_failed: bool,

    #[serde(rename = "AlarmOffFailed", default, skip_serializing_if = "is_false")]
    pub alarm_off_failed: bool,

    #[serde(rename = "WriteFailed", default, skip_serializing_if = "is_false")]
    pub write_failed: bool,

    #[serde(rename = "TagCountFailed", default, skip_serializing_if = "is_false")]
    pub tag_count_failed: bool,
}

/// The item fragment carried by WRITE and ITEM-INFO requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    #[serde(rename = "Barcode", default)]
    pub barcode: String,

    #[serde(rename = "NumTags", default)]
    pub num_tags: u32,
}

/// A request from the staff UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiRequest {
    #[serde(rename = "Action")]
    pub action: Action,

    /// Branch code to use for backend transactions.
    #[serde(rename = "Branch", default, skip_serializing_if = "String::is_empty")]
    pub branch: String,

    /// Patron identifier; required for CHECKOUT.
    #[serde(rename = "Patron", default, skip_serializing_if = "String::is_empty")]
    pub patron: String,

    #[serde(rename = "Item", default)]
    pub item: RequestItem,
}

impl UiRequest {
    pub fn new(action: Action) -> Self {
        UiRequest {
            action,
            branch: String::new(),
            patron: String::new(),
            item: RequestItem::default(),
        }
    }
}

/// An event pushed to the staff UI.
///
/// `action` mirrors the request that produced the event, or CONNECT for
/// session-level notifications. The three error flags classify failures:
/// `rfid_error` and `sip_error` are fatal to the session, `user_error`
/// is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiEvent {
    #[serde(rename = "Action")]
    pub action: Action,

    #[serde(rename = "Item", default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,

    #[serde(rename = "RFIDError", default, skip_serializing_if = "is_false")]
    pub rfid_error: bool,

    #[serde(rename = "SIPError", default, skip_serializing_if = "is_false")]
    pub sip_error: bool,

    #[serde(rename = "UserError", default, skip_serializing_if = "is_false")]
    pub user_error: bool,

    #[serde(rename = "ErrorMessage", default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl UiEvent {
    pub fn new(action: Action) -> Self {
        UiEvent {
            action,
            item: None,
            rfid_error: false,
            sip_error: false,
            user_error: false,
            error_message: String::new(),
        }
    }

    /// Session established.
    pub fn connected() -> Self {
        UiEvent::new(Action::Connect)
    }

    /// Fatal reader failure. The session is over; the user reopens it.
    pub fn rfid_error() -> Self {
        UiEvent {
            rfid_error: true,
            ..UiEvent::new(Action::Connect)
        }
    }

    /// Fatal backend failure.
    pub fn sip_error() -> Self {
        UiEvent {
            sip_error: true,
            ..UiEvent::new(Action::Connect)
        }
    }

    /// Non-fatal user mistake (malformed request, missing field).
    pub fn user_error(action: Action, message: impl Into<String>) -> Self {
        UiEvent {
            user_error: true,
            error_message: message.into(),
            ..UiEvent::new(action)
        }
    }

    /// An item-level result for the given transaction.
    pub fn with_item(action: Action, item: Item) -> Self {
        UiEvent {
            item: Some(item),
            ..UiEvent::new(action)
        }
    }
}
