//! SIP message building and response parsing.
//!
//! Requests are assembled as plain strings; the line framing appends
//! the `\r` terminator. Responses carry a fixed-position header whose
//! layout depends on the message code, followed by two-letter-tagged
//! fields separated by `|`.

use crate::error::{Result, SipError};
use chrono::Local;
use rfidbridge_core::Item;
use std::collections::HashMap;

/// Timestamp layout used in SIP transaction-date fields:
/// `YYYYMMDD    HHMMSS` (four spaces between date and time).
const DATE_LAYOUT: &str = "%Y%m%d    %H%M%S";

/// Status line shown when the backend does not know the barcode.
pub const UNKNOWN_ITEM_STATUS: &str = "eksemplaret finnes ikke i basen";

fn now_stamp() -> String {
    Local::now().format(DATE_LAYOUT).to_string()
}

/// Login request (code 93).
pub fn login_msg(user: &str, pass: &str, dept: &str) -> String {
    format!("9300CN{user}|CO{pass}|CP{dept}|")
}

/// Checkin request (code 09).
pub fn checkin_msg(branch: &str, barcode: &str) -> String {
    checkin_msg_at(&now_stamp(), branch, barcode)
}

fn checkin_msg_at(stamp: &str, branch: &str, barcode: &str) -> String {
    format!("09N{stamp}{stamp}AP{branch}|AO{branch}|AB{barcode}|AC|")
}

/// Checkout request (code 11).
pub fn checkout_msg(branch: &str, patron: &str, barcode: &str) -> String {
    checkout_msg_at(&now_stamp(), branch, patron, barcode)
}

fn checkout_msg_at(stamp: &str, branch: &str, patron: &str, barcode: &str) -> String {
    format!("11YN{stamp}{stamp}AO{branch}|AA{patron}|AB{barcode}|AC|")
}

/// Item-information request (code 17).
pub fn item_status_msg(barcode: &str) -> String {
    item_status_msg_at(&now_stamp(), barcode)
}

fn item_status_msg_at(stamp: &str, barcode: &str) -> String {
    format!("17{stamp}AO|AB{barcode}|AC|")
}

/// A parsed SIP response: message code, fixed-position header, and the
/// tagged variable fields.
#[derive(Debug, Clone)]
pub struct SipResponse {
    raw: String,
    fields: HashMap<String, String>,
}

impl SipResponse {
    /// Parse a response line (trailing `\r` tolerated).
    pub fn parse(line: &str) -> Result<Self> {
        let raw = line.trim_end_matches('\r');
        if raw.len() < 2 || !raw.is_char_boundary(2) {
            return Err(SipError::Decode(format!("response too short: {raw:?}")));
        }
        let prefix = match &raw[..2] {
            // ok flag, two status chars, alert flag, 18-char date
            "10" | "12" => 24,
            // four 2-char status codes, 18-char date
            "18" => 26,
            // ok flag only
            "94" => 3,
            other => {
                return Err(SipError::Decode(format!("unknown response code: {other}")));
            }
        };
        if raw.len() < prefix || !raw.is_char_boundary(prefix) {
            return Err(SipError::Decode(format!(
                "truncated {} response: {raw:?}",
                &raw[..2]
            )));
        }

        Ok(SipResponse {
            fields: parse_fields(&raw[prefix..]),
            raw: raw.to_string(),
        })
    }

    /// Two-digit message code.
    pub fn code(&self) -> &str {
        &self.raw[..2]
    }

    /// The fixed-position ok flag ('1' = success).
    pub fn ok(&self) -> bool {
        matches!(self.code(), "10" | "12" | "94") && self.raw.as_bytes()[2] == b'1'
    }

    /// Raw transaction date (`YYYYMMDD    HHMMSS`) from the fixed
    /// header, empty when the response kind carries none.
    pub fn transaction_date(&self) -> &str {
        let range = match self.code() {
            "10" | "12" => 6..24,
            "18" => 8..26,
            _ => return "",
        };
        self.raw.get(range).unwrap_or("")
    }

    /// A tagged field by its two-letter code, empty string if absent.
    pub fn field(&self, code: &str) -> &str {
        self.fields.get(code).map(String::as_str).unwrap_or("")
    }
}

fn parse_fields(s: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for part in s.split('|') {
        if part.len() >= 2 && part.is_char_boundary(2) {
            fields.insert(part[..2].to_string(), part[2..].to_string());
        }
    }
    fields
}

/// Format a SIP transaction date as DD/MM/YYYY.
///
/// Inputs shorter than nine characters pass through unchanged.
pub fn format_date(s: &str) -> String {
    if s.len() < 9 || !s.is_char_boundary(8) {
        return s.to_string();
    }
    format!("{}/{}/{}", &s[6..8], &s[4..6], &s[0..4])
}

/// Translate a checkin response (code 10) into an item result.
pub fn checkin_item(resp: &SipResponse) -> Item {
    let mut item = Item {
        barcode: resp.field("AB").to_string(),
        label: resp.field("AJ").to_string(),
        ..Item::default()
    };

    if resp.ok() {
        // Only show a date when the checkin actually happened.
        item.date = format_date(resp.transaction_date());
    } else {
        item.transaction_failed = true;
        item.status = resp.field("AF").to_string();
    }

    // Alert 99: bad barcode or withdrawn item.
    if resp.field("CV") == "99" {
        item.unknown = true;
        item.status = UNKNOWN_ITEM_STATUS.to_string();
    }
    if item.label.is_empty() {
        item.unknown = true;
    }

    // Transfer either to the holding branch or the home branch.
    let mut transfer = resp.field("CT");
    if transfer.is_empty() {
        let permanent = resp.field("AQ");
        if permanent != resp.field("AO") {
            transfer = permanent;
        }
    }
    item.transfer = transfer.to_string();

    item
}

/// Translate a checkout response (code 12) into an item result.
pub fn checkout_item(resp: &SipResponse) -> Item {
    let mut item = Item {
        barcode: resp.field("AB").to_string(),
        label: resp.field("AJ").to_string(),
        status: resp.field("AF").to_string(),
        ..Item::default()
    };

    if resp.ok() {
        item.date = format_date(resp.transaction_date());
    } else {
        item.transaction_failed = true;
    }
    if item.label.is_empty() {
        item.unknown = true;
    }

    item
}

/// Translate an item-information response (code 18) into an item.
pub fn item_status_item(resp: &SipResponse) -> Item {
    let mut item = Item {
        barcode: resp.field("AB").to_string(),
        label: resp.field("AJ").to_string(),
        ..Item::default()
    };

    if item.label.is_empty() {
        item.unknown = true;
        item.status = UNKNOWN_ITEM_STATUS.to_string();
    }

    item
}
