//! The vendor codec: command encoding and reply parsing.
//!
//! The protocol is asymmetric. Commands are fixed strings (plus three
//! parameterized forms); replies share prefixes but diverge on shape.
//! One piece of state links the two directions: after a `Write` command
//! the next `OK|…` reply carries written tag ids instead of a tag
//! count. [`VendorCodec::reset`] clears that flag and is called at the
//! start of every new transaction sequence.

use crate::{ReaderCommand, ReaderResponse};
use rfidbridge_core::{Error, Result};

/// Stateful encoder/parser for the reader unit protocol.
#[derive(Debug, Default)]
pub struct VendorCodec {
    write_mode: bool,
}

impl VendorCodec {
    pub fn new() -> Self {
        VendorCodec::default()
    }

    /// Clear internal state for a new read/write sequence.
    pub fn reset(&mut self) {
        self.write_mode = false;
    }

    /// Whether a write command has been issued since the last reset.
    pub fn write_mode(&self) -> bool {
        self.write_mode
    }

    /// Encode a command as a wire line (without the `\r` terminator,
    /// which the line framing appends).
    ///
    /// Encoding a `Write` switches the codec into write mode.
    pub fn encode(&mut self, cmd: &ReaderCommand) -> String {
        match cmd {
            ReaderCommand::InitVersion => "VER2.00".to_string(),
            ReaderCommand::BeginScan => "BEG".to_string(),
            ReaderCommand::EndScan => "END".to_string(),
            ReaderCommand::RereadTag => "OKR".to_string(),
            ReaderCommand::AlarmOn => "OK1".to_string(),
            ReaderCommand::AlarmOff => "OK0".to_string(),
            // Trailing space is part of the command.
            ReaderCommand::AlarmLeave => "OK ".to_string(),
            ReaderCommand::TagCount => "TGC".to_string(),
            ReaderCommand::Write { barcode, tag_count } => {
                self.write_mode = true;
                format!("WRT{barcode}|{tag_count}|0")
            }
            ReaderCommand::RetryAlarmOn { tag } => format!("ACT{tag}"),
            ReaderCommand::RetryAlarmOff { tag } => format!("DAC{tag}"),
            ReaderCommand::SlpLibraryNumber => "SLPLBN|02030000".to_string(),
            ReaderCommand::SlpCountryCode => "SLPLBC|NO".to_string(),
            ReaderCommand::SlpDataModel => "SLPDTM|DS24".to_string(),
            ReaderCommand::SlpSecurityBit => "SLPSSB|0".to_string(),
            ReaderCommand::SlpCheckReadAfterWrite => "SLPCRD|1".to_string(),
            ReaderCommand::SlpWaitForTagsTimeout => "SLPWTM|5000".to_string(),
            ReaderCommand::SlpReturnSetStatus => "SLPRSS|1".to_string(),
        }
    }

    /// Parse a reply line (terminator already stripped).
    ///
    /// Accepted forms:
    ///
    /// - `OK` / `NOK`
    /// - `OK|<n>` — tag count, or written ids when in write mode
    /// - `NOK|<n>` — failure with tag count
    /// - `RDT<tag>|<0|1>` — tag read; `0` means all expected tags
    ///   were present
    ///
    /// Anything else is an error: an unparseable reply means the unit
    /// and the bridge no longer agree on protocol state.
    pub fn decode(&self, line: &str) -> Result<ReaderResponse> {
        // Some units prefix replies with a stray newline.
        let s = line.trim_start_matches('\n').trim_end_matches('\r');

        if s == "OK" {
            return Ok(ReaderResponse::ok());
        }
        if s == "NOK" {
            return Ok(ReaderResponse::nok());
        }

        if let Some(rest) = s.strip_prefix("RDT") {
            return self.decode_tag_read(rest).ok_or_else(|| unparseable(line));
        }
        if let Some(rest) = s.strip_prefix("NOK|") {
            let count = rest.parse().map_err(|_| unparseable(line))?;
            return Ok(ReaderResponse {
                ok: false,
                tag_count: Some(count),
                ..ReaderResponse::default()
            });
        }
        if let Some(rest) = s.strip_prefix("OK|") {
            if self.write_mode {
                return Ok(ReaderResponse {
                    ok: true,
                    written_ids: rest.split('|').map(str::to_string).collect(),
                    ..ReaderResponse::default()
                });
            }
            let count = rest.parse().map_err(|_| unparseable(line))?;
            return Ok(ReaderResponse {
                ok: true,
                tag_count: Some(count),
                ..ReaderResponse::default()
            });
        }

        Err(unparseable(line))
    }

    fn decode_tag_read(&self, rest: &str) -> Option<ReaderResponse> {
        let (tag, flag) = rest.split_once('|')?;
        let ok = match flag {
            "0" => true,
            "1" => false,
            _ => return None,
        };
        let barcode = tag.split(':').next().unwrap_or(tag);
        Some(ReaderResponse {
            ok,
            tag: Some(tag.to_string()),
            barcode: Some(barcode.to_string()),
            ..ReaderResponse::default()
        })
    }
}

fn unparseable(line: &str) -> Error {
    Error::InvalidReaderResponse {
        message: format!("cannot parse reply: {line:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ReaderCommand::InitVersion, "VER2.00")]
    #[case(ReaderCommand::BeginScan, "BEG")]
    #[case(ReaderCommand::EndScan, "END")]
    #[case(ReaderCommand::RereadTag, "OKR")]
    #[case(ReaderCommand::AlarmOn, "OK1")]
    #[case(ReaderCommand::AlarmOff, "OK0")]
    #[case(ReaderCommand::AlarmLeave, "OK ")]
    #[case(ReaderCommand::TagCount, "TGC")]
    #[case(ReaderCommand::SlpLibraryNumber, "SLPLBN|02030000")]
    #[case(ReaderCommand::SlpCountryCode, "SLPLBC|NO")]
    #[case(ReaderCommand::SlpDataModel, "SLPDTM|DS24")]
    #[case(ReaderCommand::SlpSecurityBit, "SLPSSB|0")]
    #[case(ReaderCommand::SlpCheckReadAfterWrite, "SLPCRD|1")]
    #[case(ReaderCommand::SlpWaitForTagsTimeout, "SLPWTM|5000")]
    #[case(ReaderCommand::SlpReturnSetStatus, "SLPRSS|1")]
    fn test_encode_fixed_commands(#[case] cmd: ReaderCommand, #[case] wire: &str) {
        let mut codec = VendorCodec::new();
        assert_eq!(codec.encode(&cmd), wire);
        assert!(!codec.write_mode());
    }

    #[test]
    fn test_encode_write_sets_write_mode() {
        let mut codec = VendorCodec::new();
        let wire = codec.encode(&ReaderCommand::Write {
            barcode: "03010824124004".to_string(),
            tag_count: 2,
        });
        assert_eq!(wire, "WRT03010824124004|2|0");
        assert!(codec.write_mode());

        codec.reset();
        assert!(!codec.write_mode());
    }

    #[test]
    fn test_encode_retry_commands_carry_full_tag() {
        let mut codec = VendorCodec::new();
        let tag = "1003010824124004:NO:02030000";
        assert_eq!(
            codec.encode(&ReaderCommand::RetryAlarmOn {
                tag: tag.to_string()
            }),
            "ACT1003010824124004:NO:02030000"
        );
        assert_eq!(
            codec.encode(&ReaderCommand::RetryAlarmOff {
                tag: tag.to_string()
            }),
            "DAC1003010824124004:NO:02030000"
        );
    }

    #[test]
    fn test_decode_ok_nok() {
        let codec = VendorCodec::new();
        assert_eq!(codec.decode("OK").unwrap(), ReaderResponse::ok());
        assert_eq!(codec.decode("NOK").unwrap(), ReaderResponse::nok());
        // stray leading newline and trailing CR tolerated
        assert_eq!(codec.decode("\nOK\r").unwrap(), ReaderResponse::ok());
    }

    #[test]
    fn test_decode_tag_count() {
        let codec = VendorCodec::new();
        let resp = codec.decode("OK|2").unwrap();
        assert!(resp.ok);
        assert_eq!(resp.tag_count, Some(2));
        assert!(resp.written_ids.is_empty());
    }

    #[test]
    fn test_decode_nok_with_count() {
        let codec = VendorCodec::new();
        let resp = codec.decode("NOK|3").unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.tag_count, Some(3));
    }

    #[test]
    fn test_decode_written_ids_in_write_mode() {
        let mut codec = VendorCodec::new();
        codec.encode(&ReaderCommand::Write {
            barcode: "03010824124004".to_string(),
            tag_count: 2,
        });

        let resp = codec.decode("OK|E004010046A847AD|E004010046A847AD").unwrap();
        assert!(resp.ok);
        assert_eq!(
            resp.written_ids,
            vec!["E004010046A847AD", "E004010046A847AD"]
        );
        assert_eq!(resp.tag_count, None);
    }

    #[test]
    fn test_decode_tag_read() {
        let codec = VendorCodec::new();

        let resp = codec.decode("RDT1003010824124004:NO:02030000|0").unwrap();
        assert!(resp.ok);
        assert_eq!(resp.tag.as_deref(), Some("1003010824124004:NO:02030000"));
        assert_eq!(resp.barcode.as_deref(), Some("1003010824124004"));

        let resp = codec.decode("RDT1003010824124004:NO:02030000|1").unwrap();
        assert!(!resp.ok);

        // Bare barcode without suffix
        let resp = codec.decode("RDT1234|0").unwrap();
        assert_eq!(resp.tag.as_deref(), Some("1234"));
        assert_eq!(resp.barcode.as_deref(), Some("1234"));
    }

    #[rstest]
    #[case("")]
    #[case("OK1")] // command echo, not a valid reply
    #[case("OK|")]
    #[case("OK|two")]
    #[case("RDT1234")] // missing presence flag
    #[case("RDT1234|2")] // flag out of range
    #[case("NOK|")]
    #[case("BLAH")]
    fn test_decode_rejects_garbage(#[case] line: &str) {
        let codec = VendorCodec::new();
        assert!(codec.decode(line).is_err());
    }

    /// Decode is total over the reply family every parameterless command
    /// can produce.
    #[test]
    fn test_decode_total_over_simple_replies() {
        let codec = VendorCodec::new();
        for reply in ["OK", "NOK", "OK|0", "OK|12", "NOK|1"] {
            codec.decode(reply).unwrap();
        }
    }
}
