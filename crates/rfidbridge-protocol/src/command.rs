//! High-level commands sent to a reader unit.

/// A command for the RFID unit.
///
/// Wire encoding is performed by [`VendorCodec::encode`], which also
/// tracks the write-mode state that `Write` switches on.
///
/// [`VendorCodec::encode`]: crate::VendorCodec::encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderCommand {
    /// Version handshake, sent once when a session is established.
    /// The unit must answer OK.
    InitVersion,

    /// Start scanning for tags.
    BeginScan,

    /// Stop scanning.
    EndScan,

    /// Ask the unit to re-read the current tag.
    RereadTag,

    /// Turn the EAS alarm bit on (item back in the library).
    AlarmOn,

    /// Turn the EAS alarm bit off (item checked out).
    AlarmOff,

    /// Leave the alarm in its current state.
    AlarmLeave,

    /// Count the tags currently in the field.
    TagCount,

    /// Write `barcode` to the `tag_count` tags in the field.
    Write { barcode: String, tag_count: u32 },

    /// Retry turning the alarm on for a specific tag, addressed by its
    /// full tag id (including suffix).
    RetryAlarmOn { tag: String },

    /// Retry turning the alarm off for a specific tag.
    RetryAlarmOff { tag: String },

    /// Set library number (pre-write parameter).
    SlpLibraryNumber,

    /// Set country code (pre-write parameter).
    SlpCountryCode,

    /// Set tag data model (pre-write parameter).
    SlpDataModel,

    /// Set security-bit policy (pre-write parameter).
    SlpSecurityBit,

    /// Enable check-read-after-write (pre-write parameter).
    SlpCheckReadAfterWrite,

    /// Set wait-for-tags timeout in milliseconds (pre-write parameter).
    SlpWaitForTagsTimeout,

    /// Enable return-set-status (pre-write parameter).
    SlpReturnSetStatus,
}

/// The parameter commands issued, in order, before every tag write.
///
/// Each must be acknowledged with OK before the next is sent; the write
/// sequence continues with a tag count and the write itself.
pub const PRE_WRITE_SEQUENCE: [ReaderCommand; 7] = [
    ReaderCommand::SlpLibraryNumber,
    ReaderCommand::SlpCountryCode,
    ReaderCommand::SlpDataModel,
    ReaderCommand::SlpSecurityBit,
    ReaderCommand::SlpCheckReadAfterWrite,
    ReaderCommand::SlpWaitForTagsTimeout,
    ReaderCommand::SlpReturnSetStatus,
];
