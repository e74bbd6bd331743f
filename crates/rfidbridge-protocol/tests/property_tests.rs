//! Property-based robustness tests for the codecs.

use bytes::BytesMut;
use proptest::prelude::*;
use rfidbridge_protocol::{LineCodec, VendorCodec};
use tokio_util::codec::Decoder;

proptest! {
    /// The vendor decoder never panics, whatever the peer sends.
    #[test]
    fn vendor_decode_never_panics(line in ".{0,128}") {
        let codec = VendorCodec::new();
        let _ = codec.decode(&line);
    }

    /// The line decoder never panics on arbitrary byte soup and never
    /// returns a line containing the terminator.
    #[test]
    fn line_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&data[..]);
        while let Ok(Some(line)) = codec.decode(&mut buf) {
            prop_assert!(!line.contains('\r'));
        }
    }

    /// Any tag-read reply with a well-formed flag decodes, and the
    /// reported barcode is a prefix of the tag.
    #[test]
    fn tag_reads_decode(tag in "[0-9]{4,16}", suffix in "(:[A-Z0-9]{2,8}){0,2}", flag in 0u8..2) {
        let codec = VendorCodec::new();
        let line = format!("RDT{tag}{suffix}|{flag}");
        let resp = codec.decode(&line).unwrap();
        prop_assert_eq!(resp.ok, flag == 0);
        let full = resp.tag.unwrap();
        prop_assert!(full.starts_with(resp.barcode.unwrap().as_str()));
        prop_assert_eq!(full, format!("{tag}{suffix}"));
    }
}
