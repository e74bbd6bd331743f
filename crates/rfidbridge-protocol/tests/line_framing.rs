//! Integration tests: line framing over an in-memory duplex stream.

use futures::{SinkExt, StreamExt};
use rfidbridge_protocol::{LineCodec, ReaderCommand, VendorCodec};
use tokio_util::codec::Framed;

#[tokio::test]
async fn test_commands_roundtrip_over_duplex() {
    let (client, server) = tokio::io::duplex(256);
    let mut client = Framed::new(client, LineCodec::new());
    let mut server = Framed::new(server, LineCodec::new());

    let mut vendor = VendorCodec::new();
    client
        .send(vendor.encode(&ReaderCommand::InitVersion))
        .await
        .unwrap();
    client
        .send(vendor.encode(&ReaderCommand::BeginScan))
        .await
        .unwrap();

    assert_eq!(server.next().await.unwrap().unwrap(), "VER2.00");
    assert_eq!(server.next().await.unwrap().unwrap(), "BEG");
}

#[tokio::test]
async fn test_replies_split_across_writes() {
    use tokio::io::AsyncWriteExt;

    let (client, mut server) = tokio::io::duplex(256);
    let mut reader_side = Framed::new(client, LineCodec::new());

    // A reply arriving in two TCP segments must still decode as one line.
    server.write_all(b"RDT10030108").await.unwrap();
    server
        .write_all(b"24124004:NO:02030000|0\r")
        .await
        .unwrap();

    let line = reader_side.next().await.unwrap().unwrap();
    assert_eq!(line, "RDT1003010824124004:NO:02030000|0");

    let vendor = VendorCodec::new();
    let resp = vendor.decode(&line).unwrap();
    assert!(resp.ok);
    assert_eq!(resp.barcode.as_deref(), Some("1003010824124004"));
}

#[tokio::test]
async fn test_write_sequence_on_the_wire() {
    let (client, server) = tokio::io::duplex(1024);
    let mut bridge = Framed::new(client, LineCodec::new());
    let mut unit = Framed::new(server, LineCodec::new());

    let mut vendor = VendorCodec::new();
    for cmd in rfidbridge_protocol::PRE_WRITE_SEQUENCE {
        bridge.send(vendor.encode(&cmd)).await.unwrap();
    }
    bridge
        .send(vendor.encode(&ReaderCommand::TagCount))
        .await
        .unwrap();
    bridge
        .send(vendor.encode(&ReaderCommand::Write {
            barcode: "03010824124004".to_string(),
            tag_count: 2,
        }))
        .await
        .unwrap();

    let expected = [
        "SLPLBN|02030000",
        "SLPLBC|NO",
        "SLPDTM|DS24",
        "SLPSSB|0",
        "SLPCRD|1",
        "SLPWTM|5000",
        "SLPRSS|1",
        "TGC",
        "WRT03010824124004|2|0",
    ];
    for want in expected {
        assert_eq!(unit.next().await.unwrap().unwrap(), want);
    }

    // The codec is now in write mode, so the confirmation parses as ids.
    unit.send("OK|E004010046A847AD|E004010046A847AD".to_string())
        .await
        .unwrap();
    let line = bridge.next().await.unwrap().unwrap();
    let resp = vendor.decode(&line).unwrap();
    assert_eq!(resp.written_ids.len(), 2);
}
