//! Fuzz target for plaintext packet and message parsing.
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run ssh_packet -- -max_total_time=300
//! ```

#![no_main]
use keel_proto::ssh::{ChannelMessage, Message, Packet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Message::decode(data);
    let _ = ChannelMessage::from_bytes(data);

    if let Ok(packet) = Packet::from_bytes(data) {
        let serialized = packet.to_bytes();
        let reparsed = Packet::from_bytes(&serialized).expect("re-framed packet must parse");
        assert_eq!(packet.payload(), reparsed.payload());
        let _ = Message::decode(packet.payload());
    }
});
