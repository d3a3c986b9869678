//! Fuzz target for the streaming framer, plaintext and keyed.
//!
//! The first input byte picks the mode and the chunk size; the rest is fed
//! to the receive side in chunks.
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run ssh_framer -- -max_total_time=300
//! ```

#![no_main]
use keel_proto::ssh::{SessionKeys, TransportState};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&control, stream)) = data.split_first() else {
        return;
    };

    let mut state = TransportState::new();
    if control & 0x80 != 0 {
        let h = [0x42u8; 20];
        let keys = SessionKeys::derive(&[0, 0, 0, 1, 0x07], &h);
        if state.install_keys(&keys, &h).is_err() {
            return;
        }
        let _ = state.newkeys_sent();
        let _ = state.newkeys_received();
    }

    let chunk = usize::from(control & 0x7f).max(1);
    for piece in stream.chunks(chunk) {
        state.feed(piece);
        loop {
            match state.next_packet() {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }
});
