#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for dcid_len in [0, 8, 20] {
        if let Ok((_, pn_offset)) = quico::packet::parse_header(data, dcid_len) {
            assert!(pn_offset <= data.len());
        }
    }

    for packet in quico::packet::CoalescedPackets::new(data) {
        match packet {
            Ok(packet) => assert!(!packet.is_empty()),
            Err(_) => break,
        }
    }

    // Initial keys derived from an arbitrary DCID must never open garbage.
    if data.len() > 21 {
        if let Ok(keys) = quico::crypto::KeyPair::initial(&data[1..9]) {
            let _ = quico::packet::open_packet(&keys.read, data, 18, 0);
        }
    }
});
