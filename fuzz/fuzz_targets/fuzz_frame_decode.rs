#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any input: Ok or Err, never a panic.
    let _ = quico::frame::decode(data);

    let frames = quico::frame::parse_frames(data);
    for frame in &frames {
        let mut out = Vec::new();
        let _ = quico::frame::encode(frame, &mut out);
        if let quico::frame::Frame::Ack(ack) = frame {
            let _ = quico::frame::ack_info_to_ranges(ack);
        }
    }
});
