#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = quico::h3::frame::decode(data);

    // Stream reassembly view: frames up to the last complete one.
    if let Ok((frames, end)) = quico::h3::extract_frames(data, 0) {
        assert!(end as usize <= data.len());
        for frame in frames {
            if let quico::h3::H3Frame::Settings(settings) = frame {
                let mut out = Vec::new();
                settings.encode(&mut out).unwrap();
            }
        }
    }
});
