#![no_main]

use libfuzzer_sys::fuzz_target;
use quico::varint::{decode_varint, encode_varint, varint_len};

fuzz_target!(|data: &[u8]| {
    if let Ok((value, consumed)) = decode_varint(data) {
        let mut buf = [0u8; 8];
        let written = encode_varint(value, &mut buf).unwrap();
        let (again, used) = decode_varint(&buf[..written]).unwrap();
        assert_eq!(value, again);
        assert_eq!(used, written);
        assert_eq!(written, varint_len(value));
        // non-minimal encodings are accepted on input
        assert!(consumed >= written);
    }
});
