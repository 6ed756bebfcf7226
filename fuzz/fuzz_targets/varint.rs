#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tlogpeek_core::varint;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic, and every successfully
    // decoded value must re-encode to a decodable form.
    let mut pos = 0;
    if let Ok(value) = varint::decode_u64(data, &mut pos) {
        assert!(pos <= data.len());

        let mut buf = BytesMut::new();
        varint::encode_u64(&mut buf, value);
        let mut check = 0;
        let decoded = varint::decode_u64(&buf, &mut check).expect("reencoded varint");
        assert_eq!(decoded, value);
        assert_eq!(check, buf.len());
    }

    let mut pos = 0;
    let _ = varint::decode_u32(data, &mut pos);
});
