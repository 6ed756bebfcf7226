#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tlogpeek_core::MessageDeserializer;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the block deserializer.
    // It must handle all malformed inputs gracefully:
    // - Truncated headers and trailers
    // - Bad magic words
    // - CRC32 mismatches
    // - Corrupted varints (overlong, truncated)
    // - Unknown message tags
    // - Payload lengths running past the block
    let bytes = Bytes::copy_from_slice(data);

    if let Ok(mut deserializer) = MessageDeserializer::new(bytes) {
        // If the frame validated, iteration must be total.
        let _ = deserializer.team_id();
        let _ = deserializer.first_version();
        let _ = deserializer.last_version();

        let mut count = 0usize;
        while let Some(record) = deserializer.peek() {
            let _ = record.position();
            deserializer.advance();
            count += 1;
        }

        // Rewinding replays the same number of records.
        deserializer.rewind();
        let mut replayed = 0usize;
        while deserializer.peek().is_some() {
            deserializer.advance();
            replayed += 1;
        }
        assert_eq!(count, replayed);
    }
});
