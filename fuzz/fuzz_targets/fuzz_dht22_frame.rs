//! Fuzz target: `dht22::decode_frame`
//!
//! Arbitrary 5-byte payloads must either decode or be rejected by the
//! checksum; an accepted frame must re-encode to the same bytes unless it
//! carries negative zero.
//!
//! cargo fuzz run fuzz_dht22_frame

#![no_main]

use libfuzzer_sys::fuzz_target;
use terrarium::sensors::dht22::{FRAME_LEN, checksum, decode_frame, encode_frame};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = <[u8; FRAME_LEN]>::try_from(data) else {
        return;
    };

    match decode_frame(&frame) {
        Ok(m) => {
            assert_eq!(checksum(&frame), frame[4]);
            let negative_zero = frame[2] == 0x80 && frame[3] == 0;
            if !negative_zero {
                assert_eq!(encode_frame(m), frame);
            }
        }
        Err(_) => assert_ne!(checksum(&frame), frame[4]),
    }
});
