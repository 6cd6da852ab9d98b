//! Fuzz target: history request parser
//!
//! Feeds arbitrary bytes to `parse_history_request` and asserts that it
//! never panics, only accepts the exact 4-byte request shape, and decodes
//! the cursor losslessly when it does accept.
//!
//! cargo fuzz run fuzz_history_request

#![no_main]

use libfuzzer_sys::fuzz_target;
use wisp::link::frames::{self, OP_HISTORY_REQUEST};

fuzz_target!(|data: &[u8]| {
    match frames::parse_history_request(data) {
        Ok(req) => {
            assert_eq!(data.len(), 4, "parser accepted a frame of the wrong size");
            assert_eq!(data[0], OP_HISTORY_REQUEST, "parser accepted a foreign opcode");
            assert_eq!(req.start_after, u16::from_le_bytes([data[1], data[2]]));
            assert_eq!(req.max_count, data[3]);
        }
        Err(_) => {
            assert!(
                data.len() != 4 || data[0] != OP_HISTORY_REQUEST,
                "parser rejected a well-formed request"
            );
        }
    }
});
