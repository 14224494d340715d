//! Fuzz target for IRC message parsing
//!
//! Feeds arbitrary bytes to the zero-copy parser and walks every lazy
//! iterator, ensuring nothing panics on hostile wire input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::str;

use comlink_core::message::MessageRef;

fuzz_target!(|data: &[u8]| {
    // Only fuzz valid UTF-8 strings to focus on protocol-level issues
    if let Ok(input) = str::from_utf8(data) {
        // Skip empty inputs and very long inputs (over 8191 bytes exceeds the codec limit)
        if input.is_empty() || input.len() > 8191 {
            return;
        }

        if let Ok(msg) = MessageRef::parse(input) {
            // Force both lazy iterators all the way through
            for tag in msg.tags() {
                let _ = tag.unescaped_value();
            }
            for param in msg.params() {
                let _ = param.len();
            }
            let _ = msg.source_nick();
        }
    }
});
