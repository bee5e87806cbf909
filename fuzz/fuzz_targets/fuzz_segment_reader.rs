// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for reading arbitrary bytes as a WAL segment

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use tsm_wal::frame::find_next_frame;
use tsm_wal::SegmentReader;

fuzz_target!(|data: &[u8]| {
    let mut reader = SegmentReader::new(Cursor::new(data));
    while reader.advance() {
        // Frames that pass the checksum must still decode without panicking.
        let _ = reader.read();
    }
    assert!(reader.offset() <= data.len() as u64);

    if let Some(next) = find_next_frame(data) {
        assert!(next < data.len());
    }
});
