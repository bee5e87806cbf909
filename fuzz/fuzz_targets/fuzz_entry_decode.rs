// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for decoding WAL entry payloads

#![no_main]

use libfuzzer_sys::fuzz_target;
use tsm_wal::{Compression, WalEntry};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, payload)) = data.split_first() else {
        return;
    };

    let kind = if selector & 1 == 0 {
        tsm_wal::EntryKind::Write
    } else {
        tsm_wal::EntryKind::Delete
    };
    let compression = if selector & 2 == 0 {
        Compression::Lz4
    } else {
        Compression::Uncompressed
    };

    // Anything that decodes must encode back to the same entry.
    if let Ok(entry) = tsm_wal::codec::decode(kind, compression, payload) {
        let encoded = entry.encode().expect("decoded entry re-encodes");
        let again = WalEntry::decode(kind, &encoded).expect("re-encoded entry decodes");
        assert_eq!(again, entry);
    }
});
