//! Fuzz target: store metadata validation
//!
//! Drives arbitrary bytes through `StoreMeta::from_bytes` and, separately,
//! plants them as the on-flash metadata region before opening a record
//! log.  Verifies:
//! - No panics on any input
//! - A validated decode re-encodes to a decodable region
//! - The log always opens into a writable state, however damaged the
//!   region was
//!
//! cargo fuzz run fuzz_store_meta

#![no_main]

use libfuzzer_sys::fuzz_target;
use wisp::adapters::nvs::NvsStore;
use wisp::app::ports::{StorageError, StoragePort};
use wisp::config::StoreLayout;
use wisp::records::PuffRecord;
use wisp::store::meta::StoreMeta;
use wisp::store::{META_KEY, RecordLog, STORE_NAMESPACE};

fuzz_target!(|data: &[u8]| {
    if let Some(decoded) = StoreMeta::from_bytes(data) {
        let reencoded = decoded.to_bytes();
        assert_eq!(
            StoreMeta::from_bytes(&reencoded),
            Some(decoded),
            "validated metadata must survive a re-encode"
        );
    }

    // However mangled the stored region is, opening must yield a log that
    // accepts commits (or reports the index space exhausted — never a
    // panic, never a poisoned log).
    let mut storage = NvsStore::new().unwrap();
    storage.write(STORE_NAMESPACE, META_KEY, data).unwrap();
    let mut log = RecordLog::open(storage, StoreLayout::default());
    let record = PuffRecord {
        puff_number: 1,
        timestamp_sec: 1_800_000_000,
        duration_ms: 1_500,
        phase_index: 0,
    };
    match log.append_puff(&record) {
        Ok(()) | Err(StorageError::Full) => {}
        Err(e) => panic!("unexpected append failure: {e}"),
    }
});
