//! Fuzz target for `_id` string forms.
//!
//! Decodes arbitrary bytes as a BSON document and renders its `_id`, which
//! must never panic whatever the value's type.

#![no_main]

use changestream_mirror::applier::{filter_id, id_string};
use changestream_mirror::IdMatch;
use libfuzzer_sys::fuzz_target;
use mongodb::bson::Document;

fuzz_target!(|data: &[u8]| {
    let Ok(doc) = Document::from_reader(data) else {
        return;
    };
    if let Some(id) = doc.get("_id") {
        let s = id_string(id);
        let _ = filter_id(id, IdMatch::StringForm);
        let _ = filter_id(id, IdMatch::Native);
        if let Some(plain) = id.as_str() {
            assert_eq!(s, plain);
        }
    }
});
