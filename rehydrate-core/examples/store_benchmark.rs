/*!
Simple benchmark of record store writes and verified reads.
*/

use rehydrate_core::{LocalFileStorage, Store};
use std::sync::Arc;
use std::time::Instant;

fn main() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let store = Store::new(Arc::new(LocalFileStorage::with_base_dir(temp_dir.path())));
    store.set_encryption_key(Some("benchmark-key")).unwrap();

    // Sample editor state
    let document = serde_json::json!({
        "title": "Release notes",
        "cursor": {"line": 42, "column": 7},
        "paragraphs": (0..200)
            .map(|i| format!("Paragraph {i}: the quick brown fox jumps over the lazy dog."))
            .collect::<Vec<_>>(),
        "settings": {"theme": "dark", "font_size": 14, "spellcheck": true},
        "dirty": false
    });
    let text_len = serde_json::to_string(&document).unwrap().len();

    for (compress, encrypt) in [(false, false), (true, false), (false, true), (true, true)] {
        let key = format!("bench_c{}_e{}", compress as u8, encrypt as u8);

        let start = Instant::now();
        store.put(&key, &document, compress, encrypt).unwrap();
        let loaded = store.get(&key, true, true).unwrap().unwrap();
        let duration = start.elapsed();

        assert_eq!(loaded, document);

        let file_len = std::fs::metadata(temp_dir.path().join(format!("{key}.json")))
            .unwrap()
            .len();
        println!(
            "compress={compress:<5} encrypt={encrypt:<5} round trip {duration:?}, record {file_len} bytes ({:.2}% of {text_len})",
            file_len as f64 / text_len as f64 * 100.0
        );
    }
}
