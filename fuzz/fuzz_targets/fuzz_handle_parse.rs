#![no_main]
use blockfile_rs::Handle;
use libfuzzer_sys::fuzz_target;

// Arbitrary text must never panic the handle parser, and anything it
// accepts must print back to an equal handle
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(handle) = text.parse::<Handle>() {
        let again: Handle = handle
            .to_string()
            .parse()
            .expect("printed handle must parse");
        assert_eq!(again, handle);
        assert!(handle.end_block() >= handle.start_block() as u64);
    }
});
