#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(filter) = bookshelf::query::parse_filter_json(s)
    {
        // Whatever parses must either build or be rejected as an invalid spec.
        let _ = bookshelf::query::build(&filter, None, None, None);
    }
});
