#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(sort) = bookshelf::query::parse_sort(s)
    {
        let _ = bookshelf::query::build(&bookshelf::query::Filter::all(), None, Some(&sort), None);
    }
});
