#![no_main]

use libfuzzer_sys::fuzz_target;
use stacksampler::maps::MemoryMap;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Must never panic, and whatever survives must be a sane range
        let map = MemoryMap::parse(input);
        for mapping in map.mappings() {
            assert!(mapping.start_address < mapping.end_address);
            assert!(mapping.backing_path.is_absolute());
        }
        let _ = map.by_image();
    }
});
