#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(config) = servebench::fuzzing::registration_json_input(input) {
            debug_assert!(!config.model_name.is_empty());
        }
    }
});
