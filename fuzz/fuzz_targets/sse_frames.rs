#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |byte| usize::from(*byte));
    let whole = servebench::fuzzing::sse_frames_input(data, data.len());
    let halves = servebench::fuzzing::sse_frames_input(data, split);
    debug_assert_eq!(whole, halves);
});
