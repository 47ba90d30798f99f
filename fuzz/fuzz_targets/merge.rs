#![no_main]

use abcmerge::{AbcMerger, MergeConfig, ModuleInput};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = ModuleInput::new(data.to_vec()) else {
        return;
    };
    let _ = AbcMerger::new(MergeConfig::new().peephole(true)).merge(&[input]);
});
