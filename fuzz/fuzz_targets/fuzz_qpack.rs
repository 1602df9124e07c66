#![no_main]

use libfuzzer_sys::fuzz_target;
use quico::h3::qpack::{self, DynamicTable, MAX_TABLE_CAPACITY};

fuzz_target!(|data: &[u8]| {
    // First half feeds the encoder stream, the rest is a field section.
    let split = data.first().map_or(0, |&b| b as usize % (data.len() + 1));
    let (instructions, block) = data.split_at(split);

    let mut table = DynamicTable::new(MAX_TABLE_CAPACITY);
    if let Ok((parsed, _)) = qpack::parse_encoder_instructions(instructions) {
        for instruction in &parsed {
            if instruction.apply(&mut table).is_err() {
                break;
            }
        }
    }
    let _ = qpack::decode_field_section(block, &table);
    let _ = qpack::huffman::decode(block);
});
