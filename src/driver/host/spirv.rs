//! Just enough SPIR-V reading to find kernel entry points and count
//! their parameters

use std::collections::HashMap;

use crate::{driver::ze, error::Status};

pub const MAGIC: u32 = 0x0723_0203;

const HEADER_WORDS: usize = 5;
const VERSION_1_0: u32 = 0x0001_0000;

const OP_ENTRY_POINT: u32 = 15;
const OP_FUNCTION: u32 = 54;
const OP_FUNCTION_PARAMETER: u32 = 55;
const OP_FUNCTION_END: u32 = 56;

const EXECUTION_MODEL_KERNEL: u32 = 6;

/// Kernel entry points of a module, mapped to their parameter counts
pub fn entry_points(image: &[u8]) -> Result<HashMap<String, u32>, Status> {
    if image.is_empty() {
        return Err(ze::status(ze::ERROR_INVALID_SIZE));
    }

    let invalid = || ze::status(ze::ERROR_INVALID_NATIVE_BINARY);

    if image.len() % 4 != 0 || image.len() < HEADER_WORDS * 4 {
        return Err(invalid());
    }

    let mut words: Vec<u32> =
        image.chunks_exact(4).map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]])).collect();

    match words[0] {
        MAGIC => {}
        swapped if swapped.swap_bytes() == MAGIC => words.iter_mut().for_each(|w| *w = w.swap_bytes()),
        _ => return Err(invalid()),
    }

    let mut entries = Vec::new();
    let mut params = HashMap::new();
    let mut current = None;

    let mut idx = HEADER_WORDS;
    while idx < words.len() {
        let count = (words[idx] >> 16) as usize;
        let opcode = words[idx] & 0xffff;

        if count == 0 || idx + count > words.len() {
            return Err(invalid());
        }

        let operands = &words[idx + 1..idx + count];

        match opcode {
            OP_ENTRY_POINT => {
                let [model, id, name @ ..] = operands else { return Err(invalid()) };
                if *model == EXECUTION_MODEL_KERNEL {
                    entries.push((*id, literal_string(name).ok_or_else(invalid)?));
                }
            }
            OP_FUNCTION => {
                let [_, id, ..] = operands else { return Err(invalid()) };
                current = Some((*id, 0));
            }
            OP_FUNCTION_PARAMETER => match current.as_mut() {
                Some((_, count)) => *count += 1,
                None => return Err(invalid()),
            },
            OP_FUNCTION_END => {
                let (id, count) = current.take().ok_or_else(invalid)?;
                params.insert(id, count);
            }
            _ => {}
        }

        idx += count;
    }

    if current.is_some() {
        return Err(invalid());
    }

    entries
        .into_iter()
        .map(|(id, name)| match params.get(&id) {
            Some(&count) => Ok((name, count)),
            None => Err(ze::status(ze::ERROR_MODULE_BUILD_FAILURE)),
        })
        .collect()
}

fn literal_string(words: &[u32]) -> Option<String> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let end = bytes.iter().position(|&b| b == 0)?;
    String::from_utf8(bytes[..end].to_vec()).ok()
}

/// Assemble a minimal module declaring one kernel per `(name, params)`
pub fn assemble(kernels: &[(&str, u32)]) -> Vec<u8> {
    let mut next_id = 1;
    let mut body = Vec::new();
    let mut entries = Vec::new();

    for &(name, param_count) in kernels {
        let id = next_id;
        next_id += 1;

        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);
        name_bytes.resize(name_bytes.len().next_multiple_of(4), 0);
        let name_words: Vec<u32> =
            name_bytes.chunks_exact(4).map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]])).collect();

        entries.push(instruction(OP_ENTRY_POINT, 3 + name_words.len()));
        entries.extend([EXECUTION_MODEL_KERNEL, id]);
        entries.extend(name_words);

        body.extend([instruction(OP_FUNCTION, 5), 0, id, 0, 0]);
        for _ in 0..param_count {
            body.extend([instruction(OP_FUNCTION_PARAMETER, 3), 0, next_id]);
            next_id += 1;
        }
        body.push(instruction(OP_FUNCTION_END, 1));
    }

    [MAGIC, VERSION_1_0, 0, next_id, 0].into_iter().chain(entries).chain(body).flat_map(u32::to_le_bytes).collect()
}

fn instruction(opcode: u32, word_count: usize) -> u32 {
    ((word_count as u32) << 16) | opcode
}
