//! Windows environment block encoding
//!
//! A block is a sequence of `name=value` UTF-16 strings, each terminated by a
//! NUL, with one more NUL closing the block.

use super::LaunchError;
use crate::environment::EnvTable;

/// Encode `env` in table order.
///
/// Fails if any name or value contains an embedded NUL, since that would
/// silently split or truncate the block.
pub fn encode_environment_block(env: &EnvTable) -> Result<Vec<u16>, LaunchError> {
    let mut block: Vec<u16> = Vec::with_capacity(1024);
    for (name, value) in env.iter() {
        if name.contains('\0') || value.contains('\0') {
            return Err(LaunchError::InvalidEnvironment {
                name: name.replace('\0', "\\0"),
            });
        }
        if name.is_empty() {
            continue;
        }
        block.extend(name.encode_utf16());
        block.push(u16::from(b'='));
        block.extend(value.encode_utf16());
        block.push(0);
    }
    if block.is_empty() {
        // an empty block still needs two terminators
        block.push(0);
    }
    block.push(0);
    Ok(block)
}

/// Decode a block up to its terminating empty entry.
///
/// Entries whose name starts with `=` (per-drive working directories) keep
/// that leading `=` as part of their name.
pub fn decode_environment_block(block: &[u16]) -> EnvTable {
    let mut table = EnvTable::new();
    for entry in block.split(|&c| c == 0) {
        if entry.is_empty() {
            break;
        }
        let entry = String::from_utf16_lossy(entry);
        let split = entry
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '=')
            .map(|(i, _)| i);
        match split {
            Some(i) => table.set(&entry[..i], &entry[i + 1..]),
            None => table.set(entry, ""),
        }
    }
    table
}
