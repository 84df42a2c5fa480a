//! Proxy-Wasm Wire Codec
//!
//! Serialization of header maps and property paths as they cross the ABI.
//!
//! Map format (all integers little-endian u32):
//! `[num_pairs][key1_len][val1_len]...[keyN_len][valN_len][key1\0][val1\0]...`

use anyhow::{anyhow, bail, Context as _};

use crate::types::Bytes;

/// Size of one length field
const LEN_SIZE: usize = 4;

/// Serialize key/value pairs, preserving order and duplicates
pub fn serialize_map(map: &[(&str, &str)]) -> Bytes {
    let mut size = LEN_SIZE;
    for (name, value) in map {
        size += 2 * LEN_SIZE + name.len() + value.len() + 2;
    }
    let mut bytes = Vec::with_capacity(size);
    bytes.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (name, value) in map {
        bytes.extend_from_slice(&(name.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
    }
    for (name, value) in map {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
    }
    bytes
}

/// Deserialize key/value pairs
///
/// An empty input is an empty map.
pub fn deserialize_map(bytes: &[u8]) -> anyhow::Result<Vec<(String, String)>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let num_pairs = read_u32(bytes, 0).context("missing pair count")? as usize;
    let mut data = num_pairs
        .checked_mul(2 * LEN_SIZE)
        .and_then(|n| n.checked_add(LEN_SIZE))
        .ok_or_else(|| anyhow!("pair count {} overflows", num_pairs))?;
    if data > bytes.len() {
        bail!(
            "pair count {} needs {} bytes of lengths, have {}",
            num_pairs,
            data,
            bytes.len()
        );
    }

    let mut map = Vec::with_capacity(num_pairs);
    for n in 0..num_pairs {
        let header = LEN_SIZE + n * 2 * LEN_SIZE;
        let key_len = read_u32(bytes, header)? as usize;
        let value_len = read_u32(bytes, header + LEN_SIZE)? as usize;

        let key = read_terminated(bytes, data, key_len)
            .with_context(|| format!("pair {} name", n))?;
        data += key_len + 1;
        let value = read_terminated(bytes, data, value_len)
            .with_context(|| format!("pair {} value", n))?;
        data += value_len + 1;

        map.push((key, value));
    }
    Ok(map)
}

/// Serialize a property path as NUL-separated segments
pub fn serialize_property_path(path: &[&str]) -> Bytes {
    if path.is_empty() {
        return Vec::new();
    }
    let size = path.iter().map(|part| part.len() + 1).sum::<usize>() - 1;
    let mut bytes = Vec::with_capacity(size);
    for (i, part) in path.iter().enumerate() {
        if i > 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(part.as_bytes());
    }
    bytes
}

/// Split a serialized property path back into segments
pub fn deserialize_property_path(bytes: &[u8]) -> anyhow::Result<Vec<String>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    bytes
        .split(|b| *b == 0)
        .map(|part| String::from_utf8(part.to_vec()).context("property path segment"))
        .collect()
}

fn read_u32(bytes: &[u8], offset: usize) -> anyhow::Result<u32> {
    let field = bytes
        .get(offset..offset + LEN_SIZE)
        .ok_or_else(|| anyhow!("length field at {} out of bounds ({} bytes)", offset, bytes.len()))?;
    let mut raw = [0u8; LEN_SIZE];
    raw.copy_from_slice(field);
    Ok(u32::from_le_bytes(raw))
}

fn read_terminated(bytes: &[u8], start: usize, len: usize) -> anyhow::Result<String> {
    let end = start
        .checked_add(len)
        .ok_or_else(|| anyhow!("length {} overflows", len))?;
    let field = bytes
        .get(start..end)
        .ok_or_else(|| anyhow!("{} bytes at {} out of bounds ({} bytes)", len, start, bytes.len()))?;
    if bytes.get(end) != Some(&0) {
        bail!("missing NUL terminator at {}", end);
    }
    String::from_utf8(field.to_vec()).context("not valid UTF-8")
}
