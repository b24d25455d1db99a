//! Per-block label dictionary codec (spec §4.1).
//!
//! Maintains a monotonic `string -> u32` table. Encoded label pairs are a
//! sequence of `(nameId, valueId)` pairs; the dictionary itself is
//! serialized ahead of the pairs so a block can be decoded standalone.

use std::collections::HashMap;

use tsdb_core::error::DecodeError;

use crate::varint::{read_varint, write_varint};

#[derive(Debug, Default, Clone)]
pub struct LabelDictionary {
    strings: Vec<String>,
    ids: HashMap<String, u32>,
}

impl LabelDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `s`, interning it if not already present.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.ids.insert(s.to_string(), id);
        id
    }

    pub fn resolve(&self, id: u32) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Serializes the dictionary table: count, then each string
    /// length-prefixed.
    pub fn encode_table(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(self.strings.len() as u64, &mut out);
        for s in &self.strings {
            write_varint(s.len() as u64, &mut out);
            out.extend_from_slice(s.as_bytes());
        }
        out
    }

    pub fn decode_table(data: &[u8], pos: &mut usize) -> Result<Self, DecodeError> {
        let count = read_varint(data, pos)? as usize;
        let mut dict = LabelDictionary::new();
        for _ in 0..count {
            let len = read_varint(data, pos)? as usize;
            let bytes = data.get(*pos..*pos + len).ok_or(DecodeError::Truncated)?;
            *pos += len;
            let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::Invalid(0))?;
            dict.intern(s);
        }
        Ok(dict)
    }

    /// Encodes a sequence of (name, value) pairs as `(nameId, valueId)`
    /// varints against this dictionary, interning as needed.
    pub fn encode_pairs<'a>(&mut self, pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<u8> {
        let mut out = Vec::new();
        let pairs: Vec<_> = pairs.collect();
        write_varint(pairs.len() as u64, &mut out);
        for (name, value) in pairs {
            let name_id = self.intern(name);
            let value_id = self.intern(value);
            write_varint(name_id as u64, &mut out);
            write_varint(value_id as u64, &mut out);
        }
        out
    }

    pub fn decode_pairs(
        &self,
        data: &[u8],
        pos: &mut usize,
    ) -> Result<Vec<(String, String)>, DecodeError> {
        let count = read_varint(data, pos)? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name_id = read_varint(data, pos)? as u32;
            let value_id = read_varint(data, pos)? as u32;
            let name = self
                .resolve(name_id)
                .ok_or(DecodeError::Invalid(0))?
                .to_string();
            let value = self
                .resolve(value_id)
                .ok_or(DecodeError::Invalid(0))?
                .to_string();
            out.push((name, value));
        }
        Ok(out)
    }
}
