//! Value (XOR/Gorilla) codec (spec §4.1).
//!
//! `v0` is stored verbatim. Each later value is XORed against its
//! predecessor's bit pattern; the result is classified by how many
//! significant bits it needs and stored as a trailing-zero count plus a
//! fixed-width window (1 bit for an all-zero XOR, otherwise one byte,
//! 2 bytes, 4 bytes, or the full 8 bytes).

use crate::bits::{BitReader, BitWriter};
use crate::varint::{read_varint, write_varint};
use tsdb_core::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigClass {
    Narrow,
    Medium,
    Wide,
    Full,
}

impl SigClass {
    fn width(self) -> u32 {
        match self {
            SigClass::Narrow => 8,
            SigClass::Medium => 16,
            SigClass::Wide => 32,
            SigClass::Full => 64,
        }
    }

    fn code(self) -> u64 {
        match self {
            SigClass::Narrow => 0,
            SigClass::Medium => 1,
            SigClass::Wide => 2,
            SigClass::Full => 3,
        }
    }

    fn from_code(code: u64) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(SigClass::Narrow),
            1 => Ok(SigClass::Medium),
            2 => Ok(SigClass::Wide),
            _ => Ok(SigClass::Full),
        }
    }

    fn for_significant_bits(sig_bits: u32) -> Self {
        if sig_bits <= 8 {
            SigClass::Narrow
        } else if sig_bits <= 16 {
            SigClass::Medium
        } else if sig_bits <= 32 {
            SigClass::Wide
        } else {
            SigClass::Full
        }
    }
}

#[derive(Debug, Default)]
pub struct ValueCodec;

impl ValueCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, values: &[f64]) -> Vec<u8> {
        if values.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(values.len());
        write_varint(values.len() as u64, &mut out);
        out.extend_from_slice(&values[0].to_bits().to_le_bytes());

        let mut writer = BitWriter::new();
        let mut prev = values[0].to_bits();
        for &v in &values[1..] {
            let bits = v.to_bits();
            let x = bits ^ prev;
            if x == 0 {
                writer.push_bit(false);
            } else {
                writer.push_bit(true);
                let tz = x.trailing_zeros();
                let lz = x.leading_zeros();
                let sig_bits = 64 - lz - tz;
                let class = SigClass::for_significant_bits(sig_bits);
                writer.push_bits(class.code(), 2);
                writer.push_bits(tz as u64, 6);
                let width = class.width();
                let sig = if width == 64 {
                    x >> tz
                } else {
                    (x >> tz) & ((1u64 << width) - 1)
                };
                writer.push_bits(sig, width);
            }
            prev = bits;
        }
        out.extend(writer.finish());
        out
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<f64>, DecodeError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut pos = 0;
        let n = read_varint(data, &mut pos)? as usize;
        if n == 0 {
            return Ok(Vec::new());
        }
        let v0_bytes: [u8; 8] = data
            .get(pos..pos + 8)
            .ok_or(DecodeError::Truncated)?
            .try_into()
            .expect("8 bytes");
        pos += 8;
        let mut out = Vec::with_capacity(n);
        let mut prev = u64::from_le_bytes(v0_bytes);
        out.push(f64::from_bits(prev));

        let mut reader = BitReader::new(&data[pos..]);
        for _ in 1..n {
            let nonzero = reader.read_bit()?;
            let bits = if !nonzero {
                prev
            } else {
                let class = SigClass::from_code(reader.read_bits(2)?)?;
                let tz = reader.read_bits(6)? as u32;
                let sig = reader.read_bits(class.width())?;
                prev ^ (sig << tz)
            };
            out.push(f64::from_bits(bits));
            prev = bits;
        }
        Ok(out)
    }
}
