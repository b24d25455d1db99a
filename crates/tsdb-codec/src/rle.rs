//! General-purpose byte-level run-length codec (spec §4.1).
//!
//! Each run is a `(value, count)` pair; count is one byte (1-255), so a
//! run longer than 255 is split across multiple chunks.

use tsdb_core::error::DecodeError;

const MAX_RUN: usize = 255;

#[derive(Debug, Default)]
pub struct RleCodec;

impl RleCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        if data.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(data.len() / 2 + 2);
        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            let mut run = 1;
            while run < MAX_RUN && i + run < data.len() && data[i + run] == byte {
                run += 1;
            }
            out.push(byte);
            out.push(run as u8);
            i += run;
        }
        out
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data.len() % 2 != 0 {
            return Err(DecodeError::Truncated);
        }
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks_exact(2) {
            let (byte, count) = (chunk[0], chunk[1]);
            if count == 0 {
                return Err(DecodeError::Invalid(count));
            }
            out.extend(std::iter::repeat(byte).take(count as usize));
        }
        Ok(out)
    }
}
