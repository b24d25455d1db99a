//! Delta-of-delta timestamp codec (spec §4.1).
//!
//! `t0` and `delta1 = t1 - t0` are stored verbatim (as 8-byte little-endian
//! integers); every later delta-of-delta is zigzag-encoded then LEB128.
//! The stream is split into sub-blocks whose length the encoder picks from
//! `config`'s range, biasing toward the larger end when the observed
//! intervals are regular. Sub-block boundaries are purely an encoding
//! detail: `decode` reassembles one flat `Vec<i64>` regardless of how many
//! sub-blocks were used.

use std::sync::atomic::{AtomicU64, Ordering};

use tsdb_core::error::DecodeError;

use crate::varint::{read_varint, write_varint, zigzag_decode, zigzag_encode};

#[derive(Debug, Clone, Copy)]
pub struct TimestampCodecConfig {
    pub min_block_size: usize,
    pub max_block_size: usize,
}

impl Default for TimestampCodecConfig {
    fn default() -> Self {
        Self {
            min_block_size: 64,
            max_block_size: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct TimestampStats {
    blocks_processed: AtomicU64,
    irregular_intervals: AtomicU64,
    dd_count: AtomicU64,
    dd_abs_sum: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimestampStatsSnapshot {
    pub blocks_processed: u64,
    pub irregular_intervals: u64,
    pub mean_abs_dd: f64,
}

#[derive(Debug, Default)]
pub struct TimestampCodec {
    config: TimestampCodecConfig,
    stats: TimestampStats,
}

impl TimestampCodec {
    pub fn new(config: TimestampCodecConfig) -> Self {
        Self {
            config,
            stats: TimestampStats::default(),
        }
    }

    pub fn stats(&self) -> TimestampStatsSnapshot {
        let dd_count = self.stats.dd_count.load(Ordering::Relaxed);
        let mean_abs_dd = if dd_count == 0 {
            0.0
        } else {
            self.stats.dd_abs_sum.load(Ordering::Relaxed) as f64 / dd_count as f64
        };
        TimestampStatsSnapshot {
            blocks_processed: self.stats.blocks_processed.load(Ordering::Relaxed),
            irregular_intervals: self.stats.irregular_intervals.load(Ordering::Relaxed),
            mean_abs_dd,
        }
    }

    pub fn reset_stats(&self) {
        self.stats.blocks_processed.store(0, Ordering::Relaxed);
        self.stats.irregular_intervals.store(0, Ordering::Relaxed);
        self.stats.dd_count.store(0, Ordering::Relaxed);
        self.stats.dd_abs_sum.store(0, Ordering::Relaxed);
    }

    pub fn encode(&self, timestamps: &[i64]) -> Vec<u8> {
        if timestamps.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(timestamps.len() * 2);
        write_varint(timestamps.len() as u64, &mut out);

        let mut idx = 0;
        while idx < timestamps.len() {
            let remaining = &timestamps[idx..];
            let block_len = self.choose_block_size(remaining);
            write_varint(block_len as u64, &mut out);
            self.encode_block(&remaining[..block_len], &mut out);
            self.stats.blocks_processed.fetch_add(1, Ordering::Relaxed);
            idx += block_len;
        }
        out
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<i64>, DecodeError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut pos = 0;
        let total = read_varint(data, &mut pos)? as usize;
        let mut out = Vec::with_capacity(total);
        while out.len() < total {
            let block_len = read_varint(data, &mut pos)? as usize;
            self.decode_block(data, &mut pos, block_len, &mut out)?;
        }
        if out.len() != total {
            return Err(DecodeError::Truncated);
        }
        Ok(out)
    }

    fn encode_block(&self, block: &[i64], out: &mut Vec<u8>) {
        out.extend_from_slice(&block[0].to_le_bytes());
        if block.len() < 2 {
            return;
        }
        let delta1 = block[1] - block[0];
        out.extend_from_slice(&delta1.to_le_bytes());
        let mut prev = block[1];
        let mut prev_delta = delta1;
        for &t in &block[2..] {
            let delta = t - prev;
            let dd = delta - prev_delta;
            write_varint(zigzag_encode(dd), out);
            if dd != 0 {
                self.stats.irregular_intervals.fetch_add(1, Ordering::Relaxed);
            }
            self.stats.dd_count.fetch_add(1, Ordering::Relaxed);
            self.stats
                .dd_abs_sum
                .fetch_add(dd.unsigned_abs(), Ordering::Relaxed);
            prev = t;
            prev_delta = delta;
        }
    }

    fn decode_block(
        &self,
        data: &[u8],
        pos: &mut usize,
        block_len: usize,
        out: &mut Vec<i64>,
    ) -> Result<(), DecodeError> {
        if block_len == 0 {
            return Ok(());
        }
        let t0 = read_i64(data, pos)?;
        out.push(t0);
        if block_len == 1 {
            return Ok(());
        }
        let delta1 = read_i64(data, pos)?;
        let t1 = t0 + delta1;
        out.push(t1);
        let mut prev = t1;
        let mut prev_delta = delta1;
        for _ in 2..block_len {
            let dd = zigzag_decode(read_varint(data, pos)?);
            let delta = prev_delta + dd;
            let t = prev + delta;
            out.push(t);
            prev = t;
            prev_delta = delta;
        }
        Ok(())
    }

    /// Picks a sub-block length in `[min_block_size, max_block_size]`
    /// (clamped to the remaining length), biasing toward the max when the
    /// first few intervals look regular.
    fn choose_block_size(&self, remaining: &[i64]) -> usize {
        let max = self.config.max_block_size.min(remaining.len()).max(1);
        let min = self.config.min_block_size.min(max).max(1);
        if remaining.len() <= min {
            return remaining.len();
        }
        let sample = remaining.len().min(8);
        let regular = (2..sample)
            .map(|i| remaining[i] - remaining[i - 1])
            .collect::<Vec<_>>()
            .windows(2)
            .all(|w| w[0] == w[1]);
        if regular { max } else { min }
    }
}

fn read_i64(data: &[u8], pos: &mut usize) -> Result<i64, DecodeError> {
    let end = *pos + 8;
    let bytes: [u8; 8] = data
        .get(*pos..end)
        .ok_or(DecodeError::Truncated)?
        .try_into()
        .expect("slice of len 8");
    *pos = end;
    Ok(i64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_round_trips_to_empty() {
        let codec = TimestampCodec::default();
        assert!(codec.encode(&[]).is_empty());
        assert_eq!(codec.decode(&[]).unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn single_value_round_trips() {
        let codec = TimestampCodec::default();
        let encoded = codec.encode(&[1000]);
        assert_eq!(codec.decode(&encoded).unwrap(), vec![1000]);
    }

    #[test]
    fn regular_interval_round_trips() {
        let codec = TimestampCodec::default();
        let ts: Vec<i64> = (0..500).map(|i| 1000 + i * 15).collect();
        let encoded = codec.encode(&ts);
        assert_eq!(codec.decode(&encoded).unwrap(), ts);
        assert!(codec.stats().irregular_intervals == 0);
    }

    #[test]
    fn irregular_interval_round_trips_and_counts_irregularity() {
        let codec = TimestampCodec::default();
        let ts = vec![1000, 2000, 2500, 8000, 8001, 20000];
        let encoded = codec.encode(&ts);
        assert_eq!(codec.decode(&encoded).unwrap(), ts);
        assert!(codec.stats().irregular_intervals > 0);
    }

    #[test]
    fn spans_multiple_sub_blocks() {
        let codec = TimestampCodec::new(TimestampCodecConfig {
            min_block_size: 4,
            max_block_size: 8,
        });
        let ts: Vec<i64> = (0..37).map(|i| 1000 + i * 7).collect();
        let encoded = codec.encode(&ts);
        assert_eq!(codec.decode(&encoded).unwrap(), ts);
        assert!(codec.stats().blocks_processed >= 5);
    }

    #[test]
    fn truncated_input_errors() {
        let codec = TimestampCodec::default();
        let ts: Vec<i64> = (0..20).map(|i| 1000 + i * 3).collect();
        let encoded = codec.encode(&ts);
        for cut in 1..encoded.len() {
            let truncated = &encoded[..encoded.len() - cut];
            assert!(codec.decode(truncated).is_err());
        }
    }

    #[test]
    fn reset_stats_clears_counters() {
        let codec = TimestampCodec::default();
        codec.encode(&[1, 3, 7, 12]);
        assert!(codec.stats().blocks_processed > 0);
        codec.reset_stats();
        assert_eq!(codec.stats(), TimestampStatsSnapshot::default());
    }
}
