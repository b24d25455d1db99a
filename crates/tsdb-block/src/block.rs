//! The immutable columnar block container (spec §4.2).
//!
//! A block holds one or more series over a bounded time range. While open,
//! samples are buffered per series in memory; `seal` encodes every series'
//! columns (timestamp delta-of-delta, value XOR or adaptive, optional
//! fields), writes a small per-series directory after the header, and
//! computes the header's crc32 over everything that follows it.

use std::collections::BTreeMap;

use tsdb_codec::{LabelDictionary, RleCodec, TimestampCodec, ValueCodec};
use tsdb_core::error::Error;
use tsdb_core::{LabelMatcher, LabelSet, Sample, SeriesId};

use crate::header::{BlockFlags, BlockHeader, HEADER_LEN};

/// Tag byte identifying which codec produced a series' value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ValueTag {
    Raw = 0,
    Gorilla = 1,
}

impl ValueTag {
    fn from_byte(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(ValueTag::Raw),
            1 => Ok(ValueTag::Gorilla),
            other => Err(Error::Corrupt(format!("bad value column tag {other}"))),
        }
    }
}

struct OpenSeries {
    labels: LabelSet,
    timestamps: Vec<i64>,
    values: Vec<f64>,
    fields: Vec<BTreeMap<String, String>>,
    last_timestamp: Option<i64>,
}

struct SealedSeries {
    id: SeriesId,
    labels: LabelSet,
    start_time: i64,
    end_time: i64,
    num_samples: u32,
    ts_bytes: Vec<u8>,
    val_bytes: Vec<u8>,
    val_tag: ValueTag,
    fields_bytes: Vec<u8>,
}

/// A decoded (timestamp, value) pair plus any per-sample fields, for
/// `Block::read`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub timestamp_ms: i64,
    pub value: f64,
    pub fields: BTreeMap<String, String>,
}

pub struct Block {
    header: BlockHeader,
    open: BTreeMap<SeriesId, OpenSeries>,
    sealed: Vec<SealedSeries>,
    dictionary: LabelDictionary,
    is_sealed: bool,
    open_sample_count: u64,
}

impl Block {
    /// Creates a new open block for the half-open time window
    /// `[start, end]`. Refuses `start > end`.
    pub fn create(start: i64, end: i64) -> Result<Self, Error> {
        if start > end {
            return Err(Error::InvalidArgument(format!(
                "block start {start} is after end {end}"
            )));
        }
        Ok(Self {
            header: BlockHeader::new(start, end),
            open: BTreeMap::new(),
            sealed: Vec::new(),
            dictionary: LabelDictionary::new(),
            is_sealed: false,
            open_sample_count: 0,
        })
    }

    pub fn is_sealed(&self) -> bool {
        self.is_sealed
    }

    /// Appends one sample for `id`. Requires the timestamp to be strictly
    /// greater than the last timestamp appended for this series.
    pub fn append(&mut self, id: SeriesId, labels: &LabelSet, sample: &Sample) -> Result<(), Error> {
        if self.is_sealed {
            return Err(Error::InvalidArgument("block is sealed".into()));
        }
        let entry = self.open.entry(id).or_insert_with(|| OpenSeries {
            labels: labels.clone(),
            timestamps: Vec::new(),
            values: Vec::new(),
            fields: Vec::new(),
            last_timestamp: None,
        });
        if let Some(last) = entry.last_timestamp {
            if sample.timestamp_ms <= last {
                return Err(Error::Ordering {
                    last,
                    timestamp: sample.timestamp_ms,
                });
            }
        }
        entry.timestamps.push(sample.timestamp_ms);
        entry.values.push(sample.value);
        entry.fields.push(sample.fields.clone());
        entry.last_timestamp = Some(sample.timestamp_ms);
        self.open_sample_count += 1;
        self.header.end_time = self.header.end_time.max(sample.timestamp_ms);
        Ok(())
    }

    /// Finalizes columns, computes the payload crc32, and marks the block
    /// immutable. Idempotent.
    pub fn seal(&mut self) -> Result<(), Error> {
        if self.is_sealed {
            return Ok(());
        }
        let timestamp_codec = TimestampCodec::default();
        let value_codec = ValueCodec::new();
        let rle = RleCodec::new();

        for (id, open) in std::mem::take(&mut self.open) {
            let ts_bytes = timestamp_codec.encode(&open.timestamps);
            let val_bytes = value_codec.encode(&open.values);
            let fields_bytes = encode_fields(&mut self.dictionary, &open.fields, &rle);
            let start_time = *open.timestamps.first().unwrap_or(&self.header.start_time);
            let end_time = *open.timestamps.last().unwrap_or(&self.header.end_time);
            self.sealed.push(SealedSeries {
                id,
                labels: open.labels,
                start_time,
                end_time,
                num_samples: open.timestamps.len() as u32,
                ts_bytes,
                val_bytes,
                val_tag: ValueTag::Gorilla,
                fields_bytes,
            });
        }
        self.sealed.sort_by_key(|s| s.id.as_u64());

        let payload = self.encode_payload();
        self.header.crc32 = crc32fast::hash(&payload);
        self.header.flags |= BlockFlags::CHECKSUM;
        if !self.sealed.is_empty() {
            self.header.flags |= BlockFlags::SORTED;
        }
        self.is_sealed = true;
        Ok(())
    }

    fn encode_payload(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let dict_table = self.dictionary.encode_table();
        out.extend_from_slice(&(dict_table.len() as u32).to_le_bytes());
        out.extend_from_slice(&dict_table);

        out.extend_from_slice(&(self.sealed.len() as u32).to_le_bytes());

        let mut directory = Vec::new();
        let mut columns = Vec::new();
        for s in &self.sealed {
            let label_bytes = self
                .dictionary
                .encode_pairs(s.labels.iter());
            directory.extend_from_slice(&s.id.as_u64().to_le_bytes());
            directory.extend_from_slice(&(label_bytes.len() as u32).to_le_bytes());
            directory.extend_from_slice(&label_bytes);
            directory.extend_from_slice(&s.num_samples.to_le_bytes());
            directory.extend_from_slice(&s.start_time.to_le_bytes());
            directory.extend_from_slice(&s.end_time.to_le_bytes());
            directory.extend_from_slice(&(s.ts_bytes.len() as u32).to_le_bytes());
            directory.extend_from_slice(&(s.val_bytes.len() as u32).to_le_bytes());
            directory.push(s.val_tag as u8);
            directory.extend_from_slice(&(s.fields_bytes.len() as u32).to_le_bytes());

            columns.extend_from_slice(&s.ts_bytes);
            columns.extend_from_slice(&s.val_bytes);
            columns.extend_from_slice(&s.fields_bytes);
        }
        out.extend_from_slice(&directory);
        out.extend_from_slice(&columns);
        out
    }

    /// Serializes the sealed block to bytes (header + payload). Errors if
    /// the block has not been sealed.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, Error> {
        if !self.is_sealed {
            return Err(Error::InvalidArgument("block is not sealed".into()));
        }
        let payload = self.encode_payload();
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parses a previously-serialized sealed block, verifying the header
    /// and payload checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let header = BlockHeader::decode(bytes)?;
        let payload = &bytes[HEADER_LEN..];
        if header.flags.contains(BlockFlags::CHECKSUM) {
            let crc = crc32fast::hash(payload);
            if crc != header.crc32 {
                return Err(Error::Corrupt("block payload checksum mismatch".into()));
            }
        }

        let mut pos = 0usize;
        let dict_len = read_u32(payload, &mut pos)? as usize;
        let dict_bytes = payload
            .get(pos..pos + dict_len)
            .ok_or_else(|| Error::Corrupt("truncated dictionary table".into()))?;
        pos += dict_len;
        let mut dict_pos = 0usize;
        let dictionary = LabelDictionary::decode_table(dict_bytes, &mut dict_pos)
            .map_err(|e| Error::Corrupt(format!("bad dictionary table: {e}")))?;

        let num_series = read_u32(payload, &mut pos)? as usize;
        struct DirEntry {
            id: SeriesId,
            labels: LabelSet,
            num_samples: u32,
            start_time: i64,
            end_time: i64,
            ts_len: usize,
            val_len: usize,
            val_tag: u8,
            fields_len: usize,
        }
        let mut dir = Vec::with_capacity(num_series);
        for _ in 0..num_series {
            let id = SeriesId(read_u64(payload, &mut pos)?);
            let label_bytes_len = read_u32(payload, &mut pos)? as usize;
            let label_bytes = payload
                .get(pos..pos + label_bytes_len)
                .ok_or_else(|| Error::Corrupt("truncated label bytes".into()))?;
            pos += label_bytes_len;
            let mut lp = 0usize;
            let pairs = dictionary
                .decode_pairs(label_bytes, &mut lp)
                .map_err(|e| Error::Corrupt(format!("bad series labels: {e}")))?;
            let labels = LabelSet::from_pairs(pairs)
                .map_err(|e| Error::Corrupt(format!("bad series labels: {e}")))?;
            let num_samples = read_u32(payload, &mut pos)?;
            let start_time = read_i64(payload, &mut pos)?;
            let end_time = read_i64(payload, &mut pos)?;
            let ts_len = read_u32(payload, &mut pos)? as usize;
            let val_len = read_u32(payload, &mut pos)? as usize;
            let val_tag = *payload.get(pos).ok_or_else(|| Error::Corrupt("truncated directory".into()))?;
            pos += 1;
            let fields_len = read_u32(payload, &mut pos)? as usize;
            dir.push(DirEntry {
                id,
                labels,
                num_samples,
                start_time,
                end_time,
                ts_len,
                val_len,
                val_tag,
                fields_len,
            });
        }

        let mut sealed = Vec::with_capacity(num_series);
        let mut column_pos = pos;
        for entry in dir {
            let labels = entry.labels;
            let ts_bytes = payload
                .get(column_pos..column_pos + entry.ts_len)
                .ok_or_else(|| Error::Corrupt("truncated timestamp column".into()))?
                .to_vec();
            column_pos += entry.ts_len;
            let val_bytes = payload
                .get(column_pos..column_pos + entry.val_len)
                .ok_or_else(|| Error::Corrupt("truncated value column".into()))?
                .to_vec();
            column_pos += entry.val_len;
            let fields_bytes = payload
                .get(column_pos..column_pos + entry.fields_len)
                .ok_or_else(|| Error::Corrupt("truncated fields column".into()))?
                .to_vec();
            column_pos += entry.fields_len;

            sealed.push(SealedSeries {
                id: entry.id,
                labels,
                start_time: entry.start_time,
                end_time: entry.end_time,
                num_samples: entry.num_samples,
                ts_bytes,
                val_bytes,
                val_tag: ValueTag::from_byte(entry.val_tag)?,
                fields_bytes,
            });
        }

        Ok(Self {
            header,
            open: BTreeMap::new(),
            sealed,
            dictionary,
            is_sealed: true,
            open_sample_count: 0,
        })
    }

    /// Decodes and returns all samples stored for `id`, in timestamp order.
    /// Only valid after `seal`; use [`Block::samples`] to also read an open
    /// block's in-memory buffer.
    pub fn read(&self, id: SeriesId) -> Result<Vec<DecodedSample>, Error> {
        let series = self
            .sealed
            .iter()
            .find(|s| s.id == id)
            .ok_or(Error::NotFound)?;
        decode_series(series, &self.dictionary)
    }

    /// Returns `id`'s samples whether the block is open or sealed. The
    /// storage engine's active block is never sealed until rotation, so
    /// reads need a path that works on both.
    pub fn samples(&self, id: SeriesId) -> Result<Vec<DecodedSample>, Error> {
        if self.is_sealed {
            return self.read(id);
        }
        let open = self.open.get(&id).ok_or(Error::NotFound)?;
        let out = open
            .timestamps
            .iter()
            .zip(&open.values)
            .zip(&open.fields)
            .map(|((&timestamp_ms, &value), fields)| DecodedSample {
                timestamp_ms,
                value,
                fields: fields.clone(),
            })
            .collect();
        Ok(out)
    }

    /// Whether this block (open or sealed) holds any samples for `id`.
    pub fn contains(&self, id: SeriesId) -> bool {
        if self.is_sealed {
            self.sealed.iter().any(|s| s.id == id)
        } else {
            self.open.contains_key(&id)
        }
    }

    /// Every series id present in this block, in directory order (sealed)
    /// or insertion order (open).
    pub fn series_ids(&self) -> Vec<SeriesId> {
        if self.is_sealed {
            self.sealed.iter().map(|s| s.id).collect()
        } else {
            self.open.keys().copied().collect()
        }
    }

    /// Returns `(id, labels)` for every sealed series whose labels match
    /// all `matchers` and whose time range intersects `[t_lo, t_hi]`.
    pub fn query(&self, matchers: &[LabelMatcher], t_lo: i64, t_hi: i64) -> Vec<(SeriesId, LabelSet)> {
        self.sealed
            .iter()
            .filter(|s| s.start_time <= t_hi && s.end_time >= t_lo)
            .filter(|s| matchers.iter().all(|m| m.matches(&s.labels)))
            .map(|s| (s.id, s.labels.clone()))
            .collect()
    }

    pub fn num_series(&self) -> usize {
        if self.is_sealed {
            self.sealed.len()
        } else {
            self.open.len()
        }
    }

    pub fn num_samples(&self) -> u64 {
        if self.is_sealed {
            self.sealed.iter().map(|s| s.num_samples as u64).sum()
        } else {
            self.open_sample_count
        }
    }

    pub fn start_time(&self) -> i64 {
        self.header.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.header.end_time
    }

    /// Approximate byte size while open (8 bytes timestamp + 8 bytes value
    /// per sample); exact, constant-time after seal.
    pub fn size(&self) -> u64 {
        if self.is_sealed {
            let payload: u64 = self
                .sealed
                .iter()
                .map(|s| (s.ts_bytes.len() + s.val_bytes.len() + s.fields_bytes.len()) as u64)
                .sum();
            HEADER_LEN as u64 + payload
        } else {
            HEADER_LEN as u64 + self.open_sample_count * 16
        }
    }
}

fn encode_fields(
    dictionary: &mut LabelDictionary,
    fields: &[BTreeMap<String, String>],
    rle: &RleCodec,
) -> Vec<u8> {
    if fields.iter().all(BTreeMap::is_empty) {
        return Vec::new();
    }
    let mut raw = Vec::new();
    for sample_fields in fields {
        let pairs: Vec<(&str, &str)> = sample_fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let encoded = dictionary.encode_pairs(pairs.into_iter());
        raw.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        raw.extend_from_slice(&encoded);
    }
    rle.encode(&raw)
}

fn decode_series(series: &SealedSeries, dictionary: &LabelDictionary) -> Result<Vec<DecodedSample>, Error> {
    let timestamps = TimestampCodec::default()
        .decode(&series.ts_bytes)
        .map_err(Error::from)?;
    let values = match series.val_tag {
        ValueTag::Gorilla => ValueCodec::new().decode(&series.val_bytes).map_err(Error::from)?,
        ValueTag::Raw => series
            .val_bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().expect("8 bytes")))
            .collect(),
    };
    if timestamps.len() != values.len() {
        return Err(Error::Corrupt("timestamp/value column length mismatch".into()));
    }
    let fields = decode_fields(&series.fields_bytes, timestamps.len(), dictionary)?;
    let out = timestamps
        .into_iter()
        .zip(values)
        .zip(fields)
        .map(|((timestamp_ms, value), fields)| DecodedSample {
            timestamp_ms,
            value,
            fields,
        })
        .collect();
    Ok(out)
}

fn decode_fields(
    fields_bytes: &[u8],
    num_samples: usize,
    dictionary: &LabelDictionary,
) -> Result<Vec<BTreeMap<String, String>>, Error> {
    if fields_bytes.is_empty() {
        return Ok(vec![BTreeMap::new(); num_samples]);
    }
    let raw = RleCodec::new()
        .decode(fields_bytes)
        .map_err(|e| Error::Corrupt(format!("bad fields column: {e}")))?;
    let mut pos = 0usize;
    let mut out = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        let len = read_u32(&raw, &mut pos)? as usize;
        let encoded = raw
            .get(pos..pos + len)
            .ok_or_else(|| Error::Corrupt("truncated per-sample fields".into()))?;
        pos += len;
        let mut lp = 0usize;
        let pairs = dictionary
            .decode_pairs(encoded, &mut lp)
            .map_err(|e| Error::Corrupt(format!("bad sample fields: {e}")))?;
        out.push(pairs.into_iter().collect());
    }
    Ok(out)
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, Error> {
    let bytes = data
        .get(*pos..*pos + 4)
        .ok_or_else(|| Error::Corrupt("truncated block payload".into()))?;
    *pos += 4;
    Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
}

fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let bytes = data
        .get(*pos..*pos + 8)
        .ok_or_else(|| Error::Corrupt("truncated block payload".into()))?;
    *pos += 8;
    Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
}

fn read_i64(data: &[u8], pos: &mut usize) -> Result<i64, Error> {
    read_u64(data, pos).map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsdb_core::LabelSet;

    fn labels(host: &str) -> LabelSet {
        LabelSet::from_pairs([("__name__", "cpu"), ("host", host)]).unwrap()
    }

    #[test]
    fn refuses_start_after_end() {
        assert!(Block::create(100, 0).is_err());
    }

    #[test]
    fn append_requires_strictly_increasing_timestamps() {
        let mut block = Block::create(0, 1000).unwrap();
        let id = SeriesId(1);
        let labels = labels("h1");
        block.append(id, &labels, &Sample::new(10, 1.0)).unwrap();
        let err = block.append(id, &labels, &Sample::new(10, 2.0));
        assert!(matches!(err, Err(Error::Ordering { .. })));
    }

    #[test]
    fn seal_is_idempotent() {
        let mut block = Block::create(0, 1000).unwrap();
        block
            .append(SeriesId(1), &labels("h1"), &Sample::new(1, 1.0))
            .unwrap();
        block.seal().unwrap();
        let crc_first = block.to_bytes().unwrap();
        block.seal().unwrap();
        let crc_second = block.to_bytes().unwrap();
        assert_eq!(crc_first, crc_second);
    }

    #[test]
    fn round_trips_single_series_through_bytes() {
        let mut block = Block::create(0, 1000).unwrap();
        let id = SeriesId(42);
        let labels = labels("h1");
        for i in 0..50 {
            block
                .append(id, &labels, &Sample::new(i * 10, i as f64 * 1.5))
                .unwrap();
        }
        block.seal().unwrap();
        assert_eq!(block.num_series(), 1);
        assert_eq!(block.num_samples(), 50);

        let bytes = block.to_bytes().unwrap();
        let restored = Block::from_bytes(&bytes).unwrap();
        assert_eq!(restored.num_samples(), 50);
        let decoded = restored.read(id).unwrap();
        assert_eq!(decoded.len(), 50);
        for (i, sample) in decoded.iter().enumerate() {
            assert_eq!(sample.timestamp_ms, i as i64 * 10);
            assert_eq!(sample.value, i as f64 * 1.5);
        }
    }

    #[test]
    fn query_filters_by_matcher_and_range() {
        let mut block = Block::create(0, 1000).unwrap();
        block
            .append(SeriesId(1), &labels("h1"), &Sample::new(5, 1.0))
            .unwrap();
        block
            .append(SeriesId(2), &labels("h2"), &Sample::new(500, 2.0))
            .unwrap();
        block.seal().unwrap();
        let bytes = block.to_bytes().unwrap();
        let restored = Block::from_bytes(&bytes).unwrap();

        let matchers = vec![LabelMatcher::equal("host", "h1")];
        let found = restored.query(&matchers, 0, 1000);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, SeriesId(1));

        let found_range = restored.query(&[], 400, 600);
        assert_eq!(found_range.len(), 1);
        assert_eq!(found_range[0].0, SeriesId(2));
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let mut block = Block::create(0, 1000).unwrap();
        block
            .append(SeriesId(1), &labels("h1"), &Sample::new(1, 1.0))
            .unwrap();
        block.seal().unwrap();
        let mut bytes = block.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(Block::from_bytes(&bytes).is_err());
    }

    #[test]
    fn fields_round_trip_through_bytes() {
        let mut block = Block::create(0, 1000).unwrap();
        let id = SeriesId(7);
        let l = labels("h1");
        let mut f1 = BTreeMap::new();
        f1.insert("trace_id".to_string(), "abc".to_string());
        block.append(id, &l, &Sample::with_fields(1, 1.0, f1.clone())).unwrap();
        block.append(id, &l, &Sample::new(2, 2.0)).unwrap();
        block.seal().unwrap();
        let bytes = block.to_bytes().unwrap();
        let restored = Block::from_bytes(&bytes).unwrap();
        let decoded = restored.read(id).unwrap();
        assert_eq!(decoded[0].fields, f1);
        assert!(decoded[1].fields.is_empty());
    }

    #[test]
    fn samples_reads_open_block_before_seal() {
        let mut block = Block::create(0, 1000).unwrap();
        let id = SeriesId(3);
        let l = labels("h1");
        block.append(id, &l, &Sample::new(10, 1.0)).unwrap();
        block.append(id, &l, &Sample::new(20, 2.0)).unwrap();
        assert!(block.contains(id));
        let decoded = block.samples(id).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].timestamp_ms, 20);
        assert_eq!(decoded[1].value, 2.0);
    }

    #[test]
    fn append_after_seal_is_rejected() {
        let mut block = Block::create(0, 1000).unwrap();
        block.seal().unwrap();
        let err = block.append(SeriesId(1), &labels("h1"), &Sample::new(1, 1.0));
        assert!(err.is_err());
    }
}
