//! Adaptive value codec (spec §4.1).
//!
//! Classifies a sample window as COUNTER, CONSTANT, HISTOGRAM, or GAUGE and
//! routes it to a per-class sub-codec. The class byte is written first,
//! followed by the sample count, so together they are always sufficient to
//! round-trip regardless of which sub-codec follows.

use tsdb_core::error::DecodeError;

use crate::varint::{read_varint, write_varint, zigzag_decode, zigzag_encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveClass {
    Counter,
    Constant,
    Histogram,
    Gauge,
}

impl AdaptiveClass {
    fn to_byte(self) -> u8 {
        match self {
            AdaptiveClass::Counter => 0,
            AdaptiveClass::Constant => 1,
            AdaptiveClass::Histogram => 2,
            AdaptiveClass::Gauge => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self, DecodeError> {
        match b {
            0 => Ok(AdaptiveClass::Counter),
            1 => Ok(AdaptiveClass::Constant),
            2 => Ok(AdaptiveClass::Histogram),
            3 => Ok(AdaptiveClass::Gauge),
            other => Err(DecodeError::Invalid(other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    pub theta_counter: f64,
    pub theta_const: f64,
    pub gauge_scale: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            theta_counter: 0.95,
            theta_const: 0.95,
            gauge_scale: 1e-3,
        }
    }
}

#[derive(Debug, Default)]
pub struct AdaptiveCodec {
    config: AdaptiveConfig,
}

impl AdaptiveCodec {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, values: &[f64]) -> AdaptiveClass {
        classify(values, &self.config)
    }

    pub fn encode(&self, values: &[f64]) -> Vec<u8> {
        if values.is_empty() {
            return Vec::new();
        }
        let class = self.classify(values);
        let mut out = vec![class.to_byte()];
        write_varint(values.len() as u64, &mut out);
        match class {
            AdaptiveClass::Constant => encode_constant(values, &mut out),
            AdaptiveClass::Counter => encode_counter(values, &mut out),
            AdaptiveClass::Histogram => encode_histogram(values, &mut out),
            AdaptiveClass::Gauge => encode_gauge(values, &mut out, self.config.gauge_scale),
        }
        out
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<f64>, DecodeError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let class = AdaptiveClass::from_byte(*data.first().ok_or(DecodeError::Truncated)?)?;
        let mut pos = 1;
        let n = read_varint(data, &mut pos)? as usize;
        match class {
            AdaptiveClass::Constant => decode_constant(data, &mut pos, n),
            AdaptiveClass::Counter => decode_counter(data, &mut pos, n),
            AdaptiveClass::Histogram => decode_histogram(data, &mut pos, n),
            AdaptiveClass::Gauge => decode_gauge(data, &mut pos, n, self.config.gauge_scale),
        }
    }
}

fn classify(values: &[f64], cfg: &AdaptiveConfig) -> AdaptiveClass {
    let n = values.len();
    if n == 0 {
        return AdaptiveClass::Gauge;
    }
    let first = values[0];
    let const_fraction = values.iter().filter(|&&v| v == first).count() as f64 / n as f64;
    if const_fraction >= cfg.theta_const {
        return AdaptiveClass::Constant;
    }
    if n > 1 {
        let monotone = values.windows(2).filter(|w| w[1] >= w[0]).count() as f64 / (n - 1) as f64;
        if monotone >= cfg.theta_counter {
            return AdaptiveClass::Counter;
        }
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();
    let cv = if mean.abs() > f64::EPSILON {
        std_dev / mean
    } else {
        f64::INFINITY
    };
    let all_nonneg = values.iter().all(|&v| v >= 0.0);
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = sorted[n / 2];
    let right_skewed = mean > median;
    let fully_monotone = values.windows(2).all(|w| w[1] >= w[0]);
    if all_nonneg && (0.5..=1.5).contains(&cv) && right_skewed && !fully_monotone {
        AdaptiveClass::Histogram
    } else {
        AdaptiveClass::Gauge
    }
}

fn encode_constant(values: &[f64], out: &mut Vec<u8>) {
    out.extend_from_slice(&values[0].to_bits().to_le_bytes());
}

fn decode_constant(data: &[u8], pos: &mut usize, n: usize) -> Result<Vec<f64>, DecodeError> {
    let bits = read_u64(data, pos)?;
    Ok(vec![f64::from_bits(bits); n])
}

/// Bit-pattern delta coding: exact for any input, compresses well when
/// consecutive values share magnitude (the common counter case).
fn encode_counter(values: &[f64], out: &mut Vec<u8>) {
    out.extend_from_slice(&values[0].to_bits().to_le_bytes());
    let mut prev = values[0].to_bits() as i64;
    for &v in &values[1..] {
        let cur = v.to_bits() as i64;
        write_varint(zigzag_encode(cur.wrapping_sub(prev)), out);
        prev = cur;
    }
}

fn decode_counter(data: &[u8], pos: &mut usize, n: usize) -> Result<Vec<f64>, DecodeError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut prev = read_u64(data, pos)? as i64;
    let mut out = Vec::with_capacity(n);
    out.push(f64::from_bits(prev as u64));
    for _ in 1..n {
        let delta = zigzag_decode(read_varint(data, pos)?);
        prev = prev.wrapping_add(delta);
        out.push(f64::from_bits(prev as u64));
    }
    Ok(out)
}

fn encode_gauge(values: &[f64], out: &mut Vec<u8>, scale: f64) {
    out.extend_from_slice(&scale.to_le_bytes());
    let quantize = |v: f64| (v / scale).round() as i64;
    let mut prev = quantize(values[0]);
    write_varint(zigzag_encode(prev), out);
    for &v in &values[1..] {
        let q = quantize(v);
        write_varint(zigzag_encode(q - prev), out);
        prev = q;
    }
}

fn decode_gauge(data: &[u8], pos: &mut usize, n: usize, _scale: f64) -> Result<Vec<f64>, DecodeError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let scale_bytes: [u8; 8] = data
        .get(*pos..*pos + 8)
        .ok_or(DecodeError::Truncated)?
        .try_into()
        .expect("8 bytes");
    *pos += 8;
    let scale = f64::from_le_bytes(scale_bytes);
    let mut q = zigzag_decode(read_varint(data, pos)?);
    let mut out = Vec::with_capacity(n);
    out.push(q as f64 * scale);
    for _ in 1..n {
        q += zigzag_decode(read_varint(data, pos)?);
        out.push(q as f64 * scale);
    }
    Ok(out)
}

fn encode_histogram(values: &[f64], out: &mut Vec<u8>) {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    out.extend_from_slice(&min.to_le_bytes());
    out.extend_from_slice(&range.to_le_bytes());
    for &v in values {
        let q = if range > 0.0 {
            (((v - min) / range) * 65535.0).round().clamp(0.0, 65535.0) as u16
        } else {
            0
        };
        out.extend_from_slice(&q.to_le_bytes());
    }
}

fn decode_histogram(data: &[u8], pos: &mut usize, n: usize) -> Result<Vec<f64>, DecodeError> {
    let min = f64::from_le_bytes(
        data.get(*pos..*pos + 8)
            .ok_or(DecodeError::Truncated)?
            .try_into()
            .expect("8 bytes"),
    );
    *pos += 8;
    let range = f64::from_le_bytes(
        data.get(*pos..*pos + 8)
            .ok_or(DecodeError::Truncated)?
            .try_into()
            .expect("8 bytes"),
    );
    *pos += 8;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let q = u16::from_le_bytes(
            data.get(*pos..*pos + 2)
                .ok_or(DecodeError::Truncated)?
                .try_into()
                .expect("2 bytes"),
        );
        *pos += 2;
        out.push(min + (q as f64 / 65535.0) * range);
    }
    Ok(out)
}

fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let bytes: [u8; 8] = data
        .get(*pos..*pos + 8)
        .ok_or(DecodeError::Truncated)?
        .try_into()
        .expect("8 bytes");
    *pos += 8;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64], tol: f64) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tol)
    }

    #[test]
    fn empty_round_trips_to_empty() {
        let codec = AdaptiveCodec::default();
        assert!(codec.encode(&[]).is_empty());
        assert!(codec.decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn constant_classified_and_exact() {
        let codec = AdaptiveCodec::default();
        let values = vec![42.0; 200];
        assert_eq!(codec.classify(&values), AdaptiveClass::Constant);
        let encoded = codec.encode(&values);
        assert_eq!(codec.decode(&encoded).unwrap(), values);
    }

    #[test]
    fn counter_classified_and_exact() {
        let codec = AdaptiveCodec::default();
        let values: Vec<f64> = (0..200).map(|i| 100.0 + i as f64).collect();
        assert_eq!(codec.classify(&values), AdaptiveClass::Counter);
        let encoded = codec.encode(&values);
        assert_eq!(codec.decode(&encoded).unwrap(), values);
    }

    #[test]
    fn gauge_classified_and_within_tolerance() {
        let codec = AdaptiveCodec::default();
        // Pseudo-gaussian walk, not monotone, not constant.
        let mut values = Vec::new();
        let mut x = 100.0;
        for i in 0..300 {
            x += ((i as f64) * 1.7).sin() * 4.0 - 1.0;
            values.push(x);
        }
        let class = codec.classify(&values);
        assert!(matches!(class, AdaptiveClass::Gauge | AdaptiveClass::Histogram));
        let encoded = codec.encode(&values);
        let decoded = codec.decode(&encoded).unwrap();
        assert!(close(&values, &decoded, 1e-3 + 1e-6));
    }

    #[test]
    fn histogram_like_classified_and_within_tolerance() {
        let codec = AdaptiveCodec::default();
        // Right-skewed, non-negative, non-monotone synthetic "gamma-ish" data.
        let mut values = Vec::new();
        let mut seed = 1u64;
        for _ in 0..300 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let u = ((seed >> 11) as f64) / ((1u64 << 53) as f64);
            values.push(-2.0 * u.ln().max(-20.0));
        }
        let class = codec.classify(&values);
        let encoded = codec.encode(&values);
        let decoded = codec.decode(&encoded).unwrap();
        match class {
            AdaptiveClass::Histogram | AdaptiveClass::Gauge => {
                assert!(close(&values, &decoded, 1e-3 * 50.0));
            }
            _ => {}
        }
    }

    #[test]
    fn truncated_input_errors() {
        let codec = AdaptiveCodec::default();
        let values: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let encoded = codec.encode(&values);
        for cut in 1..encoded.len() {
            assert!(codec.decode(&encoded[..encoded.len() - cut]).is_err());
        }
    }

    #[test]
    fn invalid_class_byte_errors() {
        let codec = AdaptiveCodec::default();
        assert!(codec.decode(&[200, 1, 0]).is_err());
    }
}
