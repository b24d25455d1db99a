//! Engine configuration (spec §6). Defines and validates the in-memory
//! struct only; parsing a config *file* is out of scope (spec §1).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionKind {
    None,
    Gorilla,
    DeltaXor,
    Dictionary,
    Rle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub timestamp: CompressionKind,
    pub value: CompressionKind,
    pub label: CompressionKind,
    pub adaptive_compression: bool,
    pub compression_level: u8,
    pub enable_simd: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            timestamp: CompressionKind::DeltaXor,
            value: CompressionKind::Gorilla,
            label: CompressionKind::Dictionary,
            adaptive_compression: true,
            compression_level: 6,
            enable_simd: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub compression_level: u8,
    pub retention_period_secs: u64,
    pub cache_size_bytes: u64,
    pub allow_mmap: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            retention_period_secs: 7 * 24 * 3600,
            cache_size_bytes: 64 * 1024 * 1024,
            allow_mmap: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    pub max_block_size: u64,
    pub max_block_records: u64,
    pub block_duration_secs: u64,
    pub max_concurrent_compactions: usize,
    pub compaction_threshold_blocks: usize,
    pub compaction_threshold_ratio: f64,
    pub hot: TierConfig,
    pub warm: TierConfig,
    pub cold: TierConfig,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            max_block_size: 64 * 1024 * 1024,
            max_block_records: 120_000,
            block_duration_secs: 3600,
            max_concurrent_compactions: 2,
            compaction_threshold_blocks: 10,
            compaction_threshold_ratio: 0.3,
            hot: TierConfig {
                allow_mmap: true,
                ..TierConfig::default()
            },
            warm: TierConfig::default(),
            cold: TierConfig {
                retention_period_secs: 365 * 24 * 3600,
                ..TierConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub num_shards: usize,
    pub queue_size: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub flush_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_shards: 16,
            queue_size: 4096,
            batch_size: 128,
            num_workers: 2,
            flush_interval_ms: 250,
            retry_delay_ms: 50,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    pub enable_background_processing: bool,
    pub background_threads: usize,
    pub task_interval_ms: u64,
    pub compaction_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub enable_auto_compaction: bool,
    pub enable_auto_cleanup: bool,
    pub enable_auto_metrics: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enable_background_processing: true,
            background_threads: 1,
            task_interval_ms: 1000,
            compaction_interval_ms: 60_000,
            cleanup_interval_ms: 60_000,
            metrics_interval_ms: 10_000,
            enable_auto_compaction: true,
            enable_auto_cleanup: true,
            enable_auto_metrics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_dir: String,
    pub block_size: u64,
    pub retention_period_secs: u64,
    pub enable_compression: bool,
    pub block: BlockConfig,
    pub compression: CompressionConfig,
    pub pipeline: PipelineConfig,
    pub background: BackgroundConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            block_size: 64 * 1024 * 1024,
            retention_period_secs: 7 * 24 * 3600,
            enable_compression: true,
            block: BlockConfig::default(),
            compression: CompressionConfig::default(),
            pipeline: PipelineConfig::default(),
            background: BackgroundConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.data_dir.is_empty() {
            return Err("data_dir must not be empty".to_string());
        }
        if self.pipeline.num_shards == 0 {
            return Err("num_shards must be > 0".to_string());
        }
        if self.pipeline.queue_size == 0 {
            return Err("queue_size must be > 0".to_string());
        }
        if self.block.max_block_records == 0 {
            return Err("max_block_records must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_shards() {
        let mut cfg = EngineConfig::default();
        cfg.pipeline.num_shards = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pipeline.num_shards, cfg.pipeline.num_shards);
    }
}
