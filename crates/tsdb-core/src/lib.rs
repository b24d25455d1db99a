//! # tsdb-core
//!
//! Data model, error taxonomy, and configuration shared by every layer of
//! the storage core: labels, series identity, samples, matchers, and the
//! `Error` enum returned by fallible operations elsewhere in the workspace.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod label;
pub mod matcher;
pub mod sample;
pub mod series;

pub use config::EngineConfig;
pub use error::Error;
pub use label::{Label, LabelSet};
pub use matcher::{LabelMatcher, MatchOp};
pub use sample::Sample;
pub use series::{Series, SeriesId};
