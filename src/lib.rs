//! Log triage engine: guesses the format of an unknown log by sampling,
//! normalizes every line into a [`LogRecord`], then either ranks canonical
//! message shapes (optionally folding known noise through fingerprints) or
//! draws a dense time histogram.

pub mod classify;
pub mod collection;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod frequency;
pub mod histogram;
pub mod report;
pub mod scrub;

pub use classify::{Classification, FormatClassifier};
pub use collection::{LineSource, LogCollection};
pub use entry::{LogFormat, LogRecord, PLACEHOLDER};
pub use error::{Result, SiftError};
pub use fingerprint::{CorpusSource, Fingerprint, FingerprintCorpus, FingerprintMatcher};
pub use frequency::{FrequencyEntry, FrequencyTable, KeyPolicy, SampleMode};
pub use histogram::{Granularity, GraphStyle, TimeHistogram};
pub use scrub::ScrubFilter;
