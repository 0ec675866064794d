/// Errors surfaced by the analysis engine.
///
/// Parsing never produces one of these: unparseable lines degrade to sentinel
/// records. Everything here is fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum SiftError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("input source yielded no lines: {0}")]
    EmptyInput(String),

    #[error("scrub file not found in any search directory: {0}")]
    ScrubFileNotFound(String),

    #[error("invalid scrub pattern {pattern:?} in {file}: {source}")]
    InvalidScrubPattern {
        file: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("could not locate fingerprint files in: {0}")]
    FingerprintCorpusNotFound(String),

    #[error("invalid fingerprint file pattern {glob:?}: {source}")]
    InvalidGlob {
        glob: String,
        #[source]
        source: globset::Error,
    },

    #[error("that type of sampling is not supported: {0}")]
    UnsupportedSampleMode(String),

    #[error("unknown log format: {0}")]
    UnknownFormat(String),

    #[error("unknown histogram unit: {0}")]
    UnknownGranularity(String),

    #[error("first record does not carry a usable timestamp: {0}")]
    InvalidAnchor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SiftError>;
