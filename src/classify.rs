use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::entry::LogFormat;
use crate::error::{Result, SiftError};

pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Cumulative votes per format, indexed by [`LogFormat::index`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally([usize; 7]);

impl Tally {
    pub fn get(&self, format: LogFormat) -> usize {
        self.0[format.index()]
    }

    fn vote(&mut self, format: LogFormat) {
        self.0[format.index()] += 1;
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogFormat, usize)> + '_ {
        LogFormat::PRIORITY.into_iter().map(|f| (f, self.get(f)))
    }
}

impl Serialize for Tally {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (f, n) in self.iter() {
            map.serialize_entry(f.name(), &n)?;
        }
        map.end()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub format: LogFormat,
    pub rounds: usize,
    pub tally: Tally,
    /// The round cap ran out before any format was accepted.
    pub capped: bool,
}

/// Picks one format for a whole buffer by voting over random samples.
///
/// Each round draws `sample_size` lines with replacement and credits the first
/// matching format for each. After every round the formats are checked in
/// priority order: Secure needs `tally >= sample_size`, everything else needs
/// `tally > sample_size / 4`. Tallies accumulate across rounds, and since every
/// line matches at least Raw some format always crosses its bar eventually.
pub struct FormatClassifier {
    sample_size: usize,
    max_rounds: Option<usize>,
    rng: StdRng,
}

impl Default for FormatClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatClassifier {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self { sample_size: DEFAULT_SAMPLE_SIZE, max_rounds: None, rng }
    }

    pub fn max_rounds(mut self, cap: Option<usize>) -> Self {
        self.max_rounds = cap;
        self
    }

    pub fn sample_size(mut self, n: usize) -> Self {
        self.sample_size = n.max(1);
        self
    }

    fn accepts(&self, format: LogFormat, votes: usize) -> bool {
        match format {
            LogFormat::Secure => votes >= self.sample_size,
            _ => votes > self.sample_size / 4,
        }
    }

    fn accepted(&self, tally: &Tally) -> Option<LogFormat> {
        LogFormat::PRIORITY.into_iter().find(|&f| self.accepts(f, tally.get(f)))
    }

    pub fn classify<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<Classification> {
        if lines.is_empty() {
            return Err(SiftError::EmptyInput("nothing to classify".to_string()));
        }
        let mut tally = Tally::default();
        let mut rounds = 0usize;
        loop {
            if let Some(cap) = self.max_rounds && rounds >= cap {
                log::warn!("No format accepted after {} rounds, falling back to raw", rounds);
                return Ok(Classification { format: LogFormat::Raw, rounds, tally, capped: true });
            }
            rounds += 1;
            for _ in 0..self.sample_size {
                let line = lines[self.rng.random_range(0..lines.len())].as_ref();
                let tokens: Vec<&str> = line.split_whitespace().collect();
                tally.vote(LogFormat::detect(&tokens));
            }
            log::debug!("Round {}: {:?}", rounds, tally);
            if let Some(format) = self.accepted(&tally) {
                log::info!("Determined {} log after {} rounds", format, rounds);
                return Ok(Classification { format, rounds, tally, capped: false });
            }
        }
    }
}
