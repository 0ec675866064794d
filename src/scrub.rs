use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::resolve_resource;
use crate::entry::PLACEHOLDER;
use crate::error::{Result, SiftError};

/// Ordered regex substitutions that fold volatile text (pids, addresses,
/// counters) into the placeholder so message variants share one key.
#[derive(Clone, Debug, Default)]
pub struct ScrubFilter {
    rules: Vec<Regex>,
    source: Option<PathBuf>,
}

impl ScrubFilter {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for p in patterns {
            let p = p.as_ref();
            let re = Regex::new(p).map_err(|source| SiftError::InvalidScrubPattern {
                file: "<inline>".to_string(),
                pattern: p.to_string(),
                source,
            })?;
            rules.push(re);
        }
        Ok(Self { rules, source: None })
    }

    /// One pattern per line; blank lines are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| SiftError::Read {
            path: path.to_string_lossy().into_owned(),
            source,
        })?;
        let mut rules = Vec::new();
        for line in data.lines() {
            let pattern = line.trim_end();
            if pattern.is_empty() {
                continue;
            }
            let re = Regex::new(pattern).map_err(|source| SiftError::InvalidScrubPattern {
                file: path.to_string_lossy().into_owned(),
                pattern: pattern.to_string(),
                source,
            })?;
            rules.push(re);
        }
        log::info!("Scrub file: {} ({} rules)", path.to_string_lossy(), rules.len());
        Ok(Self { rules, source: Some(path.to_path_buf()) })
    }

    /// Resolve a named rule file against the search directories. No name means
    /// an empty filter; a name that resolves nowhere is an error.
    pub fn load(name: Option<&str>, dirs: &[PathBuf]) -> Result<Self> {
        let Some(name) = name else { return Ok(Self::empty()) };
        match resolve_resource(name, dirs) {
            Some(path) => Self::from_file(&path),
            None => Err(SiftError::ScrubFileNotFound(name.to_string())),
        }
    }

    /// Apply every rule in registration order, each seeing the previous output.
    pub fn scrub(&self, s: &str) -> String {
        let mut out = s.to_string();
        for re in &self.rules {
            let next = re.replace_all(&out, PLACEHOLDER).into_owned();
            log::trace!("scrubbing {:?} of {} becomes {:?}", out, re.as_str(), next);
            out = next;
        }
        out
    }

    /// True when the whole string scrubs down to the placeholder.
    pub fn bleach(&self, s: &str) -> bool {
        self.scrub(s) == PLACEHOLDER
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
