use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::LazyLock;

use rand::Rng;
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::Serialize;

use crate::collection::LogCollection;
use crate::entry::{LogFormat, LogRecord, PLACEHOLDER};
use crate::error::SiftError;
use crate::scrub::ScrubFilter;

/// Counts at or below this print a sample in threshold mode.
pub const SAMPLE_THRESHOLD: usize = 3;

static SECURE_TEMPLATES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        ("session closed for.*", "session closed for #"),
        ("session opened for.*", "session opened for #"),
        ("Accepted publickey for.*", "Accepted publickey for #"),
        ("Accepted password for.*", "Accepted password for #"),
        ("Postponed publickey for.*", "Postponed publickey for #"),
        ("input_userauth_request: invalid user.*", "input_userauth_request: invalid user #"),
        ("Invalid user.*", "Invalid user #"),
        ("reverse mapping checking getaddrinfo for.*", "reverse mapping checking getaddrinfo for #"),
        ("Connection closed by.*", "Connection closed by #"),
        ("Failed password for invalid user.*", "Failed password for invalid user #"),
        ("Failed password for.*from.*", "Failed password for # from #"),
        ("error retrieving information about user.*", "error retrieving information about user #"),
        ("authentication failure.*", "authentication failure #"),
        ("Received disconnect from.*", "Received disconnect from #"),
        ("Could not reverse map address.*", "Could not reverse map address #"),
    ]
    .into_iter()
    .map(|(p, r)| (Regex::new(p).unwrap(), r))
    .collect()
});

/// Rewrite the variable tail of well-known authentication messages.
pub fn canonicalize_secure(payload: &str) -> String {
    let mut out = payload.to_string();
    for (re, rep) in SECURE_TEMPLATES.iter() {
        out = re.replace_all(&out, *rep).into_owned();
    }
    out
}

/// Which record fields make up a table key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPolicy {
    DaemonPayload,
    Secure,
    Payload,
    Daemon,
    Host,
    Word,
}

impl KeyPolicy {
    pub fn for_format(format: LogFormat) -> Self {
        match format {
            LogFormat::Secure => KeyPolicy::Secure,
            LogFormat::Syslog | LogFormat::RSyslog => KeyPolicy::DaemonPayload,
            LogFormat::ApacheAccess | LogFormat::ApacheError | LogFormat::Snort | LogFormat::Raw => KeyPolicy::Payload,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrequencyEntry {
    pub count: usize,
    pub samples: Vec<LogRecord>,
}

/// How a ranked line renders its right-hand side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleMode {
    /// Payload of a random retained sample.
    All,
    /// The canonical key.
    #[default]
    None,
    /// First sample's payload for rare keys, the key otherwise.
    Threshold,
}

impl FromStr for SampleMode {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SampleMode::All),
            "none" => Ok(SampleMode::None),
            "threshold" => Ok(SampleMode::Threshold),
            other => Err(SiftError::UnsupportedSampleMode(other.to_string())),
        }
    }
}

/// Canonical key to count and samples, remembering first-insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrequencyTable {
    order: Vec<String>,
    entries: HashMap<String, FrequencyEntry>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate with the policy the collection's format implies.
    pub fn build(collection: &LogCollection, filter: &ScrubFilter) -> Self {
        Self::build_with(collection, KeyPolicy::for_format(collection.format()), filter)
    }

    pub fn build_with(collection: &LogCollection, policy: KeyPolicy, filter: &ScrubFilter) -> Self {
        let mut table = Self::new();
        match policy {
            KeyPolicy::Word => {
                let mut words = Self::new();
                for r in collection {
                    for w in r.payload.split_whitespace() {
                        words.increment(w, r.clone());
                    }
                }
                for key in std::mem::take(&mut words.order) {
                    if let Some(entry) = words.entries.remove(&key) {
                        table.merge(filter.scrub(&key), entry);
                    }
                }
            }
            _ => {
                for r in collection {
                    let (key, sample) = match policy {
                        KeyPolicy::DaemonPayload => (format!("{} {}", r.daemon, r.payload), r.clone()),
                        KeyPolicy::Secure => {
                            let payload = canonicalize_secure(&r.payload);
                            (format!("{} {}", r.daemon, payload), r.with_payload(payload))
                        }
                        KeyPolicy::Payload => (r.payload.clone(), r.clone()),
                        KeyPolicy::Daemon => (r.daemon.clone(), r.clone()),
                        KeyPolicy::Host => (r.host.clone(), r.clone()),
                        KeyPolicy::Word => unreachable!(),
                    };
                    table.increment(filter.scrub(&key), sample);
                }
            }
        }
        table.remove(PLACEHOLDER);
        log::info!("{:?} table over {} records: {} keys", policy, collection.len(), table.len());
        table
    }

    pub fn increment(&mut self, key: impl Into<String>, record: LogRecord) {
        let key = key.into();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        let entry = self.entries.entry(key).or_default();
        entry.count += 1;
        entry.samples.push(record);
    }

    fn merge(&mut self, key: String, other: FrequencyEntry) {
        match self.entries.get_mut(&key) {
            Some(e) => {
                e.count += other.count;
                e.samples.extend(other.samples);
            }
            None => {
                self.order.push(key.clone());
                self.entries.insert(key, other);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<FrequencyEntry> {
        let removed = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub fn remove_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) -> usize {
        let gone: HashSet<&str> = keys.into_iter().filter(|k| self.entries.remove(*k).is_some()).collect();
        if !gone.is_empty() {
            self.order.retain(|k| !gone.contains(k.as_str()));
        }
        gone.len()
    }

    pub fn get(&self, key: &str) -> Option<&FrequencyEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys in the order they were first inserted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FrequencyEntry)> {
        self.order.iter().filter_map(|k| self.entries.get(k).map(|e| (k.as_str(), e)))
    }

    /// Descending count, ties alphabetical by key.
    pub fn ranked(&self) -> Vec<(&str, &FrequencyEntry)> {
        let mut rows: Vec<(&str, &FrequencyEntry)> = self.iter().collect();
        rows.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
        rows
    }

    pub fn rendering<'a, R: Rng + ?Sized>(key: &'a str, entry: &'a FrequencyEntry, mode: SampleMode, rng: &mut R) -> &'a str {
        match mode {
            SampleMode::All => entry.samples.choose(rng).map(|r| r.payload.as_str()).unwrap_or(key),
            SampleMode::None => key,
            SampleMode::Threshold if entry.count <= SAMPLE_THRESHOLD => {
                entry.samples.first().map(|r| r.payload.as_str()).unwrap_or(key)
            }
            SampleMode::Threshold => key,
        }
    }

    /// `<count>:\t<rendering>`, the shape of one displayed line.
    pub fn line(count: usize, rendering: &str) -> String {
        format!("{}:\t{}", count, rendering)
    }

    /// One displayed line per ranked key.
    pub fn rendered<R: Rng + ?Sized>(&self, mode: SampleMode, rng: &mut R) -> Vec<String> {
        self.ranked()
            .into_iter()
            .map(|(k, e)| Self::line(e.count, Self::rendering(k, e, mode, rng)))
            .collect()
    }
}
