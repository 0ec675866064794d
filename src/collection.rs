use std::io::Read;
use std::path::PathBuf;

use chrono::{DateTime, Datelike, Local};
use regex::Regex;

use crate::classify::{Classification, FormatClassifier};
use crate::entry::{LogFormat, LogRecord};
use crate::error::{Result, SiftError};

/// Where raw lines come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineSource {
    Path(PathBuf),
    Stdin,
    Buffer(Vec<String>),
}

impl LineSource {
    /// `-` or no argument reads standard input.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None | Some("-") => LineSource::Stdin,
            Some(p) => LineSource::Path(PathBuf::from(p)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LineSource::Path(p) => p.to_string_lossy().into_owned(),
            LineSource::Stdin => "<stdin>".to_string(),
            LineSource::Buffer(_) => "<buffer>".to_string(),
        }
    }

    /// Whole source into memory. Invalid UTF-8 is replaced rather than rejected.
    pub fn read_lines(&self) -> Result<Vec<String>> {
        let bytes = match self {
            LineSource::Buffer(lines) => return Ok(lines.clone()),
            LineSource::Path(p) => std::fs::read(p).map_err(|source| SiftError::Read {
                path: p.to_string_lossy().into_owned(),
                source,
            })?,
            LineSource::Stdin => {
                let mut buf = Vec::new();
                std::io::stdin().lock().read_to_end(&mut buf)?;
                buf
            }
        };
        Ok(String::from_utf8_lossy(&bytes).lines().map(str::to_string).collect())
    }
}

/// Every line of one source parsed with a single format, in input order.
#[derive(Clone, Debug)]
pub struct LogCollection {
    source: String,
    format: LogFormat,
    records: Vec<LogRecord>,
    built_at: DateTime<Local>,
    classification: Option<Classification>,
}

impl LogCollection {
    /// Read, classify and parse a source.
    pub fn load(source: &LineSource, classifier: &mut FormatClassifier) -> Result<Self> {
        let lines = read_nonempty(source)?;
        Self::classify_and_build(source.describe(), &lines, classifier)
    }

    /// Read and parse a source with a known format, skipping classification.
    pub fn load_as(source: &LineSource, format: LogFormat) -> Result<Self> {
        let lines = read_nonempty(source)?;
        log::info!("Using {} format for {} as requested", format, source.describe());
        Ok(Self::build(source.describe(), &lines, format))
    }

    pub fn classify_and_build<S: AsRef<str>>(source: impl Into<String>, lines: &[S], classifier: &mut FormatClassifier) -> Result<Self> {
        let source = source.into();
        if lines.is_empty() {
            return Err(SiftError::EmptyInput(source));
        }
        let classification = classifier.classify(lines)?;
        let mut col = Self::build(source, lines, classification.format);
        col.classification = Some(classification);
        Ok(col)
    }

    pub fn build<S: AsRef<str>>(source: impl Into<String>, lines: &[S], format: LogFormat) -> Self {
        Self::build_with_year(source, lines, format, Local::now().year())
    }

    /// Parse with an explicit year for formats whose lines carry none.
    pub fn build_with_year<S: AsRef<str>>(source: impl Into<String>, lines: &[S], format: LogFormat, year: i32) -> Self {
        let records: Vec<LogRecord> = lines.iter().map(|l| format.parse_with_year(l.as_ref(), year)).collect();
        let source = source.into();
        let degraded = records.iter().filter(|r| r.is_sentinel()).count();
        log::info!("Built {} log from {}: {} records ({} degraded)", format, source, records.len(), degraded);
        Self::from_records(source, format, records)
    }

    pub fn from_records(source: impl Into<String>, format: LogFormat, records: Vec<LogRecord>) -> Self {
        Self { source: source.into(), format, records, built_at: Local::now(), classification: None }
    }

    /// Records whose payload matches, keeping the format tag.
    pub fn subset(&self, pattern: &Regex) -> Self {
        let records: Vec<LogRecord> = self.records.iter().filter(|r| pattern.is_match(&r.payload)).cloned().collect();
        log::debug!("Subset {} kept {} of {} records", pattern.as_str(), records.len(), self.records.len());
        Self {
            source: self.source.clone(),
            format: self.format,
            records,
            built_at: Local::now(),
            classification: self.classification,
        }
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn built_at(&self) -> DateTime<Local> {
        self.built_at
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }
}

impl<'a> IntoIterator for &'a LogCollection {
    type Item = &'a LogRecord;
    type IntoIter = std::slice::Iter<'a, LogRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn read_nonempty(source: &LineSource) -> Result<Vec<String>> {
    let lines = source.read_lines()?;
    if lines.is_empty() {
        return Err(SiftError::EmptyInput(source.describe()));
    }
    Ok(lines)
}
