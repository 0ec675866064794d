use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::classify::FormatClassifier;
use crate::collection::{LineSource, LogCollection};
use crate::config::FINGERPRINT_THRESHOLD;
use crate::error::{Result, SiftError};
use crate::frequency::FrequencyTable;
use crate::scrub::ScrubFilter;

/// A reference table describing one known noise pattern, named after its file.
#[derive(Clone, Debug)]
pub struct Fingerprint {
    pub name: String,
    pub table: FrequencyTable,
}

#[derive(Clone, Debug, Default)]
pub struct FingerprintCorpus {
    fingerprints: Vec<Fingerprint>,
    dir: Option<PathBuf>,
}

impl FingerprintCorpus {
    pub fn from_tables(fingerprints: Vec<Fingerprint>) -> Self {
        Self { fingerprints, dir: None }
    }

    /// First search directory that exists and has at least one entry.
    pub fn locate(dirs: &[PathBuf]) -> Result<PathBuf> {
        for d in dirs {
            let populated = std::fs::read_dir(d).map(|mut it| it.next().is_some()).unwrap_or(false);
            if populated {
                return Ok(d.clone());
            }
            log::debug!("Fingerprint dir {} missing or empty", d.to_string_lossy());
        }
        let searched: Vec<String> = dirs.iter().map(|d| d.to_string_lossy().into_owned()).collect();
        Err(SiftError::FingerprintCorpusNotFound(searched.join(", ")))
    }

    /// Run every marked file in the located directory through the normal
    /// classify and aggregate pipeline. Unreadable files are skipped.
    pub fn load(dirs: &[PathBuf], glob: &str, filter: &ScrubFilter, classifier: &mut FormatClassifier) -> Result<Self> {
        let dir = Self::locate(dirs)?;
        let set = marker_set(glob)?;
        let mut fingerprints = Vec::new();
        for de in WalkDir::new(&dir).max_depth(1).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = de.path();
            if !p.is_file() || !set.is_match(p) { continue; }
            match reference_table(p, filter, classifier) {
                Ok(table) => {
                    let name = de.file_name().to_string_lossy().into_owned();
                    log::debug!("Loaded fingerprint {} ({} keys)", name, table.len());
                    fingerprints.push(Fingerprint { name, table });
                }
                Err(e) => log::warn!("Skipping fingerprint {}: {}", p.to_string_lossy(), e),
            }
        }
        if fingerprints.is_empty() {
            return Err(SiftError::FingerprintCorpusNotFound(dir.to_string_lossy().into_owned()));
        }
        log::info!("Fingerprint corpus {}: {} files", dir.to_string_lossy(), fingerprints.len());
        Ok(Self { fingerprints, dir: Some(dir) })
    }

    pub fn fingerprints(&self) -> &[Fingerprint] {
        &self.fingerprints
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

fn marker_set(glob: &str) -> Result<GlobSet> {
    let err = |source| SiftError::InvalidGlob { glob: glob.to_string(), source };
    let mut gs = GlobSetBuilder::new();
    gs.add(GlobBuilder::new(glob).case_insensitive(true).build().map_err(err)?);
    gs.build().map_err(err)
}

fn reference_table(path: &Path, filter: &ScrubFilter, classifier: &mut FormatClassifier) -> Result<FrequencyTable> {
    let col = LogCollection::load(&LineSource::Path(path.to_path_buf()), classifier)?;
    Ok(FrequencyTable::build(&col, filter))
}

/// Scrub filter for reference tables: the named file when it resolves, an
/// empty filter otherwise.
pub fn reference_filter(name: &str, dirs: &[PathBuf]) -> ScrubFilter {
    match ScrubFilter::load(Some(name), dirs) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("Fingerprints built without a scrub filter: {}", e);
            ScrubFilter::empty()
        }
    }
}

/// Where the corpus comes from.
#[derive(Clone, Debug)]
pub enum CorpusSource {
    /// Search directories, file marker glob, scrub filter for the reference tables.
    Search { dirs: Vec<PathBuf>, glob: String, filter: ScrubFilter },
    /// Tables already built by the caller.
    Tables(Vec<Fingerprint>),
}

impl CorpusSource {
    fn load(&self, classifier: &mut FormatClassifier) -> Result<FingerprintCorpus> {
        match self {
            CorpusSource::Search { dirs, glob, filter } => FingerprintCorpus::load(dirs, glob, filter, classifier),
            CorpusSource::Tables(t) => Ok(FingerprintCorpus::from_tables(t.clone())),
        }
    }
}

/// Collapses known noise out of a table. The corpus is loaded on first use
/// and kept for later calls.
pub struct FingerprintMatcher {
    source: CorpusSource,
    corpus: Option<FingerprintCorpus>,
    coefficient: f64,
}

impl FingerprintMatcher {
    pub fn new(source: CorpusSource) -> Self {
        Self { source, corpus: None, coefficient: FINGERPRINT_THRESHOLD }
    }

    pub fn coefficient(mut self, c: f64) -> Self {
        self.coefficient = c;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.corpus.is_some()
    }

    pub fn corpus(&mut self, classifier: &mut FormatClassifier) -> Result<&FingerprintCorpus> {
        let corpus = match self.corpus.take() {
            Some(c) => c,
            None => self.source.load(classifier)?,
        };
        Ok(self.corpus.insert(corpus))
    }

    /// Test every fingerprint against `target`, collapsing the ones that fire.
    /// Returns the names of the fingerprints that fired, in corpus order.
    pub fn apply(&mut self, target: &mut FrequencyTable, classifier: &mut FormatClassifier) -> Result<Vec<String>> {
        let coefficient = self.coefficient;
        let corpus = self.corpus(classifier)?;
        let mut fired = Vec::new();
        for fp in corpus.fingerprints() {
            if match_fingerprint(target, fp, coefficient) {
                fired.push(fp.name.clone());
            }
        }
        Ok(fired)
    }
}

/// Scan the fingerprint's keys in insertion order. Once more than
/// `coefficient * len` of them are present in `target`, every present key is
/// removed and replaced by one entry named after the fingerprint.
pub fn match_fingerprint(target: &mut FrequencyTable, fp: &Fingerprint, coefficient: f64) -> bool {
    let threshold = fp.table.len() as f64 * coefficient;
    log::debug!("Testing fingerprint {} threshold {}", fp.name, threshold);
    let mut overlap = 0usize;
    for key in fp.table.keys() {
        if target.contains(key) {
            overlap += 1;
        }
        if overlap as f64 > threshold {
            let present: Vec<&str> = fp.table.keys().filter(|k| target.contains(k)).collect();
            let sample = present
                .last()
                .and_then(|k| fp.table.get(k))
                .and_then(|e| e.samples.first())
                .map(|r| r.with_payload(&fp.name));
            let removed = target.remove_all(present);
            if let Some(sample) = sample {
                target.increment(fp.name.clone(), sample);
            }
            log::info!("Found fingerprint {}: {} keys collapsed", fp.name, removed);
            return true;
        }
    }
    log::debug!("Fingerprint {} overlap {}", fp.name, overlap);
    false
}

#[cfg(test)]
mod tests_fingerprint {
    use super::*;
    use crate::entry::LogFormat;

    fn table(keys: &[&str]) -> FrequencyTable {
        let mut t = FrequencyTable::new();
        for k in keys {
            t.increment(*k, LogFormat::Raw.parse(k));
        }
        t
    }

    fn ten() -> Fingerprint {
        Fingerprint { name: "noise.fp".to_string(), table: table(&["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"]) }
    }

    #[test]
    fn collapse_above_threshold() {
        let mut target = table(&["A", "B", "C", "D"]);
        assert!(match_fingerprint(&mut target, &ten(), 0.3));
        assert_eq!(target.keys().collect::<Vec<_>>(), vec!["noise.fp"]);
        let e = target.get("noise.fp").unwrap();
        assert_eq!(e.count, 1);
        assert_eq!(e.samples[0].payload, "noise.fp");
    }

    #[test]
    fn at_threshold_leaves_target_alone() {
        let mut target = table(&["A", "B", "C", "Z"]);
        let before = target.clone();
        assert!(!match_fingerprint(&mut target, &ten(), 0.3));
        assert_eq!(target, before);
    }

    #[test]
    fn unrelated_keys_survive_collapse() {
        let mut target = table(&["Z", "A", "B", "C", "D", "E"]);
        assert!(match_fingerprint(&mut target, &ten(), 0.3));
        assert_eq!(target.keys().collect::<Vec<_>>(), vec!["Z", "noise.fp"]);
    }

    #[test]
    fn apply_reports_fired_names() {
        let quiet = Fingerprint { name: "quiet.fp".to_string(), table: table(&["X", "Y", "W"]) };
        let mut m = FingerprintMatcher::new(CorpusSource::Tables(vec![quiet, ten()]));
        let mut target = table(&["A", "B", "C", "D", "K"]);
        assert!(!m.is_loaded());
        let fired = m.apply(&mut target, &mut FormatClassifier::with_seed(1)).unwrap();
        assert!(m.is_loaded());
        assert_eq!(fired, vec!["noise.fp".to_string()]);
        assert_eq!(target.len(), 2);
    }

    const CRON: [&str; 3] = [
        "Oct 11 22:14:15 host1 CROND[100]: (root) CMD (run-parts /etc/cron.hourly)",
        "Oct 11 22:14:16 host1 run-parts(/etc/cron.hourly)[101]: starting 0anacron",
        "Oct 11 22:14:17 host1 run-parts(/etc/cron.hourly)[102]: finished 0anacron",
    ];

    #[test]
    fn loads_marked_files_from_first_populated_dir() {
        let empty = tempfile::tempdir().unwrap();
        let corpus = tempfile::tempdir().unwrap();
        std::fs::write(corpus.path().join("cron.fp"), CRON.join("\n")).unwrap();
        std::fs::write(corpus.path().join("README"), "not a fingerprint\n").unwrap();
        let dirs = vec![PathBuf::from("/nonexistent/logsift/fp"), empty.path().to_path_buf(), corpus.path().to_path_buf()];
        let filter = ScrubFilter::from_patterns(["[0-9]+"]).unwrap();
        let mut m = FingerprintMatcher::new(CorpusSource::Search { dirs, glob: "*.fp".to_string(), filter: filter.clone() });
        let mut classifier = FormatClassifier::with_seed(7);
        {
            let c = m.corpus(&mut classifier).unwrap();
            assert_eq!(c.len(), 1);
            assert_eq!(c.dir(), Some(corpus.path()));
        }

        let mut lines = CRON.to_vec();
        lines.push("Oct 11 22:20:00 host1 kernel: eth0 up");
        let col = LogCollection::build_with_year("t", &lines, LogFormat::Syslog, 2024);
        let mut target = FrequencyTable::build(&col, &filter);
        let fired = m.apply(&mut target, &mut classifier).unwrap();
        assert_eq!(fired, vec!["cron.fp".to_string()]);
        assert_eq!(target.keys().collect::<Vec<_>>(), vec!["kernel: eth# up", "cron.fp"]);
    }

    #[test]
    fn no_corpus_is_fatal() {
        let empty = tempfile::tempdir().unwrap();
        let mut m = FingerprintMatcher::new(CorpusSource::Search {
            dirs: vec![empty.path().to_path_buf()],
            glob: "*.fp".to_string(),
            filter: ScrubFilter::empty(),
        });
        let err = m.apply(&mut FrequencyTable::new(), &mut FormatClassifier::with_seed(0)).unwrap_err();
        assert!(matches!(err, SiftError::FingerprintCorpusNotFound(_)));
    }

    #[test]
    fn unmarked_files_only_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello\n").unwrap();
        let err = FingerprintCorpus::load(&[dir.path().to_path_buf()], "*.fp", &ScrubFilter::empty(), &mut FormatClassifier::with_seed(0)).unwrap_err();
        assert!(matches!(err, SiftError::FingerprintCorpusNotFound(_)));
    }

    #[test]
    fn missing_reference_scrub_falls_back_to_empty() {
        let f = reference_filter("hash.stopwords", &[PathBuf::from("/nonexistent/logsift/filters")]);
        assert!(f.is_empty());
    }
}
