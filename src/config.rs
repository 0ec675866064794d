use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "LOGSIFT_CONFIG";
pub const DEFAULT_CONFIG: &str = "logsift.toml";

pub const SCRUB_DIRS: [&str; 3] = [
    "/var/lib/logsift/filters",
    "/usr/local/logsift/var/lib/filters",
    "/opt/logsift/var/lib/filters",
];

pub const FINGERPRINT_DIRS: [&str; 3] = [
    "/var/lib/logsift/fingerprints",
    "/usr/local/logsift/var/lib/fingerprints",
    "/opt/logsift/var/lib/fingerprints",
];

/// Marker a corpus file must carry to be treated as a fingerprint.
pub const FINGERPRINT_GLOB: &str = "*.fp";
/// Scrub file the reference tables are built with.
pub const FINGERPRINT_SCRUB: &str = "hash.stopwords";
pub const FINGERPRINT_THRESHOLD: f64 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFmt { Text, Json }

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat { Lines, Table }

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStyle { Text, Json }

/// Values read from `logsift.toml`. Every key is optional; flags given on
/// the command line take precedence.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AppConfig {
    pub scrub: Option<String>,
    pub scrub_dirs: Option<Vec<String>>,
    pub fingerprint_dirs: Option<Vec<String>>,
    pub fingerprint_glob: Option<String>,
    pub fingerprint_scrub: Option<String>,
    pub fingerprint_threshold: Option<f64>,
    pub sample: Option<String>,
    pub unit: Option<String>,
    pub tick: Option<char>,
    pub wide: Option<bool>,
    pub seed: Option<u64>,
    pub max_rounds: Option<usize>,
    pub sample_size: Option<usize>,
    pub top: Option<usize>,
    pub output: Option<OutputFmt>,
    pub text_format: Option<TextFormat>,
    pub json_path: Option<String>,
    pub csv_path: Option<String>,
    pub progress: Option<bool>,
    pub log_format: Option<LogStyle>,
    pub log_path: Option<String>,
}

/// Explicit path, then `$LOGSIFT_CONFIG`, then `./logsift.toml`. A missing
/// default file is `Ok(None)`; an unreadable or malformed file that was asked
/// for comes back as the message to report.
pub fn load_config(path_opt: Option<&str>) -> Result<Option<AppConfig>, String> {
    let explicit = path_opt.map(|s| s.to_string()).or_else(|| std::env::var(CONFIG_ENV).ok());
    let path = match explicit {
        Some(p) => PathBuf::from(p),
        None => {
            let p = PathBuf::from(DEFAULT_CONFIG);
            if !p.is_file() { return Ok(None); }
            p
        }
    };
    let data = std::fs::read_to_string(&path).map_err(|e| format!("Failed to read config file {}: {}", path.to_string_lossy(), e))?;
    let cfg: AppConfig = toml::from_str(&data).map_err(|e| format!("Failed to parse config file {}: {}", path.to_string_lossy(), e))?;
    log::debug!("Loaded config from {}", path.to_string_lossy());
    Ok(Some(cfg))
}

/// Configured directories first, then the built-in install locations.
pub fn search_dirs(configured: Option<&[String]>, defaults: &[&str]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = configured.unwrap_or_default().iter().map(PathBuf::from).collect();
    dirs.extend(defaults.iter().map(PathBuf::from));
    dirs
}

/// A name that is already an existing file wins; otherwise the first
/// `dir/name` that exists.
pub fn resolve_resource(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let direct = Path::new(name);
    if direct.is_file() {
        return Some(direct.to_path_buf());
    }
    dirs.iter().map(|d| d.join(name)).find(|p| p.is_file())
}
