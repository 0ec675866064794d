use anyhow::Context;
use clap::{ArgAction, ColorChoice, CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use regex::Regex;

use logsift::classify::DEFAULT_SAMPLE_SIZE;
use logsift::config::{self, AppConfig, LogStyle, OutputFmt, TextFormat, FINGERPRINT_DIRS, FINGERPRINT_GLOB, FINGERPRINT_SCRUB, FINGERPRINT_THRESHOLD, SCRUB_DIRS};
use logsift::fingerprint::reference_filter;
use logsift::report;
use logsift::{CorpusSource, FingerprintMatcher, FormatClassifier, FrequencyTable, Granularity, GraphStyle, KeyPolicy, LineSource, LogCollection, LogFormat, SampleMode, ScrubFilter, TimeHistogram};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Report { Hash, DaemonHash, HostHash, WordHash, Graph }

impl Report {
    /// Key policy for table reports; `None` for the histogram.
    fn policy(self, format: LogFormat) -> Option<KeyPolicy> {
        match self {
            Report::Hash => Some(KeyPolicy::for_format(format)),
            Report::DaemonHash => Some(KeyPolicy::Daemon),
            Report::HostHash => Some(KeyPolicy::Host),
            Report::WordHash => Some(KeyPolicy::Word),
            Report::Graph => None,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Parser, Debug)]
#[command(
    name = "logsift",
    about = "Format-agnostic log triage",
    long_about = "Detects the format of an arbitrary log by sampling, then ranks canonical message shapes (folding known noise through fingerprints) or draws a time histogram.",
    after_long_help = "Examples:\n  logsift /var/log/messages --scrub hash.stopwords --sample threshold\n  logsift /var/log/secure --fingerprint --top 40\n  logsift access_log --report host-hash --text-format table\n  logsift /var/log/messages --report graph --unit minute --wide\n  zcat messages.1.gz | logsift - --report word-hash --output json",
    color = ColorChoice::Auto
)]
struct Args {
    /// Log file to analyze; `-` or absent reads standard input
    file: Option<String>,
    #[arg(long, value_enum, default_value = "hash")]
    report: Report,
    /// Histogram unit: second, minute, hour, day, month or year (default hour)
    #[arg(long)]
    unit: Option<String>,
    /// Scrub rule file name or path
    #[arg(long)]
    scrub: Option<String>,
    #[arg(long = "scrub-dir")]
    scrub_dirs: Vec<String>,
    #[arg(long, default_value_t = false, help = "Collapse known noise using the fingerprint corpus")]
    fingerprint: bool,
    #[arg(long = "fingerprint-dir")]
    fingerprint_dirs: Vec<String>,
    #[arg(long)]
    fingerprint_glob: Option<String>,
    #[arg(long)]
    fingerprint_scrub: Option<String>,
    #[arg(long)]
    fingerprint_threshold: Option<f64>,
    /// Rendering of ranked lines: all, none or threshold (default none)
    #[arg(long)]
    sample: Option<String>,
    #[arg(long, default_value_t = false)]
    wide: bool,
    #[arg(long)]
    tick: Option<char>,
    /// Skip detection and parse as this format
    #[arg(long)]
    format: Option<String>,
    /// Keep only records whose payload matches this regex
    #[arg(long)]
    grep: Option<String>,
    #[arg(long, default_value_t = false, help = "Print every parsed record instead of a report")]
    dump: bool,
    #[arg(long, short = 'n')]
    top: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    max_rounds: Option<usize>,
    #[arg(long)]
    sample_size: Option<usize>,
    #[arg(long, short = 'o', value_enum)]
    output: Option<OutputFmt>,
    #[arg(long, value_enum)]
    text_format: Option<TextFormat>,
    #[arg(long)]
    json_path: Option<String>,
    #[arg(long)]
    csv_path: Option<String>,
    #[arg(long, default_value_t = false)]
    progress: bool,
    /// Path to TOML config (default $LOGSIFT_CONFIG, then ./logsift.toml)
    #[arg(long)]
    config: Option<String>,
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogStyle>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(long, short = 'v', action = ArgAction::Count)]
    verbose: u8,
    #[arg(long, short = 'q', default_value_t = false)]
    quiet: bool,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
}

fn main() {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        clap_complete::generate(sh, &mut cmd, "logsift", &mut std::io::stdout());
        return;
    }
    match config::load_config(args.config.as_deref()) {
        Ok(Some(cfg)) => apply_config(&mut args, cfg),
        Ok(None) => {}
        Err(e) => eprintln!("logsift: {}", e),
    }
    init_logger(&args);
    if let Err(e) = run(args) {
        log::debug!("{:?}", e);
        eprintln!("logsift: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logger(args: &Args) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if args.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if let Some(lvl) = args.log_level {
        let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
        builder.filter_level(f);
    } else if args.verbose > 0 {
        let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
        builder.filter_level(f);
    }
    if let Some(fmt) = args.log_format {
        match fmt {
            LogStyle::Json => {
                builder.format(|buf, record| {
                    use std::io::Write;
                    let ts = chrono::Local::now().to_rfc3339();
                    let obj = serde_json::json!({
                        "ts": ts,
                        "level": record.level().to_string(),
                        "target": record.target(),
                        "msg": record.args().to_string(),
                    });
                    writeln!(buf, "{}", obj)
                });
            }
            LogStyle::Text => {
                builder.format(|buf, record| {
                    use std::io::Write;
                    let ts = chrono::Local::now().format("%H:%M:%S");
                    writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
                });
            }
        }
    }
    if let Some(path) = args.log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(f) => {
                builder.target(env_logger::Target::Pipe(Box::new(f)));
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path, e);
            }
        }
    }
    builder.init();
}

fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.scrub.is_none() && let Some(v) = cfg.scrub { args.scrub = Some(v); }
    if args.scrub_dirs.is_empty() && let Some(v) = cfg.scrub_dirs { args.scrub_dirs = v; }
    if args.fingerprint_dirs.is_empty() && let Some(v) = cfg.fingerprint_dirs { args.fingerprint_dirs = v; }
    if args.fingerprint_glob.is_none() && let Some(v) = cfg.fingerprint_glob { args.fingerprint_glob = Some(v); }
    if args.fingerprint_scrub.is_none() && let Some(v) = cfg.fingerprint_scrub { args.fingerprint_scrub = Some(v); }
    if args.fingerprint_threshold.is_none() && let Some(v) = cfg.fingerprint_threshold { args.fingerprint_threshold = Some(v); }
    if args.sample.is_none() && let Some(v) = cfg.sample { args.sample = Some(v); }
    if args.unit.is_none() && let Some(v) = cfg.unit { args.unit = Some(v); }
    if args.tick.is_none() && let Some(v) = cfg.tick { args.tick = Some(v); }
    if !args.wide && let Some(v) = cfg.wide { args.wide = v; }
    if args.seed.is_none() && let Some(v) = cfg.seed { args.seed = Some(v); }
    if args.max_rounds.is_none() && let Some(v) = cfg.max_rounds { args.max_rounds = Some(v); }
    if args.sample_size.is_none() && let Some(v) = cfg.sample_size { args.sample_size = Some(v); }
    if args.top.is_none() && let Some(v) = cfg.top { args.top = Some(v); }
    if args.output.is_none() && let Some(v) = cfg.output { args.output = Some(v); }
    if args.text_format.is_none() && let Some(v) = cfg.text_format { args.text_format = Some(v); }
    if args.json_path.is_none() && let Some(v) = cfg.json_path { args.json_path = Some(v); }
    if args.csv_path.is_none() && let Some(v) = cfg.csv_path { args.csv_path = Some(v); }
    if !args.progress && let Some(v) = cfg.progress { args.progress = v; }
    if args.log_format.is_none() && let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
}

fn spinner(enabled: bool, msg: String) -> Option<indicatif::ProgressBar> {
    if !enabled { return None; }
    let pb = indicatif::ProgressBar::new_spinner();
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb.set_message(msg);
    Some(pb)
}

fn run(args: Args) -> anyhow::Result<()> {
    let mode: SampleMode = args.sample.as_deref().unwrap_or("none").parse()?;
    let unit: Granularity = args.unit.as_deref().unwrap_or("hour").parse()?;
    let forced = args.format.as_deref().map(str::parse::<LogFormat>).transpose()?;
    let grep = args.grep.as_deref().map(Regex::new).transpose().context("invalid --grep pattern")?;
    let output = args.output.unwrap_or(OutputFmt::Text);

    let mut classifier = match args.seed { Some(s) => FormatClassifier::with_seed(s), None => FormatClassifier::new() }
        .max_rounds(args.max_rounds)
        .sample_size(args.sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE));

    let source = LineSource::from_arg(args.file.as_deref());
    let pb = spinner(args.progress, format!("Reading {}", source.describe()));
    let loaded = match forced {
        Some(f) => LogCollection::load_as(&source, f),
        None => LogCollection::load(&source, &mut classifier),
    };
    if let Some(pb) = pb { pb.finish_and_clear(); }
    let col = loaded.with_context(|| format!("cannot analyze {}", source.describe()))?;
    let col = match &grep { Some(re) => col.subset(re), None => col };
    log::info!(
        "Collection {}: {} {} records built {}{}",
        col.source(),
        col.len(),
        col.format(),
        col.built_at().format("%Y-%m-%d %H:%M:%S"),
        col.classification().map(|c| format!(" after {} rounds, tally {:?}", c.rounds, c.tally)).unwrap_or_default()
    );

    if args.dump {
        for r in &col {
            match output {
                OutputFmt::Text => println!("{}", r),
                OutputFmt::Json => println!("{}", serde_json::to_string(r)?),
            }
        }
        return Ok(());
    }

    match args.report.policy(col.format()) {
        Some(policy) => hash_report(&args, &col, policy, mode, output, &mut classifier),
        None => graph_report(&args, &col, unit, output),
    }
}

fn hash_report(args: &Args, col: &LogCollection, policy: KeyPolicy, mode: SampleMode, output: OutputFmt, classifier: &mut FormatClassifier) -> anyhow::Result<()> {
    let scrub_dirs = config::search_dirs(Some(args.scrub_dirs.as_slice()), &SCRUB_DIRS);
    let filter = ScrubFilter::load(args.scrub.as_deref(), &scrub_dirs)?;
    let mut table = FrequencyTable::build_with(col, policy, &filter);

    let mut fired = Vec::new();
    if args.fingerprint {
        let source = CorpusSource::Search {
            dirs: config::search_dirs(Some(args.fingerprint_dirs.as_slice()), &FINGERPRINT_DIRS),
            glob: args.fingerprint_glob.clone().unwrap_or_else(|| FINGERPRINT_GLOB.to_string()),
            filter: reference_filter(args.fingerprint_scrub.as_deref().unwrap_or(FINGERPRINT_SCRUB), &scrub_dirs),
        };
        let mut matcher = FingerprintMatcher::new(source).coefficient(args.fingerprint_threshold.unwrap_or(FINGERPRINT_THRESHOLD));
        let pb = spinner(args.progress, "Loading fingerprints".to_string());
        let applied = matcher.apply(&mut table, classifier);
        if let Some(pb) = pb { pb.finish_and_clear(); }
        fired = applied?;
        for name in &fired { log::info!("Fingerprint matched: {}", name); }
    }

    log::info!("Sample type: {:?}", mode);
    let rows = report::frequency_rows(&table, mode, args.top, &mut rand::rng());
    let rep = report::frequency_report(col, &table, fired, rows);
    match (output, args.text_format.unwrap_or(TextFormat::Lines)) {
        (OutputFmt::Json, _) => println!("{}", serde_json::to_string_pretty(&rep)?),
        (OutputFmt::Text, TextFormat::Lines) => report::print_frequency_lines(&rep.rows),
        (OutputFmt::Text, TextFormat::Table) => println!("{}", report::frequency_table_view(&rep.rows)),
    }
    if let Some(p) = args.json_path.as_ref() { report::write_json(p, &rep).with_context(|| format!("failed to write {}", p))?; }
    if let Some(p) = args.csv_path.as_ref() { report::write_frequency_csv(p, &rep.rows).with_context(|| format!("failed to write {}", p))?; }
    Ok(())
}

fn graph_report(args: &Args, col: &LogCollection, unit: Granularity, output: OutputFmt) -> anyhow::Result<()> {
    let h = TimeHistogram::build(col, unit)?;
    let rep = report::histogram_report(col, &h);
    match output {
        OutputFmt::Json => println!("{}", serde_json::to_string_pretty(&rep)?),
        OutputFmt::Text => h.display(&GraphStyle { tick: args.tick.unwrap_or('#'), wide: args.wide }),
    }
    if let Some(p) = args.json_path.as_ref() { report::write_json(p, &rep).with_context(|| format!("failed to write {}", p))?; }
    if let Some(p) = args.csv_path.as_ref() { report::write_histogram_csv(p, &rep).with_context(|| format!("failed to write {}", p))?; }
    Ok(())
}
