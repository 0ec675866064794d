use comfy_table::{ContentArrangement, Table};
use rand::Rng;
use serde::Serialize;

use crate::collection::LogCollection;
use crate::entry::LogFormat;
use crate::frequency::{FrequencyTable, SampleMode};
use crate::histogram::{Granularity, TimeHistogram};

#[derive(Clone, Debug, Serialize)]
pub struct FrequencyRow {
    pub rank: usize,
    pub count: usize,
    pub key: String,
    pub rendering: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct FrequencyReport {
    pub source: String,
    pub format: LogFormat,
    pub records: usize,
    pub keys: usize,
    pub classifier_rounds: Option<usize>,
    pub fingerprints: Vec<String>,
    pub rows: Vec<FrequencyRow>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BucketRow {
    pub key: String,
    pub count: usize,
    pub height: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct HistogramReport {
    pub source: String,
    pub unit: Granularity,
    pub start: String,
    pub end: String,
    pub duration: usize,
    pub min_value: usize,
    pub max_value: usize,
    pub scale: f64,
    pub outside: usize,
    pub buckets: Vec<BucketRow>,
}

/// Ranked rows, cut to `top` when given.
pub fn frequency_rows<R: Rng + ?Sized>(table: &FrequencyTable, mode: SampleMode, top: Option<usize>, rng: &mut R) -> Vec<FrequencyRow> {
    table
        .ranked()
        .into_iter()
        .take(top.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, (k, e))| FrequencyRow {
            rank: i + 1,
            count: e.count,
            key: k.to_string(),
            rendering: FrequencyTable::rendering(k, e, mode, rng).to_string(),
        })
        .collect()
}

pub fn frequency_report(col: &LogCollection, table: &FrequencyTable, fingerprints: Vec<String>, rows: Vec<FrequencyRow>) -> FrequencyReport {
    FrequencyReport {
        source: col.source().to_string(),
        format: col.format(),
        records: col.len(),
        keys: table.len(),
        classifier_rounds: col.classification().map(|c| c.rounds),
        fingerprints,
        rows,
    }
}

pub fn histogram_report(col: &LogCollection, h: &TimeHistogram) -> HistogramReport {
    let fmt = "%Y-%m-%d %H:%M:%S";
    let buckets = h
        .buckets()
        .iter()
        .zip(h.heights())
        .map(|((k, c), height)| BucketRow { key: k.clone(), count: *c, height })
        .collect();
    HistogramReport {
        source: col.source().to_string(),
        unit: h.granularity(),
        start: h.start().format(fmt).to_string(),
        end: h.end().format(fmt).to_string(),
        duration: h.len(),
        min_value: h.min_value(),
        max_value: h.max_value(),
        scale: h.scale(),
        outside: h.outside(),
        buckets,
    }
}

pub fn frequency_lines(rows: &[FrequencyRow]) -> Vec<String> {
    rows.iter().map(|r| FrequencyTable::line(r.count, &r.rendering)).collect()
}

pub fn print_frequency_lines(rows: &[FrequencyRow]) {
    for line in frequency_lines(rows) {
        println!("{}", line);
    }
}

pub fn frequency_table_view(rows: &[FrequencyRow]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Count", "Message"]);
    for r in rows {
        table.add_row(vec![r.rank.to_string(), r.count.to_string(), r.rendering.clone()]);
    }
    table
}

pub fn write_json<T: Serialize>(path: &str, value: &T) -> Result<(), std::io::Error> {
    let f = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(f, value)?;
    Ok(())
}

pub fn write_frequency_csv(path: &str, rows: &[FrequencyRow]) -> Result<(), std::io::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["rank", "count", "key", "rendering"])?;
    for r in rows {
        wtr.write_record([r.rank.to_string(), r.count.to_string(), r.key.clone(), r.rendering.clone()])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_histogram_csv(path: &str, rep: &HistogramReport) -> Result<(), std::io::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["bucket", "count", "height"])?;
    for b in &rep.buckets {
        wtr.write_record([b.key.clone(), b.count.to_string(), b.height.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}
