use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::collection::LogCollection;
use crate::error::{Result, SiftError};

/// Rows drawn above the baseline.
pub const GRAPH_HEIGHT: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 6] =
        [Granularity::Second, Granularity::Minute, Granularity::Hour, Granularity::Day, Granularity::Month, Granularity::Year];

    /// Fixed number of buckets in a window.
    pub fn duration(self) -> usize {
        match self {
            Granularity::Second | Granularity::Minute => 60,
            Granularity::Hour => 24,
            Granularity::Day => 31,
            Granularity::Month => 12,
            Granularity::Year => 10,
        }
    }

    /// Length of the `YYYYMMDDhhmmss` prefix that identifies a bucket.
    pub fn key_len(self) -> usize {
        match self {
            Granularity::Second => 14,
            Granularity::Minute => 12,
            Granularity::Hour => 10,
            Granularity::Day => 8,
            Granularity::Month => 6,
            Granularity::Year => 4,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    /// Start of the bucket containing `dt`.
    pub fn truncate(self, dt: NaiveDateTime) -> Option<NaiveDateTime> {
        let d = dt.date();
        match self {
            Granularity::Second => d.and_hms_opt(dt.hour(), dt.minute(), dt.second()),
            Granularity::Minute => d.and_hms_opt(dt.hour(), dt.minute(), 0),
            Granularity::Hour => d.and_hms_opt(dt.hour(), 0, 0),
            Granularity::Day => d.and_hms_opt(0, 0, 0),
            Granularity::Month => NaiveDate::from_ymd_opt(d.year(), d.month(), 1)?.and_hms_opt(0, 0, 0),
            Granularity::Year => NaiveDate::from_ymd_opt(d.year(), 1, 1)?.and_hms_opt(0, 0, 0),
        }
    }

    /// Start of the `i`th bucket after `start`.
    pub fn step(self, start: NaiveDateTime, i: u32) -> Option<NaiveDateTime> {
        let n = i64::from(i);
        match self {
            Granularity::Second => start.checked_add_signed(Duration::seconds(n)),
            Granularity::Minute => start.checked_add_signed(Duration::minutes(n)),
            Granularity::Hour => start.checked_add_signed(Duration::hours(n)),
            Granularity::Day => start.checked_add_signed(Duration::days(n)),
            Granularity::Month => start.checked_add_months(Months::new(i)),
            Granularity::Year => start.checked_add_months(Months::new(i.checked_mul(12)?)),
        }
    }

    pub fn key(self, dt: NaiveDateTime) -> String {
        let mut k = format!("{:04}{:02}{:02}{:02}{:02}{:02}", dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second());
        k.truncate(self.key_len());
        k
    }

    /// Calendar field shown in tick labels, modulo 2000 so years print as two digits.
    pub fn field(self, dt: NaiveDateTime) -> u32 {
        let v = match self {
            Granularity::Second => dt.second() as i32,
            Granularity::Minute => dt.minute() as i32,
            Granularity::Hour => dt.hour() as i32,
            Granularity::Day => dt.day() as i32,
            Granularity::Month => dt.month() as i32,
            Granularity::Year => dt.year(),
        };
        v.rem_euclid(2000) as u32
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unit())
    }
}

impl FromStr for Granularity {
    type Err = SiftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let unit = lower.strip_suffix('s').unwrap_or(&lower);
        Granularity::ALL
            .into_iter()
            .find(|g| g.unit() == unit)
            .ok_or_else(|| SiftError::UnknownGranularity(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphStyle {
    pub tick: char,
    /// Two columns per bucket.
    pub wide: bool,
}

impl Default for GraphStyle {
    fn default() -> Self {
        Self { tick: '#', wide: false }
    }
}

/// Dense, zero-filled counts over a fixed window anchored at the first record.
#[derive(Clone, Debug)]
pub struct TimeHistogram {
    granularity: Granularity,
    slots: Vec<NaiveDateTime>,
    buckets: BTreeMap<String, usize>,
    outside: usize,
}

impl TimeHistogram {
    pub fn build(collection: &LogCollection, granularity: Granularity) -> Result<Self> {
        let first = collection.records().first().ok_or_else(|| SiftError::InvalidAnchor("empty collection".to_string()))?;
        if first.is_sentinel() {
            log::warn!("First record did not parse; window anchored at {}", first.stamp());
        }
        let start = first
            .datetime()
            .and_then(|dt| granularity.truncate(dt))
            .ok_or_else(|| SiftError::InvalidAnchor(first.stamp()))?;

        let mut slots = Vec::with_capacity(granularity.duration());
        let mut buckets = BTreeMap::new();
        for i in 0..granularity.duration() as u32 {
            let slot = granularity.step(start, i).ok_or_else(|| SiftError::InvalidAnchor(first.stamp()))?;
            buckets.insert(granularity.key(slot), 0usize);
            slots.push(slot);
        }

        let len = granularity.key_len();
        let mut outside = 0usize;
        for r in collection {
            let key = r.timestamp_key();
            match key.get(..len).and_then(|k| buckets.get_mut(k)) {
                Some(c) => *c += 1,
                None => outside += 1,
            }
        }
        log::info!(
            "{} histogram from {}: {} records in window, {} outside",
            granularity,
            granularity.key(start),
            collection.len() - outside,
            outside
        );
        Ok(Self { granularity, slots, buckets, outside })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Bucket key to count, in time order.
    pub fn buckets(&self) -> &BTreeMap<String, usize> {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Records that fell outside the window.
    pub fn outside(&self) -> usize {
        self.outside
    }

    pub fn start(&self) -> NaiveDateTime {
        self.slots[0]
    }

    pub fn middle(&self) -> NaiveDateTime {
        self.slots[self.slots.len() / 2]
    }

    pub fn end(&self) -> NaiveDateTime {
        self.slots[self.slots.len() - 1]
    }

    pub fn max_value(&self) -> usize {
        self.buckets.values().copied().max().unwrap_or(0)
    }

    pub fn min_value(&self) -> usize {
        self.buckets.values().copied().min().unwrap_or(0)
    }

    /// Counts per row of the drawing.
    pub fn scale(&self) -> f64 {
        (self.max_value() - self.min_value()) as f64 / f64::from(GRAPH_HEIGHT)
    }

    /// Each bucket rescaled to `0..=GRAPH_HEIGHT`. When the window has empty
    /// buckets the floor becomes half the smallest nonzero count, so sparse
    /// buckets still get at least one row.
    pub fn heights(&self) -> Vec<u32> {
        let max = self.max_value() as f64;
        let min = self.min_value();
        let floor = if min == 0 {
            self.buckets.values().copied().filter(|v| *v > 0).min().map(|v| v as f64 / 2.0).unwrap_or(0.0)
        } else {
            min as f64
        };
        let top = f64::from(GRAPH_HEIGHT);
        self.buckets
            .values()
            .map(|&v| {
                if v == 0 {
                    0
                } else if max > floor {
                    ((v as f64 - floor) / (max - floor) * top).ceil().clamp(0.0, top) as u32
                } else {
                    GRAPH_HEIGHT
                }
            })
            .collect()
    }

    fn tick_row(&self, wide: bool) -> String {
        let col = if wide { 2 } else { 1 };
        let width = (self.slots.len() * col).max(2);
        let mut row = vec![' '; width];
        let n = self.slots.len();
        let marks = [(0, self.start()), ((n / 2) * col, self.middle()), (width - 2, self.end())];
        for (pos, dt) in marks {
            let label = format!("{:02}", self.granularity.field(dt));
            let pos = pos.min(width.saturating_sub(label.len()));
            for (i, ch) in label.chars().enumerate() {
                if let Some(slot) = row.get_mut(pos + i) {
                    *slot = ch;
                }
            }
        }
        row.into_iter().collect()
    }

    pub fn render(&self, style: &GraphStyle) -> String {
        let (fill, blank) = if style.wide { (format!("{} ", style.tick), "  ") } else { (style.tick.to_string(), " ") };
        let heights = self.heights();
        let mut out = String::new();
        for row in (1..=GRAPH_HEIGHT).rev() {
            for h in &heights {
                out.push_str(if *h >= row { &fill } else { blank });
            }
            out.push('\n');
        }
        out.push_str(&fill.repeat(heights.len()));
        out.push('\n');
        out.push_str(&self.tick_row(style.wide));
        out.push_str("\n\n");
        let fmt = "%Y-%m-%d %H:%M:%S";
        let _ = writeln!(out, "Start Time:\t{}\t\tMinimum Value: {}", self.start().format(fmt), self.min_value());
        let _ = writeln!(out, "End Time:\t{}\t\tMaximum Value: {}", self.end().format(fmt), self.max_value());
        let _ = writeln!(out, "Duration:\t{} {}s\t\t\tScale: {}", self.len(), self.granularity, self.scale());
        out
    }

    pub fn display(&self, style: &GraphStyle) {
        println!();
        print!("{}", self.render(style));
        println!();
    }
}

#[cfg(test)]
mod tests_histogram {
    use super::*;
    use crate::entry::LogFormat;
    use test_case::test_case;

    fn rsyslog(lines: &[&str]) -> LogCollection {
        LogCollection::build("t", lines, LogFormat::RSyslog)
    }

    #[test_case(Granularity::Second, 60)]
    #[test_case(Granularity::Minute, 60)]
    #[test_case(Granularity::Hour, 24)]
    #[test_case(Granularity::Day, 31)]
    #[test_case(Granularity::Month, 12)]
    #[test_case(Granularity::Year, 10)]
    fn window_is_always_dense(g: Granularity, expected: usize) {
        let single = rsyslog(&["2023-12-31T23:59:30Z h d: one"]);
        assert_eq!(TimeHistogram::build(&single, g).unwrap().len(), expected);

        let many: Vec<String> = (0..500)
            .map(|i| format!("2023-12-31T23:59:30Z h d: x{}", i))
            .chain(["1999-01-01T00:00:00Z h d: far past".to_string()])
            .collect();
        let h = TimeHistogram::build(&rsyslog(&many.iter().map(String::as_str).collect::<Vec<_>>()), g).unwrap();
        assert_eq!(h.len(), expected);
        assert_eq!(h.buckets().values().sum::<usize>(), 500);
        assert_eq!(h.outside(), 1);
    }

    #[test]
    fn month_window_crosses_year() {
        let h = TimeHistogram::build(&rsyslog(&["2023-11-15T10:00:00Z h d: a"]), Granularity::Month).unwrap();
        let keys: Vec<&str> = h.buckets().keys().map(String::as_str).collect();
        assert_eq!(keys.first(), Some(&"202311"));
        assert_eq!(keys.last(), Some(&"202410"));
        assert_eq!(h.buckets()["202311"], 1);
    }

    #[test]
    fn records_outside_window_are_ignored() {
        let h = TimeHistogram::build(
            &rsyslog(&[
                "2024-03-01T10:15:00Z h d: a",
                "2024-03-01T10:59:59Z h d: b",
                "2024-03-01T12:00:00Z h d: c",
                "2024-03-02T10:00:00Z h d: too late",
                "2024-03-01T09:59:00Z h d: too early",
            ]),
            Granularity::Hour,
        )
        .unwrap();
        assert_eq!(h.buckets()["2024030110"], 2);
        assert_eq!(h.buckets()["2024030112"], 1);
        assert_eq!(h.outside(), 2);
        assert_eq!((h.min_value(), h.max_value()), (0, 2));
    }

    #[test]
    fn sparse_buckets_get_a_row() {
        let mut lines = vec!["2024-03-01T10:00:00Z h d: a"];
        lines.extend(vec!["2024-03-01T11:00:00Z h d: b"; 10]);
        let h = TimeHistogram::build(&rsyslog(&lines), Granularity::Hour).unwrap();
        let heights = h.heights();
        assert_eq!(heights[0], 1);
        assert_eq!(heights[1], 6);
        assert!(heights[2..].iter().all(|v| *v == 0));
        assert!((h.scale() - 10.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn flat_window_fills_every_row() {
        let lines: Vec<String> = (0..10).map(|y| format!("{}-06-01T00:00:00Z h d: x", 2010 + y)).collect();
        let h = TimeHistogram::build(&rsyslog(&lines.iter().map(String::as_str).collect::<Vec<_>>()), Granularity::Year).unwrap();
        assert_eq!(h.min_value(), 1);
        assert!(h.heights().iter().all(|v| *v == GRAPH_HEIGHT));
    }

    #[test]
    fn render_layout() {
        let h = TimeHistogram::build(&rsyslog(&["2024-03-01T22:30:00Z h d: a"]), Granularity::Hour).unwrap();
        let out = h.render(&GraphStyle::default());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], format!("#{}", " ".repeat(23)));
        assert_eq!(lines[6], "#".repeat(24));
        assert_eq!(lines[7], format!("22{}10{}21", " ".repeat(10), " ".repeat(8)));
        assert_eq!(lines[8], "");
        assert!(lines[9].starts_with("Start Time:\t2024-03-01 22:00:00"));
        assert!(lines[10].starts_with("End Time:\t2024-03-02 21:00:00"));
        assert!(lines[11].starts_with("Duration:\t24 hours"));
    }

    #[test]
    fn wide_render_doubles_columns() {
        let h = TimeHistogram::build(&rsyslog(&["2024-03-01T22:30:00Z h d: a"]), Granularity::Year).unwrap();
        let out = h.render(&GraphStyle { tick: '*', wide: true });
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[6], "* ".repeat(10));
        assert_eq!(lines[7].len(), 20);
        assert!(lines[7].starts_with("24"));
        assert!(lines[7].ends_with("33"));
        assert_eq!(&lines[7][10..12], "29");
    }

    #[test]
    fn empty_collection_has_no_anchor() {
        let col = LogCollection::build("t", &[] as &[&str], LogFormat::Syslog);
        assert!(matches!(TimeHistogram::build(&col, Granularity::Hour), Err(SiftError::InvalidAnchor(_))));
    }

    #[test]
    fn leap_day_in_common_year_anchors_on_sentinel() {
        let lines = ["Feb 29 06:00:00 client syslogd: restart", "Mar  1 06:00:00 client syslogd: restart"];
        let col = LogCollection::build_with_year("t", &lines, LogFormat::Syslog, 2023);
        let h = TimeHistogram::build(&col, Granularity::Hour).unwrap();
        assert_eq!(h.len(), 24);
        assert_eq!(h.buckets().get("1900010100"), Some(&1));
        assert_eq!(h.outside(), 1);
    }

    #[test]
    fn granularity_parse() {
        assert_eq!("hours".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!("Day".parse::<Granularity>().unwrap(), Granularity::Day);
        assert!("week".parse::<Granularity>().is_err());
    }
}
