//! Read side of the session log: bucket-and-sum for the stats display and
//! the CSV export. The log itself is written by the daemon only.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Timelike, Utc};

use crate::{
    daemon::storage::entities::{LabelTypeMap, StatRecord},
    utils::time::format_timestamp,
};

/// Hour-of-day filter, `[start, end)` in the hours of the given timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourFilter {
    pub start: u32,
    pub end: u32,
}

impl HourFilter {
    pub fn all_day() -> Self {
        Self { start: 0, end: 24 }
    }

    fn contains<Tz: TimeZone>(&self, moment: DateTime<Utc>, tz: &Tz) -> bool {
        let hour = moment.with_timezone(tz).hour();
        self.start <= hour && hour < self.end
    }
}

/// Sums completed minutes per label over a time window.
///
/// Labels keep their first-seen order, which is the order sessions were
/// completed in. The timezone only matters for the hour-of-day filter.
pub fn aggregate<Tz: TimeZone>(
    records: &[StatRecord],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    hours: HourFilter,
    tz: &Tz,
) -> Vec<(String, u32)> {
    let mut totals: Vec<(String, u32)> = vec![];
    for record in records {
        let within_range = from <= record.timestamp && record.timestamp <= to;
        if !within_range || !hours.contains(record.timestamp, tz) {
            continue;
        }
        match totals.iter_mut().find(|(label, _)| *label == record.label) {
            Some((_, total)) => *total += record.duration,
            None => totals.push((record.label.clone(), record.duration)),
        }
    }
    totals
}

/// Fills missing categories from the last known label/type mapping. Old
/// records predate categories; the mapping is best effort, so some may stay
/// uncategorized.
pub fn backfill_kinds(records: &mut [StatRecord], label_types: &LabelTypeMap) {
    for record in records {
        if record.kind.is_none() {
            record.kind = label_types.get(&record.label).cloned();
        }
    }
}

/// Writes the export format: `label,duration,timestamp` with ISO-8601
/// timestamps. Byte-identical for the same records regardless of locale.
pub fn write_csv<W: Write>(records: &[StatRecord], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["label", "duration", "timestamp"])?;
    for record in records {
        writer.write_record([
            record.label.as_str(),
            &record.duration.to_string(),
            &format_timestamp(record.timestamp),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
