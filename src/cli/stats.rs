use std::path::PathBuf;

use ansi_term::Colour;
use anyhow::Result;
use chrono::{Duration, Local, Utc};
use chrono_english::{parse_date_string, Dialect};
use clap::{CommandFactory, Parser, ValueEnum};

use crate::{
    daemon::storage::state::StateStorage,
    stats::{aggregate, backfill_kinds, write_csv, HourFilter},
    utils::dir::create_application_default_path,
    widget::term::parse_color,
};

use super::Args;

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    fn as_duration(self) -> Duration {
        match self {
            Period::Day => Duration::days(1),
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Day => write!(f, "day"),
            Period::Week => write!(f, "week"),
            Period::Month => write!(f, "month"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct StatsCommand {
    #[arg(
        long,
        value_enum,
        default_value_t = Period::Day,
        help = "Rolling window to sum over, counted back from now. Ignored when --start is given"
    )]
    period: Period,
    #[arg(
        long = "start",
        short,
        help = "Start of the range. Examples are \"yesterday\", \"1 hour ago\", \"15/03/2025\""
    )]
    start_date: Option<String>,
    #[arg(long = "end", short, help = "End of the range. Defaults to now")]
    end_date: Option<String>,
    #[arg(
        long = "from-hour",
        default_value_t = 0,
        help = "Only count sessions completed at or after this hour of the day"
    )]
    from_hour: u32,
    #[arg(
        long = "to-hour",
        default_value_t = 24,
        help = "Only count sessions completed before this hour of the day"
    )]
    to_hour: u32,
}

const BAR_WIDTH: usize = 40;

/// Command to process the `stats` command: per-label totals of completed
/// sessions in a range, drawn as a bar chart.
pub async fn process_stats_command(
    StatsCommand {
        period,
        start_date,
        end_date,
        from_hour,
        to_hour,
    }: StatsCommand,
) -> Result<()> {
    if from_hour >= to_hour || to_hour > 24 {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Hours must satisfy from < to <= 24, got {from_hour} and {to_hour}"),
            )
            .into());
    }

    let now = Local::now();
    let end = match end_date.map(|s| parse_date_string(&s, now, Dialect::Uk)) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate end date {e}"),
                )
                .into());
        }
        None => now,
    };
    let start = match start_date.map(|s| parse_date_string(&s, now, Dialect::Uk)) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate start date {e}"),
                )
                .into());
        }
        None => end - period.as_duration(),
    };

    let storage = state_storage()?;
    let mut records = storage.load_stats().await?;
    backfill_kinds(&mut records, &storage.load_label_types().await);
    let settings = storage.load_settings().await;

    // Colors of the chart follow the timer types, like everywhere else.
    let kind_of = |label: &str| {
        records
            .iter()
            .find(|r| r.label == label)
            .and_then(|r| r.kind.clone())
    };
    let color_of = |label: &str| {
        kind_of(label)
            .and_then(|kind| {
                settings
                    .timer_types
                    .iter()
                    .find(|t| t.name == kind)
                    .map(|t| t.color.clone())
            })
            .unwrap_or_default()
    };

    let totals = aggregate(
        &records,
        start.with_timezone(&Utc),
        end.with_timezone(&Utc),
        HourFilter {
            start: from_hour,
            end: to_hour,
        },
        &Local,
    );
    if totals.is_empty() {
        println!("No completed sessions in this range.");
        return Ok(());
    }

    let longest_label = totals.iter().map(|(label, _)| label.chars().count()).max();
    let scale_max = totals.iter().map(|&(_, total)| total).max().unwrap_or(1);
    for (label, total) in &totals {
        println!(
            "{:<label_width$}\t{:>7}\t{}",
            label,
            format_minutes(*total),
            bar(*total, scale_max, &color_of(label)),
            label_width = longest_label.unwrap_or(0),
        );
    }
    Ok(())
}

/// Command to process the `export` command. Writes the whole session log as
/// CSV, to stdout unless a file is given.
pub async fn process_export_command(output: Option<PathBuf>) -> Result<()> {
    let storage = state_storage()?;
    let records = storage.load_stats().await?;
    match output {
        Some(path) => {
            let file = std::fs::File::create(&path)?;
            write_csv(&records, file)?;
            println!("Exported {} records to {}", records.len(), path.display());
        }
        None => write_csv(&records, std::io::stdout().lock())?,
    }
    Ok(())
}

pub(super) fn state_storage() -> Result<StateStorage> {
    Ok(StateStorage::new(
        create_application_default_path()?.join("state"),
    )?)
}

fn bar(total: u32, scale_max: u32, color: &str) -> String {
    let cells = (total as f64 / scale_max.max(1) as f64 * BAR_WIDTH as f64).ceil() as usize;
    let bar = "█".repeat(cells.clamp(1, BAR_WIDTH));
    match parse_color(color) {
        Some((r, g, b)) => Colour::RGB(r, g, b).paint(bar).to_string(),
        None => bar,
    }
}

fn format_minutes(minutes: u32) -> String {
    if minutes >= 60 {
        format!("{}h{}m", minutes / 60, minutes % 60)
    } else {
        format!("{}m", minutes)
    }
}
