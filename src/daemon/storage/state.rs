use std::{io::ErrorKind, path::PathBuf};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, warn};

use super::entities::{LabelTypeMap, Settings, StatRecord, Timer};

const TIMERS_FILE: &str = "timers.json";
const SETTINGS_FILE: &str = "settings.json";
const LABEL_TYPES_FILE: &str = "label_types.json";
const STATS_FILE: &str = "stats.jsonl";

/// Disk backing of the daemon state.
///
/// Reads happen once on startup, writes after each mutation. Writes are
/// last-writer-wins and failures only get logged by the caller; losing the
/// change between a mutation and a crash is accepted.
pub struct StateStorage {
    dir: PathBuf,
}

impl StateStorage {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;

        Ok(Self { dir })
    }

    pub async fn load_timers(&self) -> Vec<Timer> {
        self.load_snapshot(TIMERS_FILE).await
    }

    pub async fn save_timers(&self, timers: &[Timer]) -> Result<()> {
        self.save_snapshot(TIMERS_FILE, &timers).await
    }

    pub async fn load_settings(&self) -> Settings {
        self.load_snapshot(SETTINGS_FILE).await
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.save_snapshot(SETTINGS_FILE, settings).await
    }

    pub async fn load_label_types(&self) -> LabelTypeMap {
        self.load_snapshot(LABEL_TYPES_FILE).await
    }

    pub async fn save_label_types(&self, map: &LabelTypeMap) -> Result<()> {
        self.save_snapshot(LABEL_TYPES_FILE, map).await
    }

    /// Appends completed sessions to the log. The log is shared with any
    /// concurrently exporting cli, hence the file lock.
    pub async fn append_stats(&self, records: &[StatRecord]) -> Result<()> {
        let mut file = File::options()
            .create(true)
            .append(true)
            .open(self.dir.join(STATS_FILE))
            .await?;

        file.lock_exclusive()?;
        let result = Self::append_lines(&mut file, records).await;
        file.unlock_async().await?;
        result
    }

    async fn append_lines(file: &mut File, records: &[StatRecord]) -> Result<()> {
        let mut buffer = Vec::<u8>::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads the whole session log. Corrupt lines are skipped so that a write
    /// cut off by a shutdown doesn't take the rest of the log with it.
    pub async fn load_stats(&self) -> Result<Vec<StatRecord>> {
        let path = self.dir.join(STATS_FILE);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let buffer = BufReader::new(file);
        let mut lines = buffer.lines();
        let mut records = vec![];
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<StatRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Skipping illegal record in {path:?}: {line}: {e}")
                }
            }
        }
        lines.into_inner().into_inner().unlock_async().await?;
        Ok(records)
    }

    async fn load_snapshot<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.dir.join(name);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to read {path:?}: {e}");
                }
                return T::default();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(e) => {
                // Fall back to defaults instead of refusing to start.
                warn!("Failed to parse {path:?}, starting from defaults: {e}");
                T::default()
            }
        }
    }

    async fn save_snapshot<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        debug!("Saving {path:?}");
        let data = serde_json::to_vec(value)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }
}
