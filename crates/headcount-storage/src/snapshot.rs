use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use headcount_core::{Result as CountResult, SnapshotStore};
use headcount_types::{SnapshotRecord, TIMESTAMP_FORMAT};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;

pub const SNAPSHOT_HEADER: &str = "Timestamp,Total_Count,Existing_count";

/// CSV 每日快照文件，每天一行，同日写入替换原行
pub struct CsvSnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取数据行（不含表头），文件不存在时为空
    async fn read_lines(&self) -> Result<Vec<String>, StorageError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .enumerate()
            .filter(|(i, line)| !(*i == 0 && line.starts_with("Timestamp")))
            .map(|(_, line)| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    pub async fn records(&self) -> Result<Vec<SnapshotRecord>, StorageError> {
        let lines = self.read_lines().await?;
        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match parse_row(i + 1, line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = ?self.path, error = %e, "Skipping snapshot row"),
            }
        }
        Ok(records)
    }

    async fn write_lines(&self, lines: &[String]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut content = String::from(SNAPSHOT_HEADER);
        content.push('\n');
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }

        // 先写临时文件再原子重命名
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for CsvSnapshotStore {
    async fn load_latest(&self) -> CountResult<Option<SnapshotRecord>> {
        let records = self.records().await?;
        let mut latest: Option<SnapshotRecord> = None;
        for record in records {
            if latest.as_ref().map_or(true, |l| record.date >= l.date) {
                latest = Some(record);
            }
        }
        Ok(latest)
    }

    async fn save(&self, record: &SnapshotRecord) -> CountResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut lines: Vec<String> = self
            .read_lines()
            .await?
            .into_iter()
            .enumerate()
            .filter(|(i, line)| match parse_row(i + 1, line) {
                Ok(existing) => existing.date != record.date,
                Err(_) => true,
            })
            .map(|(_, line)| line)
            .collect();
        lines.push(format_row(record));

        self.write_lines(&lines).await?;
        debug!(path = ?self.path, date = %record.date, "Snapshot row written");
        Ok(())
    }
}

fn format_row(record: &SnapshotRecord) -> String {
    format!(
        "{},{},{}",
        record.written_at.format(TIMESTAMP_FORMAT),
        record.daily_total,
        record.occupancy
    )
}

fn parse_row(line: usize, row: &str) -> Result<SnapshotRecord, StorageError> {
    let malformed = |reason: &str| StorageError::Malformed {
        line,
        reason: reason.to_string(),
    };

    let fields: Vec<&str> = row.split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return Err(malformed("expected 3 columns"));
    }

    let written_at = parse_timestamp(fields[0]).ok_or_else(|| malformed("bad timestamp"))?;
    let daily_total = fields[1]
        .parse::<u64>()
        .map_err(|_| malformed("bad Total_Count"))?;
    let occupancy = fields[2]
        .parse::<u64>()
        .map_err(|_| malformed("bad Existing_count"))?;

    Ok(SnapshotRecord::new(written_at, daily_total, occupancy))
}

/// 完整时间戳优先，否则只取前 10 个字符作为日期
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
        return Some(ts);
    }
    let date = value.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}
