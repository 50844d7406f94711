use chrono::NaiveDateTime;
use headcount_core::Transition;
use headcount_shutdown::ShutdownListener;
use headcount_types::{EventKind, EventLogEntry, TIMESTAMP_FORMAT};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::StorageError;

pub const EVENT_LOG_HEADER: &str = "Timestamp,Event,Count,Monitoring_Active";

/// 只追加的计数事件日志
pub struct CsvEventLog {
    path: PathBuf,
}

impl CsvEventLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &EventLogEntry) -> Result<(), StorageError> {
        let is_new = !fs::try_exists(&self.path).await.unwrap_or(false);
        if is_new {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut line = String::new();
        if is_new {
            line.push_str(EVENT_LOG_HEADER);
            line.push('\n');
        }
        line.push_str(&format!(
            "{},{},{},{}\n",
            entry.timestamp.format(TIMESTAMP_FORMAT),
            entry.event,
            entry.count,
            if entry.monitoring_active { "True" } else { "False" }
        ));

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn entries(&self) -> Result<Vec<EventLogEntry>, StorageError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .enumerate()
            .skip(1)
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| parse_row(i + 1, line))
            .collect()
    }
}

fn parse_row(line: usize, row: &str) -> Result<EventLogEntry, StorageError> {
    let malformed = |reason: &str| StorageError::Malformed {
        line,
        reason: reason.to_string(),
    };

    let fields: Vec<&str> = row.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(malformed("expected 4 columns"));
    }

    let timestamp = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
        .map_err(|_| malformed("bad timestamp"))?;
    let event = match fields[1] {
        "Increment" => EventKind::Increment,
        "Decrement" => EventKind::Decrement,
        _ => return Err(malformed("unknown event")),
    };
    let count = fields[2].parse::<u64>().map_err(|_| malformed("bad count"))?;
    let monitoring_active = fields[3].eq_ignore_ascii_case("true");

    Ok(EventLogEntry {
        timestamp,
        event,
        count,
        monitoring_active,
    })
}

fn entry_for(transition: &Transition) -> Option<EventLogEntry> {
    let event = transition.event_kind()?;
    Some(EventLogEntry {
        timestamp: transition.state.last_updated.naive_local(),
        event,
        count: transition.state.occupancy,
        monitoring_active: transition.is_monitoring,
    })
}

/// 写入一行，返回是否写成功
async fn record(log: &CsvEventLog, transition: &Transition) -> bool {
    let Some(entry) = entry_for(transition) else {
        return false;
    };
    match log.append(&entry).await {
        Ok(()) => {
            debug!(event = %entry.event, count = entry.count, "Event logged");
            true
        }
        Err(e) => {
            warn!(path = ?log.path(), error = %e, "Failed to append event log row");
            false
        }
    }
}

/// 事件日志任务：把每次增减写成一行，关闭时写完已排队的变更再退出
///
/// 输入来自总线的 journal 订阅，按发布顺序逐条到达，不会丢行。
pub async fn run_event_log(
    log: CsvEventLog,
    mut rx: mpsc::UnboundedReceiver<Transition>,
    mut shutdown: ShutdownListener,
) {
    info!(path = ?log.path(), "Event log writer started");

    let mut written = 0u64;
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(transition) => {
                    if record(&log, &transition).await {
                        written += 1;
                    }
                }
                None => break,
            },
            _ = shutdown.wait() => {
                while let Ok(transition) = rx.try_recv() {
                    if record(&log, &transition).await {
                        written += 1;
                    }
                }
                break;
            }
        }
    }

    info!(rows = written, "Event log writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use headcount_core::{TransitionBus, TransitionKind};
    use headcount_shutdown::SignalHandler;
    use headcount_types::CounterState;
    use tempfile::tempdir;

    fn transition(kind: TransitionKind, occupancy: u64, is_monitoring: bool) -> Transition {
        Transition {
            kind,
            state: CounterState::new(
                occupancy,
                occupancy,
                Local.with_ymd_and_hms(2024, 5, 10, 8, 30, 0).unwrap(),
            ),
            is_monitoring,
        }
    }

    #[tokio::test]
    async fn test_append_writes_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/monitoring_timestamps.csv");
        let log = CsvEventLog::new(&path);

        for t in [
            transition(TransitionKind::Increment, 1, false),
            transition(TransitionKind::Decrement, 0, true),
        ] {
            log.append(&entry_for(&t).unwrap()).await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "Timestamp,Event,Count,Monitoring_Active\n\
             2024-05-10 08:30:00,Increment,1,False\n\
             2024-05-10 08:30:00,Decrement,0,True\n"
        );

        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event, EventKind::Decrement);
        assert!(entries[1].monitoring_active);
    }

    #[test]
    fn test_only_increments_and_decrements_are_logged() {
        assert!(entry_for(&transition(TransitionKind::Rollover, 0, false)).is_none());
        assert!(entry_for(&transition(TransitionKind::Monitoring, 0, true)).is_none());
        assert!(entry_for(&transition(TransitionKind::Resync, 0, false)).is_none());
    }

    #[tokio::test]
    async fn test_writer_drains_on_shutdown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let bus = TransitionBus::new(16);
        let (handler, listener) = SignalHandler::new();

        let rx = bus.subscribe_journal();
        bus.publish(transition(TransitionKind::Increment, 1, false)).unwrap();
        bus.publish(transition(TransitionKind::Monitoring, 1, true)).unwrap();
        bus.publish(transition(TransitionKind::Increment, 2, true)).unwrap();
        handler.trigger_shutdown();

        run_event_log(CsvEventLog::new(&path), rx, listener).await;

        let entries = CsvEventLog::new(&path).entries().await.unwrap();
        let counts: Vec<u64> = entries.iter().map(|e| e.count).collect();
        assert_eq!(counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_writer_keeps_up_with_a_small_bus() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let bus = TransitionBus::new(4);
        let (_handler, listener) = SignalHandler::new();

        let rx = bus.subscribe_journal();
        for n in 1..=200 {
            bus.publish(transition(TransitionKind::Increment, n, false)).unwrap();
        }
        drop(bus);

        run_event_log(CsvEventLog::new(&path), rx, listener).await;

        let entries = CsvEventLog::new(&path).entries().await.unwrap();
        let counts: Vec<u64> = entries.iter().map(|e| e.count).collect();
        assert_eq!(counts, (1..=200).collect::<Vec<u64>>());
    }
}
