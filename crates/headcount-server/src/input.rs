use chrono::{DateTime, Local};
use headcount_types::{InboundMessage, TrackPosition};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized input line")]
    Unrecognized,

    #[error("invalid frame timestamp: {0}")]
    Timestamp(String),
}

/// 跟踪器输出的一帧
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub tracks: Vec<TrackPosition>,
    /// 帧时间，缺省时使用本地时钟
    pub timestamp: Option<DateTime<Local>>,
    /// 本帧中解析失败被跳过的目标数
    pub skipped: usize,
}

/// 输入流中的一行
#[derive(Debug, Clone, PartialEq)]
pub enum InputLine {
    Frame(Frame),
    /// 监控开关，缺省时翻转当前值
    MonitoringToggle(Option<bool>),
}

/// 解析一行 NDJSON 输入。
///
/// 支持 `{"tracks": [...], "ts": "..."}`、裸数组 `[...]`，
/// 以及 `{"type": "monitoringToggle", "isMonitoring": bool}`。
pub fn parse_line(line: &str) -> Result<InputLine, InputError> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("type").is_some() {
        return match InboundMessage::from_value(value)? {
            InboundMessage::MonitoringToggle { is_monitoring } => {
                Ok(InputLine::MonitoringToggle(is_monitoring))
            }
            InboundMessage::StateUpdate(_) => Err(InputError::Unrecognized),
        };
    }

    match value {
        Value::Array(items) => Ok(InputLine::Frame(parse_tracks(&items, None))),
        Value::Object(map) => {
            let items = match map.get("tracks") {
                Some(Value::Array(items)) => items,
                _ => return Err(InputError::Unrecognized),
            };
            let timestamp = match map.get("ts") {
                None | Some(Value::Null) => None,
                Some(Value::String(ts)) => Some(
                    DateTime::parse_from_rfc3339(ts)
                        .map_err(|e| InputError::Timestamp(e.to_string()))?
                        .with_timezone(&Local),
                ),
                Some(other) => return Err(InputError::Timestamp(other.to_string())),
            };
            Ok(InputLine::Frame(parse_tracks(items, timestamp)))
        }
        _ => Err(InputError::Unrecognized),
    }
}

fn parse_tracks(items: &[Value], timestamp: Option<DateTime<Local>>) -> Frame {
    let mut tracks = Vec::with_capacity(items.len());
    let mut skipped = 0;

    for item in items {
        match TrackPosition::from_value(item) {
            Ok(pos) => tracks.push(pos),
            Err(e) => {
                debug!(error = %e, "Skipping malformed track");
                skipped += 1;
            }
        }
    }

    Frame {
        tracks,
        timestamp,
        skipped,
    }
}
