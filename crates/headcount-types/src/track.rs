use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// 跟踪器分配的目标 ID，可能是整数也可能是字符串
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackId {
    Number(u64),
    Name(String),
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackId::Number(n) => write!(f, "{}", n),
            TrackId::Name(s) => f.write_str(s),
        }
    }
}

impl From<u64> for TrackId {
    fn from(id: u64) -> Self {
        TrackId::Number(id)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        TrackId::Name(id.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TrackParseError {
    #[error("track entry is not an object")]
    NotAnObject,

    #[error("malformed track entry: {0}")]
    Malformed(String),

    #[error("track entry has no id")]
    MissingId,

    #[error("track {0} has neither a centroid nor a bounding box")]
    MissingPosition(TrackId),

    #[error("track {0} has a non-finite coordinate")]
    NonFinite(TrackId),
}

/// 单帧中一个目标的位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPosition {
    pub id: TrackId,
    pub cx: f64,
    pub cy: f64,
}

#[derive(Deserialize)]
struct RawTrack {
    id: Option<TrackId>,
    cx: Option<f64>,
    cy: Option<f64>,
    bbox: Option<[f64; 4]>,
}

impl TrackPosition {
    pub fn new(id: impl Into<TrackId>, cx: f64, cy: f64) -> Self {
        Self {
            id: id.into(),
            cx,
            cy,
        }
    }

    /// 从跟踪器输出的单个条目解析位置。
    ///
    /// 接受 `{"id", "cx", "cy"}` 或 `{"id", "bbox": [x1, y1, x2, y2]}`，
    /// 后者的中心点按整数中点取整。
    pub fn from_value(value: &Value) -> Result<Self, TrackParseError> {
        if !value.is_object() {
            return Err(TrackParseError::NotAnObject);
        }
        let raw: RawTrack =
            serde_json::from_value(value.clone()).map_err(|e| TrackParseError::Malformed(e.to_string()))?;
        let id = raw.id.ok_or(TrackParseError::MissingId)?;

        let (cx, cy) = match (raw.cx, raw.cy, raw.bbox) {
            (Some(cx), Some(cy), _) => (cx, cy),
            (_, _, Some([x1, y1, x2, y2])) => (((x1 + x2) / 2.0).floor(), ((y1 + y2) / 2.0).floor()),
            _ => return Err(TrackParseError::MissingPosition(id)),
        };

        if !cx.is_finite() || !cy.is_finite() {
            return Err(TrackParseError::NonFinite(id));
        }

        Ok(Self { id, cx, cy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_centroid() {
        let pos = TrackPosition::from_value(&json!({"id": 7, "cx": 10, "cy": 190})).unwrap();
        assert_eq!(pos.id, TrackId::Number(7));
        assert_eq!(pos.cy, 190.0);
    }

    #[test]
    fn test_parse_bbox_midpoint() {
        let pos =
            TrackPosition::from_value(&json!({"id": "p-1", "bbox": [10, 181, 31, 208]})).unwrap();
        assert_eq!(pos.id, TrackId::Name("p-1".to_string()));
        assert_eq!(pos.cx, 20.0);
        assert_eq!(pos.cy, 194.0);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            TrackPosition::from_value(&json!([1, 2, 3])),
            Err(TrackParseError::NotAnObject)
        ));
        assert!(matches!(
            TrackPosition::from_value(&json!({"cx": 1, "cy": 2})),
            Err(TrackParseError::MissingId)
        ));
        assert!(matches!(
            TrackPosition::from_value(&json!({"id": 3, "cx": 1})),
            Err(TrackParseError::MissingPosition(_))
        ));
        assert!(matches!(
            TrackPosition::from_value(&json!({"id": 3, "cx": "a", "cy": 2})),
            Err(TrackParseError::Malformed(_))
        ));
    }
}
