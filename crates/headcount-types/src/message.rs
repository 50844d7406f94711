use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::counts::CounterState;

/// 推送给订阅者的计数消息（线上格式）
///
/// 未知字段在反序列化时被忽略，消费者需要容忍附加字段。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountsMessage {
    pub day_count: u64,
    pub existing_count: u64,
    #[serde(default)]
    pub is_monitoring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_bus_stops: Option<Value>,
}

impl CountsMessage {
    pub fn from_state(state: &CounterState, is_monitoring: bool) -> Self {
        Self {
            day_count: state.daily_total,
            existing_count: state.occupancy,
            is_monitoring,
            matched_bus_stops: None,
        }
    }

    /// 合并一次原始状态更新，缺失的字段保留旧值
    pub fn merge(&mut self, patch: StatePatch) {
        if let Some(day_count) = patch.day_count {
            self.day_count = day_count;
        }
        if let Some(existing_count) = patch.existing_count {
            self.existing_count = existing_count;
        }
        if let Some(is_monitoring) = patch.is_monitoring {
            self.is_monitoring = is_monitoring;
        }
        if let Some(stops) = patch.matched_bus_stops {
            self.matched_bus_stops = Some(stops);
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 没有可识别 `type` 的入站消息，按字段合并到最新状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    #[serde(default)]
    pub day_count: Option<u64>,
    #[serde(default)]
    pub existing_count: Option<u64>,
    #[serde(default)]
    pub is_monitoring: Option<bool>,
    #[serde(default)]
    pub matched_bus_stops: Option<Value>,
}

#[derive(Deserialize)]
struct MonitoringToggle {
    #[serde(rename = "isMonitoring")]
    is_monitoring: Option<bool>,
}

/// 入站消息
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `{"type": "monitoringToggle", "isMonitoring": bool}`，缺省时翻转当前值
    MonitoringToggle { is_monitoring: Option<bool> },
    StateUpdate(StatePatch),
}

impl InboundMessage {
    pub const MONITORING_TOGGLE: &'static str = "monitoringToggle";

    /// 编码一条监控开关消息
    pub fn toggle_json(is_monitoring: bool) -> String {
        serde_json::json!({
            "type": Self::MONITORING_TOGGLE,
            "isMonitoring": is_monitoring,
        })
        .to_string()
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let is_toggle = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(|t| t == Self::MONITORING_TOGGLE)
            .unwrap_or(false);

        if is_toggle {
            let toggle: MonitoringToggle = serde_json::from_value(value)?;
            return Ok(InboundMessage::MonitoringToggle {
                is_monitoring: toggle.is_monitoring,
            });
        }

        Ok(InboundMessage::StateUpdate(serde_json::from_value(value)?))
    }
}
