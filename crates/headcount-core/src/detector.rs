use headcount_types::Direction;
use serde::{Deserialize, Serialize};

use crate::error::{CountError, Result};
use crate::tracking::TrackedObject;

/// 目标相对于计数线的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrossingState {
    #[default]
    None,
    CrossedDown,
    CrossedUp,
}

/// 两条水平计数线及其容差带（像素）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryLines {
    /// 上线，落入容差带计为进入
    pub y_upper: f64,
    /// 下线，落入容差带计为离开
    pub y_lower: f64,
    pub tolerance: f64,
}

impl BoundaryLines {
    pub fn new(y_upper: f64, y_lower: f64, tolerance: f64) -> Self {
        Self {
            y_upper,
            y_lower,
            tolerance,
        }
    }

    /// 上线必须在下线之上，且两条容差带不能重叠，否则同一帧可能同时命中两条线
    pub fn validate(&self) -> Result<()> {
        if !self.y_upper.is_finite() || !self.y_lower.is_finite() || !self.tolerance.is_finite() {
            return Err(CountError::Config("boundary lines must be finite".to_string()));
        }
        if self.tolerance < 0.0 {
            return Err(CountError::Config(format!(
                "tolerance must not be negative (got {})",
                self.tolerance
            )));
        }
        if self.y_upper >= self.y_lower {
            return Err(CountError::Config(format!(
                "y_upper ({}) must be above y_lower ({})",
                self.y_upper, self.y_lower
            )));
        }
        if self.y_lower - self.y_upper <= 2.0 * self.tolerance {
            return Err(CountError::Config(format!(
                "tolerance bands overlap: lines {} and {} with tolerance {}",
                self.y_upper, self.y_lower, self.tolerance
            )));
        }
        Ok(())
    }

    pub fn in_upper_band(&self, cy: f64) -> bool {
        within(cy, self.y_upper, self.tolerance)
    }

    pub fn in_lower_band(&self, cy: f64) -> bool {
        within(cy, self.y_lower, self.tolerance)
    }
}

impl Default for BoundaryLines {
    fn default() -> Self {
        Self::new(194.0, 220.0, 6.0)
    }
}

fn within(cy: f64, line: f64, tolerance: f64) -> bool {
    cy >= line - tolerance && cy <= line + tolerance
}

/// 判断目标当前位置是否构成一次可计数的穿越，命中时更新目标状态。
///
/// 同方向重复命中被状态屏蔽，在容差带内来回抖动的中心点只计一次。
pub fn detect(track: &mut TrackedObject, lines: &BoundaryLines) -> Option<Direction> {
    let cy = track.cy;

    if lines.in_upper_band(cy) && track.state != CrossingState::CrossedDown {
        track.state = CrossingState::CrossedDown;
        return Some(Direction::Down);
    }

    if lines.in_lower_band(cy) && track.state != CrossingState::CrossedUp {
        track.state = CrossingState::CrossedUp;
        return Some(Direction::Up);
    }

    None
}
