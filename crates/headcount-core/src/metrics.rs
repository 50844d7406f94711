use headcount_types::{CounterState, Direction};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::error::{CountError, Result};

/// 初始化 Prometheus metrics exporter
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| CountError::Config(format!("Failed to install Prometheus exporter: {}", e)))?;

    describe_metrics();

    tracing::info!("Metrics exporter started on http://{}/metrics", addr);
    Ok(())
}

/// 描述所有指标，安装 exporter 后调用一次
pub fn describe_metrics() {
    // 计数相关指标
    describe_counter!(
        "headcount_crossings_total",
        "Total number of counted boundary crossings"
    );
    describe_counter!(
        "headcount_tracks_evicted_total",
        "Total number of tracks evicted after going unseen"
    );
    describe_gauge!("headcount_occupancy", "Current occupancy");
    describe_gauge!("headcount_daily_total", "Entries counted today");

    // 广播相关指标
    describe_counter!(
        "headcount_hub_messages_total",
        "Total number of state broadcasts sent by the hub"
    );
    describe_counter!(
        "headcount_hub_pruned_total",
        "Subscribers removed after a failed delivery"
    );
    describe_gauge!("headcount_hub_subscribers", "Connected subscribers");

    // 发布端指标
    describe_counter!(
        "headcount_publisher_dropped_total",
        "States dropped by the publisher while not connected"
    );
    describe_counter!(
        "headcount_publisher_reconnects_total",
        "Connection attempts made by the publisher"
    );
}

/// 记录一次穿越
pub fn record_crossing(direction: Direction) {
    counter!("headcount_crossings_total", 1, "direction" => direction.as_str());
}

pub fn record_track_evicted() {
    counter!("headcount_tracks_evicted_total", 1);
}

/// 同步计数状态
pub fn set_counter_state(state: &CounterState) {
    gauge!("headcount_occupancy", state.occupancy as f64);
    gauge!("headcount_daily_total", state.daily_total as f64);
}

pub fn record_hub_broadcast() {
    counter!("headcount_hub_messages_total", 1);
}

pub fn record_hub_pruned(count: usize) {
    counter!("headcount_hub_pruned_total", count as u64);
}

pub fn set_hub_subscribers(count: usize) {
    gauge!("headcount_hub_subscribers", count as f64);
}

pub fn record_publisher_dropped() {
    counter!("headcount_publisher_dropped_total", 1);
}

pub fn record_publisher_reconnect() {
    counter!("headcount_publisher_reconnects_total", 1);
}
