//! Tests for telemetry sinks and event helpers

use prometheus_task_scheduler::core::telemetry::emit;
use prometheus_task_scheduler::core::{
    build_telemetry_event, InMemoryTelemetrySink, NoopTelemetrySink, TelemetryEvent,
    TelemetryEventKind, TelemetrySink, TracingTelemetrySink,
};
use prometheus_task_scheduler::util::TaskId;

#[test]
fn test_build_telemetry_event() {
    let id = TaskId::new();
    let event = build_telemetry_event(
        TelemetryEventKind::RetryScheduled,
        Some(id),
        Some(2),
        1_700_000_000_000,
        Some("retry 2/3".into()),
    );
    assert_eq!(event.kind, TelemetryEventKind::RetryScheduled);
    assert_eq!(event.task_id, Some(id));
    assert_eq!(event.attempt, Some(2));
    assert_eq!(event.created_at_ms, 1_700_000_000_000);
    assert_eq!(event.detail.as_deref(), Some("retry 2/3"));
}

#[test]
fn test_event_kind_display_matches_serde() {
    let kinds = [
        TelemetryEventKind::Scheduled,
        TelemetryEventKind::Started,
        TelemetryEventKind::Succeeded,
        TelemetryEventKind::Failed,
        TelemetryEventKind::RetryScheduled,
        TelemetryEventKind::Cancelled,
        TelemetryEventKind::Rescheduled,
        TelemetryEventKind::OrphanRearmed,
        TelemetryEventKind::WatchdogTickFailed,
    ];
    for kind in kinds {
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{kind}\""));
    }
}

#[test]
fn test_in_memory_sink_filters_by_kind() {
    let sink = InMemoryTelemetrySink::new(10);
    for kind in [
        TelemetryEventKind::Started,
        TelemetryEventKind::Failed,
        TelemetryEventKind::Started,
    ] {
        sink.record(build_telemetry_event(kind, None, None, 0, None));
    }
    assert_eq!(sink.events().len(), 3);
    assert_eq!(sink.events_of(TelemetryEventKind::Started).len(), 2);
    assert!(sink.events_of(TelemetryEventKind::Cancelled).is_empty());
}

#[test]
fn test_in_memory_sink_drops_oldest() {
    let sink = InMemoryTelemetrySink::new(2);
    for at in 0..5 {
        sink.record(build_telemetry_event(TelemetryEventKind::Scheduled, None, None, at, None));
    }
    let stamps: Vec<u64> = sink.events().iter().map(|e| e.created_at_ms).collect();
    assert_eq!(stamps, vec![3, 4]);

    let disabled = InMemoryTelemetrySink::new(0);
    disabled.record(build_telemetry_event(TelemetryEventKind::Scheduled, None, None, 0, None));
    assert!(disabled.events().is_empty());
}

#[test]
fn test_noop_and_tracing_sinks_accept_events() {
    let event = build_telemetry_event(TelemetryEventKind::Cancelled, Some(TaskId::new()), None, 1, None);
    NoopTelemetrySink.record(event.clone());
    TracingTelemetrySink.record(event);
}

struct Panicking;

impl TelemetrySink for Panicking {
    fn record(&self, _event: TelemetryEvent) {
        panic!("sink exploded");
    }
}

#[test]
fn test_emit_contains_sink_panics() {
    emit(
        &Panicking,
        build_telemetry_event(TelemetryEventKind::Failed, None, None, 0, None),
    );
}

#[test]
fn test_event_serde_round_trip() {
    let event = build_telemetry_event(
        TelemetryEventKind::OrphanRearmed,
        Some(TaskId::new()),
        None,
        42,
        None,
    );
    let json = serde_json::to_string(&event).unwrap();
    let back: TelemetryEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}
