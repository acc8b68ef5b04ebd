//! Tests for utility functions

use std::time::Duration;

use prometheus_task_scheduler::util::{duration_to_ms, init_tracing, Clock, ManualClock, Priority, SystemClock, TaskId};

#[test]
fn test_priority_ordering() {
    assert!(Priority::High > Priority::Medium);
    assert!(Priority::Medium > Priority::Low);
    assert_eq!(Priority::default(), Priority::Medium);
}

#[test]
fn test_priority_ordinal_round_trip() {
    for priority in [Priority::Low, Priority::Medium, Priority::High] {
        assert_eq!(Priority::from_ordinal(priority.ordinal()), priority);
    }
    assert_eq!(Priority::from_ordinal(200), Priority::Medium);
}

#[test]
fn test_priority_serde_names() {
    assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
    let low: Priority = serde_json::from_str("\"low\"").unwrap();
    assert_eq!(low, Priority::Low);
}

#[test]
fn test_task_id_display_and_parse() {
    let id = TaskId::new();
    let parsed: TaskId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
    assert_eq!(parsed.as_uuid(), id.as_uuid());
    assert!("not-a-uuid".parse::<TaskId>().is_err());
}

#[test]
fn test_task_id_serializes_as_plain_string() {
    let id = TaskId::new();
    assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{id}\""));
}

#[test]
fn test_task_ids_are_unique() {
    let ids: std::collections::HashSet<TaskId> = (0..1_000).map(|_| TaskId::new()).collect();
    assert_eq!(ids.len(), 1_000);
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(10);
    clock.advance(5);
    assert_eq!(clock.now_ms(), 15);
    clock.set(3);
    assert_eq!(clock.now_ms(), 3);
}

#[test]
fn test_system_clock_moves_forward() {
    let first = SystemClock.now_ms();
    let second = SystemClock.now_ms();
    assert!(second >= first);
}

#[test]
fn test_duration_to_ms_saturates() {
    assert_eq!(duration_to_ms(Duration::from_millis(1_500)), 1_500);
    assert_eq!(duration_to_ms(Duration::MAX), u64::MAX);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}
