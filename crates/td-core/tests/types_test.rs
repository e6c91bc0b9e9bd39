use td_core::types::{ModelRef, Task, TaskPhase, TransitionActor};

#[test]
fn new_task_starts_in_backlog() {
    let t = Task::new("ws-1", "add dark mode", 3, ModelRef::new("acme", "x1"));
    assert_eq!(t.phase, TaskPhase::Backlog);
    assert_eq!(t.order, 3);
    assert!(t.history.is_empty());
    assert!(!t.is_blocked());
}

#[test]
fn record_transition_appends_history() {
    let mut t = Task::new("ws-1", "task", 0, ModelRef::new("acme", "x1"));
    t.record_transition(TaskPhase::Ready, TransitionActor::User, None);
    t.record_transition(
        TaskPhase::Executing,
        TransitionActor::System,
        Some("auto-dispatch".into()),
    );

    assert_eq!(t.phase, TaskPhase::Executing);
    assert_eq!(t.history.len(), 2);
    assert_eq!(t.history[0].from, TaskPhase::Backlog);
    assert_eq!(t.history[0].to, TaskPhase::Ready);
    assert_eq!(t.history[1].actor, TransitionActor::System);
    assert_eq!(t.history[1].reason.as_deref(), Some("auto-dispatch"));
}

#[test]
fn block_and_unblock() {
    let mut t = Task::new("ws-1", "task", 0, ModelRef::new("acme", "x1"));
    t.block("waiting on design");
    assert!(t.is_blocked());
    assert_eq!(t.blocked.as_ref().unwrap().reason, "waiting on design");
    t.unblock();
    assert!(!t.is_blocked());
}

#[test]
fn phase_serializes_snake_case() {
    let json = serde_json::to_string(&TaskPhase::Executing).unwrap();
    assert_eq!(json, "\"executing\"");
    let back: TaskPhase = serde_json::from_str("\"backlog\"").unwrap();
    assert_eq!(back, TaskPhase::Backlog);
}

#[test]
fn transition_matrix_matches_lifecycle() {
    use TaskPhase::*;
    let legal = [
        (Backlog, Ready),
        (Ready, Executing),
        (Executing, Complete),
        (Complete, Archived),
        (Complete, Ready),
        (Ready, Backlog),
        (Executing, Ready),
    ];
    for &from in TaskPhase::forward_order() {
        for &to in TaskPhase::forward_order() {
            let expected = legal.contains(&(from, to));
            assert_eq!(
                from.can_transition_to(&to),
                expected,
                "edge {from} -> {to}"
            );
        }
    }
}

#[test]
fn model_ref_display() {
    assert_eq!(ModelRef::new("acme", "x1").to_string(), "acme/x1");
}
