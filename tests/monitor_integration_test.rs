/*!
 * Integration tests for the change-notification loop and completion waits
 */

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::FakeSession;
use periscope::{
    monitor, wait_for_completion, wait_for_completion_with, ChangeRecord, ObjectRef, PropValue,
    TaskState, UpdateBatch,
};

fn task(id: &str) -> ObjectRef {
    ObjectRef::new("Task", id)
}

fn state_change(id: &str, state: &str) -> ChangeRecord {
    ChangeRecord::assign(task(id), "info.state", state)
}

fn info_change(id: &str, state: &str, msg: Option<&str>) -> ChangeRecord {
    let mut info = BTreeMap::new();
    info.insert("state".to_string(), PropValue::from(state));
    if let Some(msg) = msg {
        let mut err = BTreeMap::new();
        err.insert("msg".to_string(), PropValue::from(msg));
        info.insert("error".to_string(), PropValue::Map(err));
    }
    ChangeRecord::assign(task(id), "info", PropValue::Map(info))
}

fn session_with_tasks() -> FakeSession {
    let session = FakeSession::new();
    session.add_object(
        task("t-1"),
        vec![("info.entityName", PropValue::from("vm1"))],
    );
    session.add_object(
        task("t-2"),
        vec![
            ("info.entityName", PropValue::from("vm2")),
            ("info.error.msg", PropValue::from("insufficient disk space")),
        ],
    );
    session
}

#[test]
fn completion_wait_tracks_success_and_failure_in_order() {
    let session = session_with_tasks();
    session.script_batch(UpdateBatch {
        version: "1".to_string(),
        changes: vec![state_change("t-1", "success")],
    });
    session.script_batch(UpdateBatch {
        version: "2".to_string(),
        changes: vec![info_change("t-2", "error", Some("insufficient disk space"))],
    });

    let report = wait_for_completion(&session, &[task("t-1"), task("t-2")]).unwrap();

    assert!(!report.all_succeeded());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].task, task("t-1"));
    assert_eq!(report.outcomes[0].state, TaskState::Success);
    assert_eq!(report.outcomes[0].entity.as_deref(), Some("vm1"));
    assert_eq!(report.outcomes[1].task, task("t-2"));
    assert_eq!(report.outcomes[1].state, TaskState::Error);
    assert_eq!(
        report.outcomes[1].message.as_deref(),
        Some("insufficient disk space")
    );

    // Both long-poll rounds were consumed and the filter was released
    assert_eq!(session.wait_calls(), 2);
    assert_eq!(session.filter_destroys(), 1);
    assert_eq!(session.live_filters(), 0);

    let err = report.into_result().unwrap_err();
    assert!(err.to_string().contains("vm2"));
}

#[test]
fn failure_message_is_fetched_when_the_change_carries_none() {
    let session = session_with_tasks();
    session.script_batch(UpdateBatch {
        version: "1".to_string(),
        changes: vec![state_change("t-2", "error")],
    });

    let report = wait_for_completion(&session, &[task("t-2")]).unwrap();
    assert_eq!(
        report.outcomes[0].message.as_deref(),
        Some("insufficient disk space")
    );
}

#[test]
fn nonterminal_states_do_not_finish_a_task() {
    let session = session_with_tasks();
    session.script_batch(UpdateBatch {
        version: "1".to_string(),
        changes: vec![
            state_change("t-1", "running"),
            state_change("t-1", "success"),
        ],
    });

    let report = wait_for_completion(&session, &[task("t-1")]).unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.all_succeeded());
}

#[test]
fn empty_task_list_returns_without_any_round_trip() {
    let session = FakeSession::new();
    let report = wait_for_completion(&session, &[]).unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(session.wait_calls(), 0);
    assert_eq!(session.fetch_count(), 0);
}

#[test]
fn panicking_progress_callback_does_not_corrupt_bookkeeping() {
    let session = session_with_tasks();
    session.script_batch(UpdateBatch {
        version: "1".to_string(),
        changes: vec![state_change("t-1", "success")],
    });
    session.script_batch(UpdateBatch {
        version: "2".to_string(),
        changes: vec![info_change("t-2", "error", Some("boom"))],
    });

    let calls = AtomicUsize::new(0);
    let report = wait_for_completion_with(&session, &[task("t-1"), task("t-2")], |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        panic!("caller bug");
    })
    .unwrap();

    // The callback fired once, panicked, and was disabled; the wait still
    // drained both tasks and released the filter
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.outcomes.len(), 2);
    assert!(!report.all_succeeded());
    assert_eq!(session.live_filters(), 0);
}

#[test]
fn monitor_returns_the_callback_value_and_delivers_in_order() {
    let session = FakeSession::new();
    let vm = ObjectRef::new("VirtualMachine", "vm-1");
    session.script_batch(UpdateBatch {
        version: "1".to_string(),
        changes: vec![
            ChangeRecord::assign(vm.clone(), "runtime.powerState", "poweredOn"),
            ChangeRecord::assign(vm.clone(), "runtime.powerState", "suspended"),
        ],
    });
    session.script_batch(UpdateBatch {
        version: "2".to_string(),
        changes: vec![ChangeRecord::assign(
            vm.clone(),
            "runtime.powerState",
            "poweredOff",
        )],
    });

    let mut seen = Vec::new();
    let paths = vec!["runtime.powerState".to_string()];
    let final_state = monitor(&session, &[vm], &paths, |change| {
        let state = change.value.as_ref()?.as_str()?.to_string();
        seen.push(state.clone());
        (state == "poweredOff").then_some(state)
    })
    .unwrap();

    assert_eq!(final_state, "poweredOff");
    assert_eq!(seen, vec!["poweredOn", "suspended", "poweredOff"]);
    assert_eq!(session.wait_calls(), 2);
    assert_eq!(session.live_filters(), 0);
}

#[test]
fn monitor_releases_the_filter_when_the_server_faults() {
    let session = FakeSession::new();
    let vm = ObjectRef::new("VirtualMachine", "vm-1");
    // No scripted batches: the first long poll faults

    let paths = vec!["runtime.powerState".to_string()];
    let result: periscope::Result<()> = monitor(&session, &[vm], &paths, |_| None);
    assert!(result.is_err());
    assert_eq!(session.live_filters(), 0);
    assert_eq!(session.filter_destroys(), 1);
}
