/*!
 * Change-notification loop
 *
 * A blocking long-poll protocol over the session's update feed. One
 * primitive drives both live property watching and waiting on asynchronous
 * operations: register a change filter, request incremental updates with
 * the server's version cursor, hand each change record to a callback, and
 * stop when the callback signals completion.
 */

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, trace};

use crate::error::Result;
use crate::session::{FilterGuard, Session};
use crate::types::{
    ChangeRecord, CompletionReport, ObjectRef, PropValue, TaskOutcome, TaskState,
};

/// Where the loop currently is. `Waiting` covers the blocked long-poll
/// request; `Done` is reached only when the callback signals completion or
/// an unrecoverable fault surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Waiting,
    Done,
}

/// Watch a set of objects/paths until the callback signals completion.
///
/// Change records are delivered in server order, one batch per long-poll
/// round trip; the version cursor guarantees no batch is requested before
/// the previous one is fully consumed. The callback ends the wait by
/// returning `Some(value)`, which becomes the loop's return value.
///
/// A panicking callback is caught, logged, and permanently disabled; the
/// loop keeps draining the update stream so that session-side bookkeeping
/// stays consistent. There is no built-in timeout: callers needing one
/// wrap this in an external deadline mechanism.
///
/// The change filter registered for this wait is released on every exit
/// path.
pub fn monitor<S, F, T>(
    session: &S,
    objects: &[ObjectRef],
    paths: &[String],
    mut callback: F,
) -> Result<T>
where
    S: Session + ?Sized,
    F: FnMut(&ChangeRecord) -> Option<T>,
{
    let mut state = LoopState::Idle;
    trace!(?state, objects = objects.len(), "registering change filter");
    let filter = session.create_change_filter(objects, paths)?;
    let _guard = FilterGuard::new(session, filter);

    let mut cursor: Option<String> = None;
    let mut callback_enabled = true;

    loop {
        state = LoopState::Waiting;
        trace!(?state, cursor = cursor.as_deref(), "requesting updates");
        let batch = session.wait_for_updates(cursor.as_deref())?;

        for change in &batch.changes {
            if !callback_enabled {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(change)));
            match outcome {
                Ok(Some(value)) => {
                    state = LoopState::Done;
                    debug!(?state, "callback signalled completion");
                    return Ok(value);
                }
                Ok(None) => {}
                Err(_) => {
                    error!(
                        obj = %change.obj,
                        property = %change.name,
                        "monitor callback panicked; disabling it for the rest of this wait"
                    );
                    callback_enabled = false;
                }
            }
        }
        cursor = Some(batch.version);
    }
}

/// Block until every listed operation reaches a terminal state.
///
/// Tracks a working set of unfinished operations; a success removes the
/// operation, a failure removes it and marks the overall report failed.
/// Outcomes are returned in the order the server reported completion.
pub fn wait_for_completion<S: Session + ?Sized>(
    session: &S,
    tasks: &[ObjectRef],
) -> Result<CompletionReport> {
    wait_for_completion_with(session, tasks, |_| {})
}

/// `wait_for_completion` with a progress callback invoked once per
/// finished operation. A panicking callback is disabled, not fatal: the
/// pending-set bookkeeping happens outside it and stays correct.
pub fn wait_for_completion_with<S, F>(
    session: &S,
    tasks: &[ObjectRef],
    mut on_outcome: F,
) -> Result<CompletionReport>
where
    S: Session + ?Sized,
    F: FnMut(&TaskOutcome),
{
    if tasks.is_empty() {
        return Ok(CompletionReport::default());
    }

    // One batched fetch for entity names up front; the update stream only
    // carries state transitions
    let name_rows = session.fetch_object_properties(tasks, &["info.entityName".to_string()])?;
    let entity_names: HashMap<ObjectRef, String> = name_rows
        .into_iter()
        .filter_map(|row| {
            let name = row.prop("info.entityName")?.as_str()?.to_string();
            Some((row.obj, name))
        })
        .collect();

    let mut pending: HashSet<ObjectRef> = tasks.iter().cloned().collect();
    let mut outcomes: Vec<TaskOutcome> = Vec::new();
    let mut reporter_enabled = true;

    let paths = vec!["info".to_string(), "info.state".to_string()];
    monitor(session, tasks, &paths, |change| {
        let (state, message) = match parse_task_change(change) {
            Some(parsed) => parsed,
            None => return None,
        };
        if !state.is_terminal() || !pending.remove(&change.obj) {
            return None;
        }

        let message = match (state, message) {
            // The state-only change shape carries no message; fetch it
            (TaskState::Error, None) => fetch_error_message(session, &change.obj),
            (_, message) => message,
        };

        let outcome = TaskOutcome {
            task: change.obj.clone(),
            entity: entity_names.get(&change.obj).cloned(),
            state,
            message,
            completed_at: Utc::now(),
        };
        if reporter_enabled {
            let report = catch_unwind(AssertUnwindSafe(|| on_outcome(&outcome)));
            if report.is_err() {
                error!(task = %outcome.task, "completion callback panicked; disabling it");
                reporter_enabled = false;
            }
        }
        outcomes.push(outcome);

        if pending.is_empty() {
            Some(())
        } else {
            None
        }
    })?;

    Ok(CompletionReport { outcomes })
}

/// Extract a task state (and failure message, when present) from a change
/// record. The server reports either a whole `info` structure or a bare
/// `info.state` leaf depending on what else changed.
fn parse_task_change(change: &ChangeRecord) -> Option<(TaskState, Option<String>)> {
    let value = change.value.as_ref()?;
    match change.name.as_str() {
        "info" => {
            let info = value.as_map()?;
            let state = TaskState::parse(info.get("state")?.as_str()?)?;
            let message = info
                .get("error")
                .and_then(PropValue::as_map)
                .and_then(|e| e.get("msg"))
                .and_then(PropValue::as_str)
                .map(str::to_string);
            Some((state, message))
        }
        "info.state" => {
            let state = TaskState::parse(value.as_str()?)?;
            Some((state, None))
        }
        _ => None,
    }
}

fn fetch_error_message<S: Session + ?Sized>(session: &S, task: &ObjectRef) -> Option<String> {
    let rows = session
        .fetch_object_properties(std::slice::from_ref(task), &["info.error.msg".to_string()])
        .ok()?;
    rows.first()?
        .prop("info.error.msg")?
        .as_str()
        .map(str::to_string)
}

impl CompletionReport {
    /// Convert the report into an error when any operation failed,
    /// carrying the first failure's entity and server message.
    pub fn into_result(self) -> Result<CompletionReport> {
        if let Some(failure) = self.failures().next() {
            return Err(crate::error::PeriscopeError::OperationFailed {
                entity: failure
                    .entity
                    .clone()
                    .unwrap_or_else(|| failure.task.to_string()),
                message: failure
                    .message
                    .clone()
                    .unwrap_or_else(|| "no error message reported".to_string()),
            });
        }
        Ok(self)
    }
}
