//! Test assertions for execution records.

use crate::core::Status;
use crate::execution::{NodeExecution, PlanExecution};

/// Asserts that the plan execution ended with `expected`.
pub fn assert_plan_status(plan: &PlanExecution, expected: Status) {
    assert_eq!(
        plan.status, expected,
        "Expected plan status {expected}, got {} (failures: {:?})",
        plan.status, plan.failures
    );
}

/// Returns the live executions of `identifier`, excluding replaced
/// attempts.
#[must_use]
pub fn live_executions<'a>(executions: &'a [NodeExecution], identifier: &str) -> Vec<&'a NodeExecution> {
    executions
        .iter()
        .filter(|execution| !execution.old_retry && execution.identifier == identifier)
        .collect()
}

/// Asserts that exactly one live execution of `identifier` exists and
/// that it ended with `expected`. Returns it.
pub fn assert_node_status<'a>(
    executions: &'a [NodeExecution],
    identifier: &str,
    expected: Status,
) -> &'a NodeExecution {
    let live = live_executions(executions, identifier);
    assert_eq!(
        live.len(),
        1,
        "Expected one live execution of '{identifier}', found {}",
        live.len()
    );
    assert_eq!(
        live[0].status, expected,
        "Expected '{identifier}' to be {expected}, got {}",
        live[0].status
    );
    live[0]
}

/// Asserts that no execution is left in a non-terminal status.
pub fn assert_all_terminal(executions: &[NodeExecution]) {
    let open: Vec<String> = executions
        .iter()
        .filter(|execution| !execution.status.is_terminal())
        .map(|execution| format!("{}={}", execution.identifier, execution.status))
        .collect();
    assert!(open.is_empty(), "Expected every node to have ended, still open: {open:?}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiance::Ambiance;
    use crate::core::StepType;
    use crate::execution::ExecutionKind;
    use chrono::Utc;

    fn execution(identifier: &str, status: Status, old_retry: bool) -> NodeExecution {
        NodeExecution {
            uuid: format!("{identifier}-{status}"),
            plan_execution_id: "e".to_string(),
            node_id: identifier.to_string(),
            identifier: identifier.to_string(),
            step_type: StepType::step("SHELL"),
            ambiance: Ambiance::new("p", "e"),
            status,
            mode: None,
            kind: ExecutionKind::Normal,
            parent_id: None,
            notify_id: None,
            previous_id: None,
            adviser_response: None,
            failure_info: None,
            retry_ids: Vec::new(),
            old_retry,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    #[test]
    fn test_assert_node_status_ignores_old_retries() {
        let executions = vec![
            execution("build", Status::Failed, true),
            execution("build", Status::Succeeded, false),
        ];
        let live = assert_node_status(&executions, "build", Status::Succeeded);
        assert!(!live.old_retry);
    }

    #[test]
    #[should_panic(expected = "still open")]
    fn test_assert_all_terminal_fails() {
        assert_all_terminal(&[execution("build", Status::Running, false)]);
    }

    #[test]
    fn test_assert_plan_status() {
        let mut plan = PlanExecution::new(Ambiance::new("p", "e"));
        plan.status = Status::Aborted;
        assert_plan_status(&plan, Status::Aborted);
    }
}
