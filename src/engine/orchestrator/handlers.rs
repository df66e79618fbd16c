// Paw Taskmind — Orchestrator Tool Decisions
//
// `decide_tool_call` is pure: given a call and what the turn has seen so far
// it returns a `ToolDecision`. The turn loop applies side effects (history,
// status) at the call site.

use crate::atoms::constants::{TASK_COMPLETE_TOOL, TASK_FATAL_ERROR_TOOL};
use crate::engine::types::*;
use std::collections::{HashMap, HashSet};

/// Decide what happens to one tool call.
///
/// * after a halt                      → `Skip`
/// * call id already resolved          → `Replace` with the recorded output
/// * `task_complete` / `task_fatal_error` with a string argument → `Halt`,
///   otherwise `Retry`
/// * known caller tool                 → `Execute`; unknown → `Skip`
pub fn decide_tool_call(
    call: &ToolCall,
    known_tools: &HashSet<String>,
    resolved: &HashMap<String, String>,
    halted: bool,
) -> ToolDecision {
    if halted {
        return ToolDecision::Skip {
            reason: "the task has already stopped".into(),
        };
    }
    if let Some(output) = resolved.get(&call.id) {
        return ToolDecision::Replace {
            output: output.clone(),
        };
    }
    match call.name.as_str() {
        TASK_COMPLETE_TOOL => match string_arg(call, "result") {
            Some(result) => ToolDecision::Halt(HaltOutcome::Complete { result }),
            None => ToolDecision::Retry {
                reason: format!("{} needs a string 'result'", TASK_COMPLETE_TOOL),
            },
        },
        TASK_FATAL_ERROR_TOOL => match string_arg(call, "error") {
            Some(error) => ToolDecision::Halt(HaltOutcome::Fatal { error }),
            None => ToolDecision::Retry {
                reason: format!("{} needs a string 'error'", TASK_FATAL_ERROR_TOOL),
            },
        },
        name if known_tools.contains(name) => ToolDecision::Execute,
        name => ToolDecision::Skip {
            reason: format!("unknown tool '{}'", name),
        },
    }
}

fn string_arg(call: &ToolCall, key: &str) -> Option<String> {
    call.arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known() -> HashSet<String> {
        ["search".to_string()].into_iter().collect()
    }

    #[test]
    fn complete_with_string_halts() {
        let call = ToolCall::new(TASK_COMPLETE_TOOL, json!({"result": "done"}));
        assert_eq!(
            decide_tool_call(&call, &known(), &HashMap::new(), false),
            ToolDecision::Halt(HaltOutcome::Complete {
                result: "done".into()
            })
        );
    }

    #[test]
    fn complete_without_string_retries() {
        let call = ToolCall::new(TASK_COMPLETE_TOOL, json!({"result": 42}));
        assert!(matches!(
            decide_tool_call(&call, &known(), &HashMap::new(), false),
            ToolDecision::Retry { .. }
        ));
        let call = ToolCall::new(TASK_FATAL_ERROR_TOOL, json!({}));
        assert!(matches!(
            decide_tool_call(&call, &known(), &HashMap::new(), false),
            ToolDecision::Retry { .. }
        ));
    }

    #[test]
    fn anything_after_halt_is_skipped() {
        let call = ToolCall::new(TASK_FATAL_ERROR_TOOL, json!({"error": "x"}));
        assert!(matches!(
            decide_tool_call(&call, &known(), &HashMap::new(), true),
            ToolDecision::Skip { .. }
        ));
    }

    #[test]
    fn repeated_call_id_is_replaced() {
        let call = ToolCall::new("search", json!({"q": "rust"}));
        let mut resolved = HashMap::new();
        resolved.insert(call.id.clone(), "3 hits".to_string());
        assert_eq!(
            decide_tool_call(&call, &known(), &resolved, false),
            ToolDecision::Replace {
                output: "3 hits".into()
            }
        );
    }

    #[test]
    fn known_executes_unknown_skips() {
        let search = ToolCall::new("search", json!({}));
        let shell = ToolCall::new("shell", json!({}));
        assert_eq!(
            decide_tool_call(&search, &known(), &HashMap::new(), false),
            ToolDecision::Execute
        );
        assert!(matches!(
            decide_tool_call(&shell, &known(), &HashMap::new(), false),
            ToolDecision::Skip { .. }
        ));
    }
}
