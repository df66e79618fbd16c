// Paw Taskmind — Orchestrator Tool Definitions
//
// Every task turn carries two orchestrator-owned tools next to the caller's:
//   task_complete(result)     → run ends `complete`
//   task_fatal_error(error)   → run ends `fatal_error`

use crate::atoms::constants::{TASK_COMPLETE_TOOL, TASK_FATAL_ERROR_TOOL};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::types::*;
use std::collections::HashSet;

pub fn task_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            TASK_COMPLETE_TOOL,
            "Call when the task is finished. Pass the final answer as `result`. The task stops immediately.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "result": {
                        "type": "string",
                        "description": "The final result of the task"
                    }
                },
                "required": ["result"]
            }),
        ),
        ToolDefinition::function(
            TASK_FATAL_ERROR_TOOL,
            "Call when the task cannot be completed. Explain why in `error`. The task stops immediately.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "error": {
                        "type": "string",
                        "description": "Why the task cannot be completed"
                    }
                },
                "required": ["error"]
            }),
        ),
    ]
}

pub fn is_orchestrator_tool(name: &str) -> bool {
    name == TASK_COMPLETE_TOOL || name == TASK_FATAL_ERROR_TOOL
}

/// Orchestrator tools first, then caller tools. Rejects empty, reserved or
/// duplicate caller tool names.
pub fn merge_tools(caller: &[ToolDefinition]) -> EngineResult<Vec<ToolDefinition>> {
    let mut seen: HashSet<&str> = HashSet::new();
    for tool in caller {
        let name = tool.name();
        if name.trim().is_empty() {
            return Err(EngineError::Validation("tool with an empty name".into()));
        }
        if is_orchestrator_tool(name) {
            return Err(EngineError::Validation(format!(
                "tool name '{}' is reserved by the orchestrator",
                name
            )));
        }
        if !seen.insert(name) {
            return Err(EngineError::Validation(format!("duplicate tool '{}'", name)));
        }
    }
    let mut merged = task_tools();
    merged.extend(caller.iter().cloned());
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition::function(name, "", json!({"type": "object"}))
    }

    #[test]
    fn merged_tools_lead_with_task_tools() {
        let merged = merge_tools(&[tool("search")]).unwrap();
        let names: Vec<_> = merged.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec![TASK_COMPLETE_TOOL, TASK_FATAL_ERROR_TOOL, "search"]);
    }

    #[test]
    fn reserved_name_rejected() {
        assert!(matches!(
            merge_tools(&[tool(TASK_COMPLETE_TOOL)]),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn duplicate_and_empty_rejected() {
        assert!(merge_tools(&[tool("a"), tool("a")]).is_err());
        assert!(merge_tools(&[tool(" ")]).is_err());
    }
}
