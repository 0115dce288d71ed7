//! `bash` tool (§ Glossary tool group `runtime`): runs a shell command in the
//! call's workspace and returns combined stdout/stderr, truncated to a fixed
//! character budget so a runaway command can't blow the context window.

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError};
use crate::tools::Tool;

pub const TOOL_BASH: &str = "bash";

/// Output beyond this many characters is truncated with a marker, matching
/// the bootstrap engine's own truncate-under-budget convention (§4.I).
const MAX_OUTPUT_CHARS: usize = 20_000;

/// Default wall-clock timeout for a single command.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct BashTool;

impl BashTool {
    pub fn new() -> Self {
        Self
    }

    fn truncate(output: String) -> String {
        if output.len() <= MAX_OUTPUT_CHARS {
            return output;
        }
        let mut truncated: String = output.chars().take(MAX_OUTPUT_CHARS).collect();
        truncated.push_str("\n[...output truncated...]");
        truncated
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        TOOL_BASH
    }

    fn spec(&self) -> crate::tool_source::ToolSpec {
        crate::tool_source::ToolSpec {
            name: TOOL_BASH.to_string(),
            description: Some("Run a shell command and return its combined stdout/stderr.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "timeout_secs": { "type": "integer" }
                },
                "required": ["command"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing 'command'".to_string()))?;
        let timeout_secs =
            args.get("timeout_secs").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        if let Some(ctx) = ctx {
            if let Some(workspace) = &ctx.workspace {
                cmd.current_dir(workspace.as_path());
            }
        }

        let output = tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| ToolSourceError::Transport(format!("command timed out after {timeout_secs}s")))?
            .map_err(|e| ToolSourceError::Transport(format!("spawn failed: {e}")))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = Self::truncate(combined);

        if output.status.success() {
            Ok(ToolCallContent::text(combined))
        } else {
            let code = output.status.code().unwrap_or(-1);
            Ok(ToolCallContent::error(format!("exit code {code}\n{combined}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let tool = BashTool::new();
        let result = tool.call(json!({"command": "echo hi"}), None).await.unwrap();
        assert!(result.for_llm.contains("hi"));
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn nonzero_exit_sets_is_error() {
        let tool = BashTool::new();
        let result = tool.call(json!({"command": "exit 3"}), None).await.unwrap();
        assert!(result.is_error);
        assert!(result.for_llm.contains("exit code 3"));
    }

    #[test]
    fn truncate_leaves_short_output_untouched() {
        assert_eq!(BashTool::truncate("short".to_string()), "short");
    }

    #[test]
    fn truncate_caps_long_output() {
        let long = "x".repeat(MAX_OUTPUT_CHARS + 500);
        let truncated = BashTool::truncate(long);
        assert!(truncated.len() < MAX_OUTPUT_CHARS + 500);
        assert!(truncated.ends_with("[...output truncated...]"));
    }
}
