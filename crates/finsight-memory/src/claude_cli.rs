use std::time::Duration;

use async_trait::async_trait;
use finsight_models::config::ClassifierConfig;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::completion::{CompletionRequest, Completer};
use crate::error::MemoryError;

/// Completer backed by the `claude` CLI in print mode.
///
/// The CLI has no sampling flags, so `max_tokens` and `temperature` are not
/// forwarded; the classifier prompt constrains the reply instead.
#[derive(Debug, Clone)]
pub struct ClaudeCliCompleter {
    pub program: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliCompleter {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ClaudeCliCompleter {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            program: config.claude_path.clone(),
            model: config.fallback_model.clone(),
            timeout: Duration::from_secs(config.fallback_timeout_seconds),
        }
    }
}

#[async_trait]
impl Completer for ClaudeCliCompleter {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, MemoryError> {
        debug!(model = %self.model, max_tokens = request.max_tokens, "Invoking claude CLI");

        let result = tokio::time::timeout(self.timeout, async {
            Command::new(&self.program)
                .args([
                    "-p",
                    &request.user_content,
                    "--system-prompt",
                    &request.system_prompt,
                    "--model",
                    &self.model,
                    "--output-format",
                    "text",
                ])
                .kill_on_drop(true)
                .output()
                .await
        })
        .await
        .map_err(|_| MemoryError::Timeout(self.timeout.as_secs()))?
        .map_err(|e| MemoryError::Completion(format!("Failed to spawn {}: {e}", self.program)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(status = %result.status, stderr = %stderr, "Claude CLI failed");
            return Err(MemoryError::Completion(format!(
                "{} exited {}: {}",
                self.program, result.status, stderr
            )));
        }

        let stdout = String::from_utf8_lossy(&result.stdout).to_string();
        if stdout.trim().is_empty() {
            return Err(MemoryError::Completion(
                "Claude returned empty response".to_string(),
            ));
        }

        Ok(stdout)
    }
}

/// Check if the CLI is available on the system.
pub async fn check_cli_available(program: &str) -> bool {
    match Command::new(program).arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}
