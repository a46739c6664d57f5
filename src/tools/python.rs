//! Python 代码执行工具
//!
//! 以 `<interpreter> -c <code>` 在 workspace_root 下运行，环境变量只保留 PATH；
//! 带超时（超时后子进程随 future 一起被 kill），输出按字符数截断，tracing 审计。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::config::PythonSection;
use crate::tools::registry::args_schema;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PythonArgs {
    /// Python code to run; print values to see them in the output
    pub command: String,
}

pub struct PythonReplTool {
    interpreter: String,
    workdir: PathBuf,
    timeout: Duration,
    max_output_chars: usize,
}

impl PythonReplTool {
    pub fn new(section: &PythonSection, workdir: impl AsRef<Path>) -> Self {
        Self {
            interpreter: section.interpreter.clone(),
            workdir: workdir.as_ref().to_path_buf(),
            timeout: Duration::from_secs(section.timeout_secs),
            max_output_chars: section.max_output_chars,
        }
    }

    fn truncate(&self, text: &str) -> String {
        if text.chars().count() > self.max_output_chars {
            let head: String = text.chars().take(self.max_output_chars).collect();
            format!("{}\n...[output truncated]", head)
        } else {
            text.to_string()
        }
    }
}

#[async_trait]
impl Tool for PythonReplTool {
    fn name(&self) -> &str {
        "python_repl"
    }

    fn description(&self) -> &str {
        "A Python shell. Use this to execute python commands. Input should be a valid python command. If you want to see the output of a value, you should print it out with `print(...)`."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<PythonArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: PythonArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let code = args.command.trim();
        if code.is_empty() {
            return Err("Empty command".to_string());
        }

        tracing::info!(chars = code.len(), workdir = %self.workdir.display(), "python_repl tool execute");
        tokio::fs::create_dir_all(&self.workdir)
            .await
            .map_err(|e| format!("Create working directory failed: {}", e))?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(["-c", code])
            .current_dir(&self.workdir)
            .env_clear()
            .kill_on_drop(true);
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| format!("Python execution timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(self.truncate(&format!(
                "Exit {:?}\n{}",
                output.status.code(),
                stderr.trim()
            )));
        }
        let text = if stderr.trim().is_empty() {
            stdout.trim_end().to_string()
        } else {
            format!("{}\nstderr: {}", stdout.trim_end(), stderr.trim())
        };
        Ok(self.truncate(&text))
    }
}
