//! Process-backed capabilities.
//!
//! `CommandAgent` speaks a small JSON protocol with an external agent command:
//! - the request `{"sub_phase": ..., "context": ...}` is written to stdin
//! - the outermost JSON object on stdout is the `AgentResponse`
//! - non-zero exit without a JSON reply is a failure
//!
//! `CommandTestRunner` runs the configured test command through `sh -c`.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{AgentInvoker, AgentResponse, TestRun, TestRunner};
use crate::errors::CapabilityError;
use crate::util::extract_json_object;

/// Lines of test output kept for reports.
const OUTPUT_TAIL_LINES: usize = 40;

pub struct CommandAgent {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout_secs: u64,
}

impl CommandAgent {
    pub fn new(command: &str, args: Vec<String>, working_dir: &Path, timeout_secs: u64) -> Self {
        Self {
            command: command.to_string(),
            args,
            working_dir: working_dir.to_path_buf(),
            timeout_secs,
        }
    }

    fn parse_response(&self, output: &std::process::Output) -> Result<AgentResponse, CapabilityError> {
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);

        if let Some(json) = extract_json_object(&stdout)
            && let Ok(response) = serde_json::from_str::<AgentResponse>(&json)
        {
            return Ok(response);
        }

        if exit_code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                warn!(command = %self.command, stderr = %stderr.trim(), "Agent command failed");
            }
            return Err(CapabilityError::NonZeroExit {
                command: self.command.clone(),
                exit_code,
            });
        }

        Err(CapabilityError::MalformedResponse {
            command: self.command.clone(),
        })
    }
}

#[async_trait]
impl AgentInvoker for CommandAgent {
    fn is_available(&self, _sub_phase: &str) -> bool {
        true
    }

    async fn invoke(&self, sub_phase: &str, slice: &Value) -> Result<AgentResponse, CapabilityError> {
        let request = json!({ "sub_phase": sub_phase, "context": slice }).to_string();
        debug!(command = %self.command, sub_phase, "Invoking agent");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("STORYLINE_SUB_PHASE", sub_phase)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CapabilityError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;

        // Feed stdin while draining stdout; an agent that talks before it
        // reads would otherwise fill its pipe and never see EOF.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A broken pipe here just means the agent ignored its input.
                if let Err(e) = stdin.write_all(request.as_bytes()).await {
                    debug!(error = %e, "Agent closed stdin early");
                }
            }
        };
        let exchange = async {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = match timeout(Duration::from_secs(self.timeout_secs), exchange).await {
            Ok(result) => result.map_err(|source| CapabilityError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?,
            Err(_) => {
                return Err(CapabilityError::TimedOut {
                    command: self.command.clone(),
                    secs: self.timeout_secs,
                });
            }
        };

        self.parse_response(&output)
    }
}

pub struct CommandTestRunner {
    command: String,
    timeout_secs: u64,
}

impl CommandTestRunner {
    pub fn new(command: &str, timeout_secs: u64) -> Self {
        Self {
            command: command.to_string(),
            timeout_secs,
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, project_dir: &Path) -> Result<TestRun, CapabilityError> {
        debug!(command = %self.command, "Running test suite");
        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CapabilityError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;

        let output = timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| CapabilityError::TimedOut {
                command: self.command.clone(),
                secs: self.timeout_secs,
            })?
            .map_err(|source| CapabilityError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(TestRun {
            passed: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            output_tail: tail(&combined, OUTPUT_TAIL_LINES),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh_agent(dir: &Path, script: &str) -> CommandAgent {
        CommandAgent::new("sh", vec!["-c".into(), script.into()], dir, 10)
    }

    #[tokio::test]
    async fn test_command_agent_parses_json_reply() {
        let dir = tempdir().unwrap();
        let agent = sh_agent(
            dir.path(),
            r#"cat > /dev/null; echo 'thinking...'; echo '{"success": true, "complexity": "SIMPLE"}'"#,
        );
        let response = agent.invoke("assess-complexity", &json!({})).await.unwrap();
        assert!(response.success);
        assert_eq!(response.fields["complexity"], "SIMPLE");
    }

    #[tokio::test]
    async fn test_command_agent_receives_sub_phase_on_stdin() {
        let dir = tempdir().unwrap();
        let agent = sh_agent(
            dir.path(),
            r#"grep -q '"sub_phase":"critique"' && echo '{"success": true}' || echo '{"success": false}'"#,
        );
        assert!(agent.invoke("critique", &json!({})).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_command_agent_large_request_with_chatty_agent() {
        let dir = tempdir().unwrap();
        // Fills the stdout pipe before reading any input.
        let agent = sh_agent(
            dir.path(),
            r#"head -c 200000 /dev/zero | tr '\0' 'a'; echo; cat > /dev/null; echo '{"success": true}'"#,
        );
        let slice = json!({ "spec": "x".repeat(1 << 20) });
        assert!(agent.invoke("write-spec", &slice).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_command_agent_times_out_when_input_is_never_read() {
        let dir = tempdir().unwrap();
        let agent = CommandAgent::new("sh", vec!["-c".into(), "sleep 5".into()], dir.path(), 1);
        let slice = json!({ "spec": "x".repeat(1 << 20) });
        let started = std::time::Instant::now();
        let err = agent.invoke("write-spec", &slice).await.unwrap_err();
        assert!(matches!(err, CapabilityError::TimedOut { secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_command_agent_non_zero_exit() {
        let dir = tempdir().unwrap();
        let agent = sh_agent(dir.path(), "cat > /dev/null; exit 3");
        let err = agent.invoke("write-spec", &json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::NonZeroExit { exit_code: 3, .. }));
    }

    #[tokio::test]
    async fn test_command_agent_spawn_failure() {
        let dir = tempdir().unwrap();
        let agent = CommandAgent::new("/nonexistent/agent-binary", vec![], dir.path(), 5);
        let err = agent.invoke("write-spec", &json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_command_test_runner_reports_failure() {
        let dir = tempdir().unwrap();
        let runner = CommandTestRunner::new("echo 'test a ... FAILED'; exit 1", 10);
        let run = runner.run(dir.path()).await.unwrap();
        assert!(!run.passed);
        assert_eq!(run.exit_code, 1);
        assert!(run.output_tail.contains("FAILED"));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }
}
