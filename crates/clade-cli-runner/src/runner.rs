// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, warn};

use clade_capability::{build_args, probe, CliOptions};

use crate::truncate::head_tail_truncate;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("incompatible external CLI: {0}")]
    Incompatible(#[from] clade_capability::CapabilityError),
    #[error("spawning external CLI failed: {0}")]
    Spawn(String),
    #[error("external CLI exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("external CLI produced a malformed event stream: {0}")]
    Parse(String),
    #[error("external CLI timed out: {0}")]
    Timeout(String),
}

/// Input to one CLI invocation (§4.3).
#[derive(Debug, Clone, Default)]
pub struct CliRunInput {
    pub prompt: String,
    pub resume_session_id: Option<String>,
    pub system_prompt_inline: Option<String>,
    pub system_prompt_file: Option<String>,
    pub tool_manifest_path: Option<String>,
    pub allowed_tools: Vec<String>,
    pub max_turns: Option<u32>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliRunOutput {
    pub text: String,
    pub session_id: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CliRunnerConfig {
    pub cli_path: String,
    /// Maximum gap between successive stdout events before the child is
    /// considered stuck (§4.3, §5).
    pub idle_timeout: Duration,
    /// Hard ceiling on total wall time, independent of activity.
    pub hard_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on an error path.
    pub term_grace: Duration,
}

impl Default for CliRunnerConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            idle_timeout: Duration::from_secs(120),
            hard_timeout: Duration::from_secs(1800),
            term_grace: Duration::from_secs(5),
        }
    }
}

pub struct CliRunner {
    config: CliRunnerConfig,
}

impl CliRunner {
    pub fn new(config: CliRunnerConfig) -> Self {
        Self { config }
    }

    /// Spawns one invocation, streams its stdout, and returns the final
    /// assistant text plus session id. Never leaks the child: every error
    /// path below SIGTERMs (then, after `term_grace`, SIGKILLs) the child's
    /// whole process group before returning.
    pub async fn run(&self, input: CliRunInput) -> Result<CliRunOutput, CliError> {
        let start = Instant::now();
        let caps = probe(&self.config.cli_path).await?;

        let options = CliOptions {
            prompt: input.prompt,
            resume_session_id: input.resume_session_id,
            system_prompt_inline: input.system_prompt_inline,
            system_prompt_file: input.system_prompt_file,
            tool_manifest_path: input.tool_manifest_path,
            allowed_tools: input.allowed_tools,
            max_turns: input.max_turns,
            model: input.model,
        };
        let args = build_args(&options, &caps);
        debug!(cli = %self.config.cli_path, ?args, "spawning external CLI");

        let mut cmd = Command::new(&self.config.cli_path);
        cmd.args(&args);
        // Never inherited: the external CLI is never expected to read
        // interactively (§4.3).
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CliError::Spawn(format!("{}: {e}", self.config.cli_path)))?;

        match self.drive(&mut child, start).await {
            Ok(output) => Ok(output),
            Err(e) => {
                self.kill(&mut child).await;
                Err(e)
            }
        }
    }

    async fn drive(&self, child: &mut Child, start: Instant) -> Result<CliRunOutput, CliError> {
        let stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");
        let mut lines = BufReader::new(stdout).lines();

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut text: Option<String> = None;
        let mut session_id: Option<String> = None;
        let mut last_activity = Instant::now();

        loop {
            let idle_left = self.config.idle_timeout.saturating_sub(last_activity.elapsed());
            let hard_left = self.config.hard_timeout.saturating_sub(start.elapsed());
            if hard_left.is_zero() {
                return Err(CliError::Timeout(format!(
                    "exceeded hard ceiling of {:?}",
                    self.config.hard_timeout
                )));
            }
            if idle_left.is_zero() {
                return Err(CliError::Timeout(format!(
                    "no output for {:?}",
                    self.config.idle_timeout
                )));
            }
            let wait = idle_left.min(hard_left);

            tokio::select! {
                line = lines.next_line() => {
                    match line.map_err(|e| CliError::Parse(e.to_string()))? {
                        Some(raw) => {
                            last_activity = Instant::now();
                            if raw.trim().is_empty() {
                                continue;
                            }
                            let value: serde_json::Value = serde_json::from_str(&raw)
                                .map_err(|e| CliError::Parse(format!("{e}: {raw}")))?;
                            if value.get("type").and_then(|v| v.as_str()) == Some("result") {
                                text = value
                                    .get("result")
                                    .and_then(|v| v.as_str())
                                    .map(str::to_string);
                                session_id = value
                                    .get("session_id")
                                    .and_then(|v| v.as_str())
                                    .map(str::to_string);
                            }
                        }
                        None => break,
                    }
                }
                _ = sleep(wait) => {
                    continue;
                }
            }
        }

        let status = child.wait().await.map_err(|e| CliError::Spawn(e.to_string()))?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(CliError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stderr: head_tail_truncate(&stderr_text),
            });
        }

        let text = text.ok_or_else(|| {
            CliError::Parse("stream ended without a final 'result' event".to_string())
        })?;

        Ok(CliRunOutput {
            text,
            session_id,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// SIGTERM the child's process group, wait `term_grace`, then SIGKILL if
    /// it's still alive (§4.3 "must not leak the child").
    async fn kill(&self, child: &mut Child) {
        let Some(pid) = child.id() else { return };
        #[cfg(unix)]
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        let deadline = sleep(self.config.term_grace);
        tokio::pin!(deadline);
        tokio::select! {
            _ = child.wait() => {}
            _ = &mut deadline => {
                warn!(pid, "external CLI ignored SIGTERM, sending SIGKILL");
                #[cfg(unix)]
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
                let _ = child.wait().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(body: &str) -> tempfile::NamedTempFile {
        let f = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(f.path(), format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(f.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        f
    }

    fn mock_cli_script() -> tempfile::NamedTempFile {
        script(
            r#"if [ "$1" = "--version" ]; then
  echo "mockcli 1.0.0"
  exit 0
fi
if [ "$1" = "--help" ]; then
  echo "--output-format stream-json --resume --append-system-prompt --allowed-tools --mcp-config --max-turns --model --agents --lazy-tools --plugin-export"
  exit 0
fi
echo '{"type":"system","subtype":"init"}'
echo '{"type":"result","result":"hello from mock","session_id":"sess-123"}'
"#,
        )
    }

    #[tokio::test]
    async fn run_collects_final_result_event() {
        clade_capability::reset_cache_for_tests().await;
        let f = mock_cli_script();
        let runner = CliRunner::new(CliRunnerConfig {
            cli_path: f.path().to_str().unwrap().to_string(),
            idle_timeout: Duration::from_secs(5),
            hard_timeout: Duration::from_secs(5),
            term_grace: Duration::from_millis(200),
        });
        let output = runner
            .run(CliRunInput {
                prompt: "hi".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(output.text, "hello from mock");
        assert_eq!(output.session_id.as_deref(), Some("sess-123"));
        clade_capability::reset_cache_for_tests().await;
    }

    #[tokio::test]
    async fn run_fails_on_nonzero_exit() {
        clade_capability::reset_cache_for_tests().await;
        let f = script(
            r#"if [ "$1" = "--version" ]; then echo "mockcli 1.0.0"; exit 0; fi
if [ "$1" = "--help" ]; then echo "--output-format stream-json --resume --append-system-prompt"; exit 0; fi
echo "boom" >&2
exit 3
"#,
        );
        let runner = CliRunner::new(CliRunnerConfig {
            cli_path: f.path().to_str().unwrap().to_string(),
            idle_timeout: Duration::from_secs(5),
            hard_timeout: Duration::from_secs(5),
            term_grace: Duration::from_millis(200),
        });
        let err = runner
            .run(CliRunInput {
                prompt: "hi".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::NonZeroExit { code: 3, .. }));
        clade_capability::reset_cache_for_tests().await;
    }

    #[tokio::test]
    async fn run_fails_when_stream_never_emits_a_result_event() {
        clade_capability::reset_cache_for_tests().await;
        let f = script(
            r#"if [ "$1" = "--version" ]; then echo "mockcli 1.0.0"; exit 0; fi
if [ "$1" = "--help" ]; then echo "--output-format stream-json --resume --append-system-prompt"; exit 0; fi
echo '{"type":"system","subtype":"init"}'
"#,
        );
        let runner = CliRunner::new(CliRunnerConfig {
            cli_path: f.path().to_str().unwrap().to_string(),
            idle_timeout: Duration::from_secs(5),
            hard_timeout: Duration::from_secs(5),
            term_grace: Duration::from_millis(200),
        });
        let err = runner
            .run(CliRunInput {
                prompt: "hi".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Parse(_)));
        clade_capability::reset_cache_for_tests().await;
    }

    #[tokio::test]
    async fn run_times_out_on_idle_child() {
        clade_capability::reset_cache_for_tests().await;
        let f = script(
            r#"if [ "$1" = "--version" ]; then echo "mockcli 1.0.0"; exit 0; fi
if [ "$1" = "--help" ]; then echo "--output-format stream-json --resume --append-system-prompt"; exit 0; fi
sleep 5
echo '{"type":"result","result":"too late","session_id":null}'
"#,
        );
        let runner = CliRunner::new(CliRunnerConfig {
            cli_path: f.path().to_str().unwrap().to_string(),
            idle_timeout: Duration::from_millis(200),
            hard_timeout: Duration::from_secs(5),
            term_grace: Duration::from_millis(100),
        });
        let err = runner
            .run(CliRunInput {
                prompt: "hi".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Timeout(_)));
        clade_capability::reset_cache_for_tests().await;
    }
}
