//! 外部コマンドで実装されたカスタムハンドラー
//!
//! `custom:<id>` 種別のステップは設定ファイルの `[handlers.<id>]` に従って
//! サブプロセスを起動します。
//!
//! - 標準入力: コンテキストのビュー（JSON）
//! - 環境変数: `LOCAL_AGENTS_TASK`, `LOCAL_AGENTS_STEP`
//! - 終了コード 0 で成功、標準出力がステップの出力になる
//!
//! タイムアウトでタスクが破棄されるとプロセスも終了させます。

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::traits::{AgentAdapter, AgentInput, AgentOutput};
use crate::config::settings::CommandHandlerConfig;
use crate::error::AgentError;

/// サブプロセスを起動するアダプター
pub struct CommandAgent {
    id: String,
    config: CommandHandlerConfig,
}

impl CommandAgent {
    pub fn new(id: impl Into<String>, config: CommandHandlerConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn command(&self, input: &AgentInput) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env("LOCAL_AGENTS_TASK", &input.task)
            .env("LOCAL_AGENTS_STEP", &input.step_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl AgentAdapter for CommandAgent {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        let payload = serde_json::to_vec(&input.context)
            .map_err(|e| AgentError::Failed(format!("failed to encode context: {}", e)))?;

        debug!(handler = %self.id, command = %self.config.command, "spawning handler");
        let mut child = self.command(&input).spawn()?;

        // 標準入力への書き込みと出力の読み出しは並行して行う
        let stdin = child.stdin.take();
        let write_stdin = async move {
            if let Some(mut stdin) = stdin {
                // 標準入力を読まずに終了するコマンドもある
                match stdin.write_all(&payload).await {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok::<(), std::io::Error>(())
        };

        let (written, output) = tokio::join!(write_stdin, child.wait_with_output());
        let output = output?;
        written?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            let mut result = AgentOutput::success(stdout);
            if !stderr.is_empty() {
                result = result.with_artifact("_stderr", stderr);
            }
            return Ok(result);
        }

        let status = match output.status.code() {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        let message = if stderr.is_empty() {
            format!("handler '{}' failed: {}", self.id, status)
        } else {
            format!("handler '{}' failed: {}: {}", self.id, status, stderr)
        };
        Ok(AgentOutput::failure(message))
    }
}
