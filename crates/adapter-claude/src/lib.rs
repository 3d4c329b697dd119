//! Claude CLI adapter
//!
//! Spawns the `claude` CLI as a subprocess for each turn and communicates
//! via stdin/stdout using the NDJSON stream-json protocol. The session's
//! resume id maps to `--resume` so conversations survive process restarts.

mod naming;
mod transform;

pub use naming::normalize_model;

use std::process::Stdio;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use tether_adapter_core::{AdapterError, AgentAdapter, AgentEvent, AgentStream};
use tether_protocol::{ContentBlock, SessionOptions, UserContent};

use crate::transform::Transformer;

/// Adapter for the Claude CLI.
pub struct ClaudeAdapter {
    binary: String,
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        let binary = std::env::var("TETHER_CLAUDE_BIN").unwrap_or_else(|_| "claude".to_string());
        Self { binary }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    fn stream(&self, prompt: UserContent, options: SessionOptions) -> AgentStream {
        let (tx, rx) = mpsc::channel(64);
        let binary = self.binary.clone();
        tokio::spawn(run_turn(binary, prompt, options, tx));
        ReceiverStream::new(rx).boxed()
    }
}

/// Run one turn: spawn the CLI, write the prompt, translate stdout lines
/// into events until EOF or a fatal error.
async fn run_turn(
    binary: String,
    prompt: UserContent,
    options: SessionOptions,
    tx: mpsc::Sender<Result<AgentEvent, AdapterError>>,
) {
    let mut child = match spawn_cli(&binary, &options) {
        Ok(child) => child,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    };

    let Some(mut stdin) = child.stdin.take() else {
        let _ = tx
            .send(Err(AdapterError::SpawnError("no stdin on child".into())))
            .await;
        return;
    };
    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(Err(AdapterError::SpawnError("no stdout on child".into())))
            .await;
        return;
    };

    // Stderr goes to the debug log only.
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(
                    component = "claude_adapter",
                    event = "claude.stderr",
                    line = %line,
                    "Claude CLI stderr"
                );
            }
        });
    }

    // One prompt per turn: write it, close stdin so the CLI runs to completion.
    let payload = match prompt_payload(&prompt) {
        Ok(json) => json,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    };
    if let Err(e) = stdin.write_all(payload.as_bytes()).await {
        let _ = tx.send(Err(AdapterError::IoError(e))).await;
        return;
    }
    drop(stdin);

    let mut transformer = Transformer::new();
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let raw: serde_json::Value = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(
                            component = "claude_adapter",
                            event = "claude.stdout.parse_error",
                            error = %e,
                            payload_bytes = line.len(),
                            "Failed to parse stdout JSON"
                        );
                        continue;
                    }
                };

                match transformer.transform(&raw) {
                    Ok(events) => {
                        for event in events {
                            if tx.send(Ok(event)).await.is_err() {
                                // Consumer gone (abort), stop reading.
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            Ok(None) => {
                info!(
                    component = "claude_adapter",
                    event = "claude.stdout.eof",
                    "Claude CLI stdout EOF"
                );
                return;
            }
            Err(e) => {
                let _ = tx.send(Err(AdapterError::IoError(e))).await;
                return;
            }
        }
    }
}

fn spawn_cli(binary: &str, options: &SessionOptions) -> Result<tokio::process::Child, AdapterError> {
    let mut args: Vec<String> = vec![
        "--print".into(),
        "--verbose".into(),
        "--output-format".into(),
        "stream-json".into(),
        "--input-format".into(),
        "stream-json".into(),
        "--include-partial-messages".into(),
    ];

    if let Some(model) = options.model.as_deref().and_then(normalize_model) {
        args.push("--model".into());
        args.push(model);
    }
    if let Some(resume_id) = &options.resume_id {
        args.push("--resume".into());
        args.push(resume_id.clone());
    }
    for dir in &options.add_dirs {
        args.push("--add-dir".into());
        args.push(dir.clone());
    }

    info!(
        component = "claude_adapter",
        event = "claude.spawn",
        cwd = %options.project_path,
        binary = %binary,
        resume_id = ?options.resume_id,
        "Spawning Claude CLI"
    );

    tokio::process::Command::new(binary)
        .args(&args)
        .current_dir(&options.project_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env("CLAUDE_CODE_ENTRYPOINT", "tether")
        .spawn()
        .map_err(|e| AdapterError::SpawnError(format!("failed to spawn {binary}: {e}")))
}

/// Serialize the prompt as one NDJSON user message.
fn prompt_payload(prompt: &UserContent) -> Result<String, AdapterError> {
    let blocks: Vec<serde_json::Value> = match prompt {
        UserContent::Text(text) => vec![serde_json::json!({"type": "text", "text": text})],
        UserContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => {
                    serde_json::json!({"type": "text", "text": text})
                }
                ContentBlock::Image { media_type, data } => serde_json::json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": media_type, "data": data}
                }),
            })
            .collect(),
    };

    let message = serde_json::json!({
        "type": "user",
        "message": {"role": "user", "content": blocks}
    });
    let mut line = serde_json::to_string(&message)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_payload_is_single_ndjson_line() {
        let payload = prompt_payload(&UserContent::Text("Hello".into())).expect("payload");
        assert!(payload.ends_with('\n'));
        let parsed: serde_json::Value =
            serde_json::from_str(payload.trim()).expect("valid json");
        assert_eq!(parsed["type"], "user");
        assert_eq!(parsed["message"]["content"][0]["text"], "Hello");
    }

    #[test]
    fn prompt_payload_preserves_image_blocks() {
        let prompt = UserContent::Blocks(vec![
            ContentBlock::Text {
                text: "what is this".into(),
            },
            ContentBlock::Image {
                media_type: "image/png".into(),
                data: "aGVsbG8=".into(),
            },
        ]);
        let payload = prompt_payload(&prompt).expect("payload");
        let parsed: serde_json::Value =
            serde_json::from_str(payload.trim()).expect("valid json");
        assert_eq!(parsed["message"]["content"][1]["type"], "image");
        assert_eq!(
            parsed["message"]["content"][1]["source"]["media_type"],
            "image/png"
        );
    }
}
