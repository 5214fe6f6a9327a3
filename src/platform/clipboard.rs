use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::Clipboard;
use crate::errors::CallError;

/// Clipboard backed by the platform's copy utility.
///
/// Tries each candidate program in order and uses the first one that
/// accepts the text on stdin and exits successfully.
#[derive(Debug, Clone)]
pub struct CommandClipboard {
    candidates: Vec<Vec<String>>,
}

impl CommandClipboard {
    pub fn new() -> Self {
        Self {
            candidates: default_candidates(),
        }
    }

    /// Use an explicit list of `program args...` commands.
    pub fn with_candidates(candidates: Vec<Vec<String>>) -> Self {
        Self { candidates }
    }

    async fn try_command(argv: &[String], text: &str) -> Result<(), String> {
        let (program, args) = argv.split_first().ok_or("empty clipboard command")?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("{}: {}", program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| format!("{}: {}", program, e))?;
            // Close stdin so the utility sees EOF.
            drop(stdin);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| format!("{}: {}", program, e))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{} exited with {}", program, status))
        }
    }
}

impl Default for CommandClipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clipboard for CommandClipboard {
    async fn write_text(&self, text: &str) -> Result<(), CallError> {
        let mut failures = Vec::new();
        for argv in &self.candidates {
            match Self::try_command(argv, text).await {
                Ok(()) => {
                    log::debug!("Copied {} bytes to clipboard via {}", text.len(), argv[0]);
                    return Ok(());
                }
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            failures.push("no clipboard utility configured".to_string());
        }
        Err(CallError::ClipboardWriteFailed(failures.join("; ")))
    }
}

fn default_candidates() -> Vec<Vec<String>> {
    let raw: &[&[&str]] = if cfg!(target_os = "macos") {
        &[&["pbcopy"]]
    } else if cfg!(target_os = "windows") {
        &[&["clip"]]
    } else {
        &[
            &["wl-copy"],
            &["xclip", "-selection", "clipboard"],
            &["xsel", "--clipboard", "--input"],
        ]
    };
    raw.iter()
        .map(|argv| argv.iter().map(|s| s.to_string()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_utilities_fail_softly() {
        let clipboard = CommandClipboard::with_candidates(vec![vec![
            "zerocall-no-such-clipboard-tool".to_string(),
        ]]);
        let result = clipboard.write_text("hello").await;
        assert!(matches!(result, Err(CallError::ClipboardWriteFailed(_))));
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let clipboard = CommandClipboard::with_candidates(Vec::new());
        match clipboard.write_text("hello").await {
            Err(CallError::ClipboardWriteFailed(msg)) => assert!(msg.contains("no clipboard")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_working_utility_wins() {
        let clipboard = CommandClipboard::with_candidates(vec![
            vec!["false".to_string()],
            vec!["cat".to_string()],
        ]);
        assert!(clipboard.write_text("hello").await.is_ok());
    }
}
