//! Chat session and transcript.
//!
//! Prompts are recorded by the session before they are sent and replies by the
//! render hooks; both go through one channel, so the transcript stays in
//! trigger order.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use client_core::{
    ActionController, ActionError, ChatAction, ChatExchange, ChatMessage, RenderHooks, Settlement,
};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::warn;

/// Handle for appending transcript lines. The writer task exits once every
/// handle is dropped.
#[derive(Clone)]
pub struct Transcript {
    lines: mpsc::UnboundedSender<String>,
}

impl Transcript {
    pub fn spawn(path: Option<PathBuf>) -> (Self, JoinHandle<()>) {
        let (lines, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_lines(rx, path));
        (Self { lines }, writer)
    }

    pub fn push(&self, line: String) {
        let _ = self.lines.send(line);
    }
}

async fn open_transcript(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to open chat transcript");
            None
        }
    }
}

async fn write_lines(mut rx: mpsc::UnboundedReceiver<String>, path: Option<PathBuf>) {
    let mut file = match &path {
        Some(path) => open_transcript(path).await,
        None => None,
    };
    while let Some(line) = rx.recv().await {
        println!("{line}");
        let Some(out) = file.as_mut() else {
            continue;
        };
        let written = out.write_all(format!("{line}\n").as_bytes()).await;
        if let Err(err) = written {
            warn!(error = %err, "failed to append chat transcript; further lines are not saved");
            file = None;
        }
    }
    if let Some(mut out) = file {
        if let Err(err) = out.flush().await {
            warn!(error = %err, "failed to flush chat transcript");
        }
    }
}

pub fn failure_line(error: &ActionError) -> String {
    match error.status() {
        Some(status) => format!("error> {error} (HTTP {status})"),
        None => format!("error> {error}"),
    }
}

/// Render hooks for the chat controller.
pub struct ChatTranscript {
    transcript: Transcript,
}

impl ChatTranscript {
    pub fn new(transcript: Transcript) -> Self {
        Self { transcript }
    }
}

impl RenderHooks<ChatExchange> for ChatTranscript {
    fn on_pending(&mut self) {
        eprintln!("... waiting for reply");
    }

    fn on_success(&mut self, exchange: &ChatExchange) {
        self.transcript.push(format!("bot> {}", exchange.reply));
    }

    fn on_failure(&mut self, error: &ActionError) {
        self.transcript.push(failure_line(error));
    }
}

/// Records the prompt, then sends it and waits for its settlement.
pub async fn send(
    controller: &ActionController<ChatAction>,
    transcript: &Transcript,
    message: ChatMessage,
) -> Result<Settlement> {
    transcript.push(format!("you> {}", message.text()));
    Ok(controller.trigger_and_wait(message).await?)
}

/// Sends every non-blank line of `input`, one at a time. The next line is
/// read only after the previous message settles. Returns the number of
/// messages that did not succeed.
pub async fn run_session<R>(
    controller: &ActionController<ChatAction>,
    transcript: &Transcript,
    input: R,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut failures = 0;
    while let Some(line) = lines.next_line().await.context("failed to read chat input")? {
        let Ok(message) = ChatMessage::new(&line) else {
            continue;
        };
        if !send(controller, transcript, message).await?.is_success() {
            failures += 1;
        }
    }
    Ok(failures)
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
