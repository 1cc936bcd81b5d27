//! Console front-end: stdin lines in, stdout replies out.

use super::channel_source::ClientInput;
use super::traits::{ControlCommand, OutputSink, SessionNotice};
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Utterance(String),
    Control(ControlCommand),
    Blank,
}

/// Map a console line to an utterance or a slash command.
///
/// Unknown slash commands are passed through as text.
pub fn parse_console_line(line: &str) -> ConsoleInput {
    let trimmed = line.trim();
    match trimmed {
        "" => ConsoleInput::Blank,
        "/clear" => ConsoleInput::Control(ControlCommand::ClearHistory),
        "/stop" => ConsoleInput::Control(ControlCommand::StopSpeaking),
        "/listen" => ConsoleInput::Control(ControlCommand::Trigger),
        "/quit" => ConsoleInput::Control(ControlCommand::Shutdown),
        text => ConsoleInput::Utterance(text.to_owned()),
    }
}

/// Spawn a task that reads stdin and routes each line in order.
///
/// The input is dropped at EOF, which closes the session's transcript
/// source.
pub fn spawn_stdin_reader(mut input: ClientInput, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    debug!("stdin read failed: {e}");
                    break;
                }
            };
            let delivered = match parse_console_line(&line) {
                ConsoleInput::Blank => true,
                ConsoleInput::Utterance(text) => input.utterance(text).await.is_ok(),
                ConsoleInput::Control(cmd) => input.control(cmd).await.is_ok(),
            };
            if !delivered {
                break;
            }
        }
    })
}

/// Writes replies as `Assistant: ...` lines.
pub struct ConsoleSink<W> {
    writer: W,
}

impl ConsoleSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> ConsoleSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> OutputSink for ConsoleSink<W> {
    async fn emit(&mut self, text: &str) -> Result<()> {
        self.write_line(&format!("Assistant: {text}")).await
    }

    async fn notify(&mut self, notice: SessionNotice) -> Result<()> {
        match notice {
            SessionNotice::HistoryCleared => self.write_line("(history cleared)").await,
        }
    }
}
