//! Turn coordinator: drives one session through listen → generate → speak.
//!
//! Each session runs as a single task. Control commands (stop, clear,
//! shutdown) are raced against whatever the session is currently waiting
//! on, so a reply being emitted can be cut short at any point. The backend
//! call itself is never cancelled by stop or clear; its result is simply
//! discarded when the provisional turn it belonged to is gone.
//!
//! A queued control command is preferred over queued text. Paired with
//! [`ClientInput`](super::ClientInput), which only releases a command once
//! earlier text was taken, this keeps one client's input in arrival order.
//! Destroying the session through the registry stops the loop at its next
//! suspension point.

use crate::config::{ConversationConfig, ListenConfig};
use crate::conversation::{SessionHandle, SessionId, TurnEvent, TurnState};
use crate::error::{DialogueError, Result};
use crate::llm::CompletionClient;
use crate::pipeline::traits::{
    ControlCommand, OutputSink, SessionNotice, TranscriptError, TranscriptSource,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Fixed lines and phrase lists a session speaks or reacts to.
#[derive(Debug, Clone)]
pub struct DialogueScript {
    /// Spoken when the backend fails. Never stored.
    pub fallback: String,
    /// Spoken once at session start. Never stored.
    pub greeting: Option<String>,
    pub reset_phrases: Vec<String>,
    pub reset_confirmation: String,
    pub exit_phrases: Vec<String>,
    pub farewell: String,
}

impl DialogueScript {
    /// Script for networked sessions: no greeting and no spoken commands.
    pub fn networked(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            greeting: None,
            reset_phrases: Vec::new(),
            reset_confirmation: String::new(),
            exit_phrases: Vec::new(),
            farewell: String::new(),
        }
    }

    fn is_exit(&self, normalized: &str) -> bool {
        matches_phrase(&self.exit_phrases, normalized)
    }

    fn is_reset(&self, normalized: &str) -> bool {
        matches_phrase(&self.reset_phrases, normalized)
    }
}

impl Default for DialogueScript {
    fn default() -> Self {
        Self::from(&ConversationConfig::default())
    }
}

impl From<&ConversationConfig> for DialogueScript {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            fallback: config.fallback_message.clone(),
            greeting: config.greeting.clone(),
            reset_phrases: config.reset_phrases.clone(),
            reset_confirmation: config.reset_confirmation.clone(),
            exit_phrases: config.exit_phrases.clone(),
            farewell: config.farewell.clone(),
        }
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize_utterance(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn matches_phrase(phrases: &[String], normalized: &str) -> bool {
    !normalized.is_empty() && phrases.iter().any(|p| normalize_utterance(p) == normalized)
}

/// Resolves once the session is cancelled from outside or has terminated.
async fn halted(cancel: &CancellationToken, ended: &CancellationToken) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = ended.cancelled() => {}
    }
}

/// How an emission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Playback {
    Finished,
    Stopped,
    Cleared,
    Shutdown,
}

/// Runs the turn-taking loop for one session.
pub struct TurnCoordinator<S, O> {
    id: SessionId,
    session: SessionHandle,
    client: Arc<dyn CompletionClient>,
    source: S,
    sink: O,
    controls: mpsc::Receiver<ControlCommand>,
    controls_open: bool,
    listen: ListenConfig,
    script: DialogueScript,
    cancel: CancellationToken,
    ended: CancellationToken,
}

impl<S: TranscriptSource, O: OutputSink> TurnCoordinator<S, O> {
    pub fn new(
        id: SessionId,
        session: SessionHandle,
        client: Arc<dyn CompletionClient>,
        source: S,
        sink: O,
        controls: mpsc::Receiver<ControlCommand>,
    ) -> Self {
        Self {
            id,
            session,
            client,
            source,
            sink,
            controls,
            controls_open: true,
            listen: ListenConfig::default(),
            script: DialogueScript::default(),
            cancel: CancellationToken::new(),
            // Replaced by the session's own token in `run`.
            ended: CancellationToken::new(),
        }
    }

    pub fn with_listen(mut self, listen: ListenConfig) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_script(mut self, script: DialogueScript) -> Self {
        self.script = script;
        self
    }

    /// Use an externally owned cancellation token (e.g. Ctrl+C, server shutdown).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the session terminates.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::DeviceFailure`] when the transcript source
    /// fails, or the sink's error when output cannot be delivered. Backend
    /// failures never surface here.
    pub async fn run(mut self) -> Result<()> {
        self.ended = self.session.lock().await.ended_token();
        info!(session = %self.id, "session started");
        let result = self.drive().await;
        self.session.lock().await.terminate();
        match &result {
            Ok(()) => info!(session = %self.id, "session ended"),
            Err(e) => error!(session = %self.id, "session failed: {e}"),
        }
        result
    }

    async fn drive(&mut self) -> Result<()> {
        self.apply(TurnEvent::Start).await;
        if let Some(greeting) = self.script.greeting.clone() {
            let playback = self.play(&greeting).await?;
            self.settle(playback).await?;
        }

        loop {
            match self.state().await {
                TurnState::Terminated => return Ok(()),
                TurnState::Idle => self.wait_for_trigger().await?,
                TurnState::AwaitingInput => self.listen_once().await?,
                state @ (TurnState::Generating | TurnState::Speaking) => {
                    // Every cycle ends in a resting state.
                    error!(session = %self.id, ?state, "session left mid-cycle");
                    self.apply(TurnEvent::Shutdown).await;
                }
            }
        }
    }

    async fn wait_for_trigger(&mut self) -> Result<()> {
        if !self.controls_open {
            info!(session = %self.id, "idle with no control channel, ending session");
            self.apply(TurnEvent::Shutdown).await;
            return Ok(());
        }
        // Input that arrives while idle is consumed and dropped, so a
        // command queued behind it is never held up.
        let max_duration = self.listen.max_utterance();
        tokio::select! {
            biased;
            () = halted(&self.cancel, &self.ended) => {
                self.apply(TurnEvent::Shutdown).await;
                Ok(())
            }
            cmd = self.controls.recv() => self.on_control(cmd).await,
            captured = self.source.capture_utterance(None, max_duration) => match captured {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    info!(session = %self.id, "not listening, ignoring: {text}");
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(err) => self.on_source_error(err).await,
            },
        }
    }

    async fn listen_once(&mut self) -> Result<()> {
        let timeout = self.listen.timeout();
        let max_duration = self.listen.max_utterance();

        let captured = tokio::select! {
            biased;
            () = halted(&self.cancel, &self.ended) => {
                self.apply(TurnEvent::Shutdown).await;
                return Ok(());
            }
            cmd = self.controls.recv(), if self.controls_open => {
                return self.on_control(cmd).await;
            }
            captured = self.source.capture_utterance(timeout, max_duration) => captured,
        };

        self.on_utterance(captured).await
    }

    /// Handle a control command while the session is resting.
    async fn on_control(&mut self, cmd: Option<ControlCommand>) -> Result<()> {
        match cmd {
            None => {
                debug!(session = %self.id, "control channel closed");
                self.controls_open = false;
            }
            Some(ControlCommand::Trigger) => {
                self.apply(TurnEvent::Trigger).await;
            }
            Some(ControlCommand::StopSpeaking) => {
                self.apply(TurnEvent::StopSpeaking).await;
            }
            Some(ControlCommand::ClearHistory) => self.clear_history().await?,
            Some(ControlCommand::Shutdown) => {
                self.apply(TurnEvent::Shutdown).await;
            }
        }
        Ok(())
    }

    async fn on_utterance(
        &mut self,
        captured: std::result::Result<Option<String>, TranscriptError>,
    ) -> Result<()> {
        let text = match captured {
            Ok(text) => text,
            Err(err) => return self.on_source_error(err).await,
        };
        if self.state().await == TurnState::Terminated {
            debug!(session = %self.id, "session terminated, dropping utterance");
            return Ok(());
        }

        let text = text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            debug!(session = %self.id, "no intelligible speech");
            self.apply(TurnEvent::UtteranceCaptured {
                intelligible: false,
            })
            .await;
            return Ok(());
        }

        let normalized = normalize_utterance(text);
        if self.script.is_exit(&normalized) {
            info!(session = %self.id, "exit phrase heard");
            let farewell = self.script.farewell.clone();
            if !farewell.is_empty() {
                self.play(&farewell).await?;
            }
            self.apply(TurnEvent::Shutdown).await;
            return Ok(());
        }
        if self.script.is_reset(&normalized) {
            self.clear_history().await?;
            let confirmation = self.script.reset_confirmation.clone();
            if !confirmation.is_empty() {
                let playback = self.play(&confirmation).await?;
                self.settle(playback).await?;
            }
            return Ok(());
        }

        self.exchange(text.to_owned()).await
    }

    async fn on_source_error(&mut self, err: TranscriptError) -> Result<()> {
        self.apply(TurnEvent::Shutdown).await;
        match err {
            TranscriptError::Closed => {
                info!(session = %self.id, "transcript source closed");
                Ok(())
            }
            TranscriptError::Device(msg) => {
                error!(session = %self.id, "transcript device failed: {msg}");
                Err(DialogueError::DeviceFailure(msg))
            }
        }
    }

    /// One user → backend → reply exchange.
    async fn exchange(&mut self, text: String) -> Result<()> {
        info!(session = %self.id, "user: {text}");
        let (pending, messages) = {
            let mut session = self.session.lock().await;
            if session.is_terminated() {
                return Ok(());
            }
            session.apply(TurnEvent::UtteranceCaptured { intelligible: true });
            let pending = session.context_mut().append_user(text);
            (pending, session.context().render_for_backend())
        };

        let client = Arc::clone(&self.client);
        let result = {
            let completion = client.complete(&messages);
            tokio::pin!(completion);
            loop {
                tokio::select! {
                    result = &mut completion => break Some(result),
                    () = halted(&self.cancel, &self.ended) => break None,
                    cmd = self.controls.recv(), if self.controls_open => match cmd {
                        None => self.controls_open = false,
                        Some(ControlCommand::Shutdown) => break None,
                        Some(ControlCommand::ClearHistory) => self.clear_history().await?,
                        Some(ControlCommand::StopSpeaking | ControlCommand::Trigger) => {
                            debug!(session = %self.id, ?cmd, "ignored while generating");
                        }
                    },
                }
            }
        };

        let Some(result) = result else {
            self.apply(TurnEvent::Shutdown).await;
            return Ok(());
        };

        match result {
            Ok(reply) => {
                let committed = {
                    let mut session = self.session.lock().await;
                    if session.context_mut().commit_assistant(reply.clone()) {
                        session.apply(TurnEvent::CompletionSucceeded);
                        true
                    } else {
                        session.apply(TurnEvent::ReplyDiscarded);
                        false
                    }
                };
                if !committed {
                    info!(session = %self.id, "history cleared during generation, reply discarded");
                    return Ok(());
                }
                info!(session = %self.id, "assistant: {reply}");
                let playback = self.play(&reply).await?;
                self.settle(playback).await
            }
            Err(err) => {
                warn!(session = %self.id, code = err.code(), "completion failed: {err}");
                {
                    let mut session = self.session.lock().await;
                    session.context_mut().rollback(pending);
                    session.apply(TurnEvent::CompletionFailed);
                }
                let fallback = self.script.fallback.clone();
                let playback = self.play(&fallback).await?;
                self.settle(playback).await
            }
        }
    }

    /// Emit `text`, racing it against control commands.
    ///
    /// On stop or clear the emit future is dropped before the sink's
    /// `cancel` hook runs.
    async fn play(&mut self, text: &str) -> Result<Playback> {
        let outcome = {
            let emit = self.sink.emit(text);
            tokio::pin!(emit);
            loop {
                tokio::select! {
                    result = &mut emit => break result.map(|()| Playback::Finished),
                    () = halted(&self.cancel, &self.ended) => break Ok(Playback::Shutdown),
                    cmd = self.controls.recv(), if self.controls_open => match cmd {
                        None => self.controls_open = false,
                        Some(ControlCommand::StopSpeaking) => break Ok(Playback::Stopped),
                        Some(ControlCommand::ClearHistory) => break Ok(Playback::Cleared),
                        Some(ControlCommand::Shutdown) => break Ok(Playback::Shutdown),
                        Some(ControlCommand::Trigger) => {}
                    },
                }
            }
        };

        if matches!(outcome, Ok(Playback::Stopped | Playback::Cleared)) {
            debug!(session = %self.id, "output interrupted");
            self.sink.cancel().await;
        }
        outcome
    }

    /// Feed the end of an emission to the state machine.
    ///
    /// Outside `Speaking` the playback events leave the state unchanged.
    async fn settle(&mut self, playback: Playback) -> Result<()> {
        match playback {
            Playback::Finished => {
                self.apply(TurnEvent::PlaybackFinished).await;
            }
            Playback::Stopped => {
                self.apply(TurnEvent::StopSpeaking).await;
            }
            Playback::Cleared => self.clear_history().await?,
            Playback::Shutdown => {
                self.apply(TurnEvent::Shutdown).await;
            }
        }
        Ok(())
    }

    async fn clear_history(&mut self) -> Result<()> {
        self.session.lock().await.clear_history();
        info!(session = %self.id, "history cleared");
        self.sink.notify(SessionNotice::HistoryCleared).await
    }

    async fn apply(&mut self, event: TurnEvent) -> TurnState {
        self.session.lock().await.apply(event)
    }

    async fn state(&mut self) -> TurnState {
        self.session.lock().await.state()
    }
}
