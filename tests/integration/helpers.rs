//! Shared helpers for integration tests.

use async_trait::async_trait;
use colloquy::config::ListenConfig;
use colloquy::conversation::{SessionHandle, SessionId, SessionRegistry, TurnState};
use colloquy::llm::{ChatMessage, CompletionClient, CompletionError};
use colloquy::pipeline::{
    ChannelTranscriptSource, ClientInput, ControlCommand, DialogueScript, OutputSink,
    SessionNotice, TurnCoordinator,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const FALLBACK: &str = "Sorry, I ran into a problem contacting the language model.";

/// Replies from a fixed queue; records every request.
#[derive(Default)]
pub(crate) struct QueueClient {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl QueueClient {
    pub(crate) fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CompletionClient for QueueClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::BackendUnreachable("no reply queued".into())))
    }
}

/// Echoes the last message and the request length: `"<text> (<n>)"`.
pub(crate) struct EchoClient;

#[async_trait]
impl CompletionClient for EchoClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let last = messages
            .last()
            .map(|m| m.content.rsplit("User: ").next().unwrap_or_default().to_owned())
            .unwrap_or_default();
        Ok(format!("{last} ({})", messages.len()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Output {
    Reply(String),
    Cancelled,
    Cleared,
}

/// Records output. A held sink never completes an emission.
#[derive(Clone, Default)]
pub(crate) struct CapturingSink {
    log: Arc<Mutex<Vec<Output>>>,
    hold: bool,
}

impl CapturingSink {
    pub(crate) fn held() -> Self {
        Self {
            hold: true,
            ..Self::default()
        }
    }

    pub(crate) fn log(&self) -> Vec<Output> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn replies(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|o| match o {
                Output::Reply(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub(crate) async fn wait_for_len(&self, len: usize) {
        eventually(|| self.log().len() >= len, "sink output").await;
    }

    fn push(&self, output: Output) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(output);
    }
}

#[async_trait]
impl OutputSink for CapturingSink {
    async fn emit(&mut self, text: &str) -> colloquy::Result<()> {
        self.push(Output::Reply(text.to_owned()));
        if self.hold {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn cancel(&mut self) {
        self.push(Output::Cancelled);
    }

    async fn notify(&mut self, notice: SessionNotice) -> colloquy::Result<()> {
        match notice {
            SessionNotice::HistoryCleared => self.push(Output::Cleared),
        }
        Ok(())
    }
}

/// A coordinator running on its own task, with handles to drive it.
pub(crate) struct RunningSession {
    pub(crate) id: SessionId,
    pub(crate) session: SessionHandle,
    pub(crate) input: tokio::sync::Mutex<ClientInput>,
    pub(crate) task: tokio::task::JoinHandle<colloquy::Result<()>>,
}

impl RunningSession {
    pub(crate) async fn say(&self, text: &str) {
        self.input
            .lock()
            .await
            .utterance(text.to_owned())
            .await
            .unwrap();
    }

    pub(crate) async fn control(&self, cmd: ControlCommand) {
        self.input.lock().await.control(cmd).await.unwrap();
    }

    pub(crate) async fn wait_for_state(&self, want: TurnState) {
        let session = Arc::clone(&self.session);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if session.lock().await.state() == want {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {want:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub(crate) async fn stored(&self) -> Vec<String> {
        self.session
            .lock()
            .await
            .context()
            .turns()
            .map(|t| t.content.clone())
            .collect()
    }

    pub(crate) async fn shutdown(self) {
        self.control(ControlCommand::Shutdown).await;
        assert!(self.task.await.unwrap().is_ok());
    }
}

/// Create a session in `registry` and run it with a channel source.
pub(crate) async fn spawn_session(
    registry: &SessionRegistry,
    client: Arc<dyn CompletionClient>,
    sink: CapturingSink,
) -> RunningSession {
    let id = registry.create().await;
    let session = registry.get(&id).await.unwrap();
    let (input, source, control_rx) = ChannelTranscriptSource::with_controls(8);

    let coordinator = TurnCoordinator::new(
        id.clone(),
        Arc::clone(&session),
        client,
        source,
        sink,
        control_rx,
    )
    .with_listen(ListenConfig {
        timeout_secs: None,
        max_utterance_secs: 15,
    })
    .with_script(DialogueScript::networked(FALLBACK));

    RunningSession {
        id,
        session,
        input: tokio::sync::Mutex::new(input),
        task: tokio::spawn(coordinator.run()),
    }
}

/// Poll `cond` until it holds, panicking after 2s.
pub(crate) async fn eventually(cond: impl Fn() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
