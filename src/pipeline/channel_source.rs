//! Transcript source fed through an mpsc channel.
//!
//! Used for typed text (console, WebSocket) and by tests. Any component that
//! finalizes utterances elsewhere can push them into the sender half.
//!
//! When one client produces both utterances and control commands, use
//! [`ChannelTranscriptSource::with_controls`]: the returned [`ClientInput`]
//! holds a control command back until every utterance sent before it has
//! been taken by the session, so a `clear` never overtakes earlier text.

use super::traits::{ControlCommand, TranscriptError, TranscriptSource};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Receives finalized utterances from a channel.
#[derive(Debug)]
pub struct ChannelTranscriptSource {
    rx: mpsc::Receiver<String>,
    /// Count of utterances handed out by `capture_utterance`.
    taken: watch::Sender<u64>,
}

impl ChannelTranscriptSource {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        let (taken, _) = watch::channel(0);
        Self { rx, taken }
    }

    /// Create a connected sender/source pair.
    pub fn channel(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }

    /// Create an ordered input for one client, the source, and the control
    /// receiver to hand to the coordinator.
    pub fn with_controls(
        buffer: usize,
    ) -> (ClientInput, Self, mpsc::Receiver<ControlCommand>) {
        let (utterances, source) = Self::channel(buffer);
        let (controls, control_rx) = mpsc::channel(buffer);
        let input = ClientInput {
            utterances,
            controls,
            sent: 0,
            taken: source.taken.subscribe(),
        };
        (input, source, control_rx)
    }
}

#[async_trait]
impl TranscriptSource for ChannelTranscriptSource {
    /// `max_duration` does not apply to pre-finalized text.
    async fn capture_utterance(
        &mut self,
        timeout: Option<Duration>,
        _max_duration: Duration,
    ) -> Result<Option<String>, TranscriptError> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx.recv()).await {
                Ok(received) => received,
                Err(_) => return Ok(None),
            },
            None => self.rx.recv().await,
        };
        let text = received.ok_or(TranscriptError::Closed)?;
        self.taken.send_modify(|n| *n += 1);
        Ok(Some(text))
    }
}

/// Ordered sender for one client's utterances and control commands.
#[derive(Debug)]
pub struct ClientInput {
    utterances: mpsc::Sender<String>,
    controls: mpsc::Sender<ControlCommand>,
    sent: u64,
    taken: watch::Receiver<u64>,
}

impl ClientInput {
    /// Queue an utterance.
    ///
    /// # Errors
    ///
    /// [`TranscriptError::Closed`] once the session has stopped reading.
    pub async fn utterance(&mut self, text: String) -> Result<(), TranscriptError> {
        self.utterances
            .send(text)
            .await
            .map_err(|_| TranscriptError::Closed)?;
        self.sent += 1;
        Ok(())
    }

    /// Deliver a control command after all earlier utterances were taken.
    ///
    /// # Errors
    ///
    /// [`TranscriptError::Closed`] once the session has stopped reading.
    pub async fn control(&mut self, cmd: ControlCommand) -> Result<(), TranscriptError> {
        let sent = self.sent;
        self.taken
            .wait_for(|&taken| taken >= sent)
            .await
            .map_err(|_| TranscriptError::Closed)?;
        self.controls
            .send(cmd)
            .await
            .map_err(|_| TranscriptError::Closed)
    }
}
