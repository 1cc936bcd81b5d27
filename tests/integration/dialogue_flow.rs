//! End-to-end dialogue flows through the registry and turn coordinator.

use crate::helpers::{
    CapturingSink, EchoClient, FALLBACK, Output, QueueClient, spawn_session,
};
use colloquy::conversation::{SessionRegistry, SessionSettings, TurnState};
use colloquy::llm::CompletionError;
use colloquy::pipeline::ControlCommand;
use std::sync::Arc;
use std::time::Duration;

fn settings(max_turns: usize) -> SessionSettings {
    SessionSettings {
        max_turns,
        instruction: "Keep it short.".to_owned(),
        continuous: true,
    }
}

#[tokio::test]
async fn failed_backend_leaves_history_untouched() {
    let registry = SessionRegistry::new(settings(20));
    let client = Arc::new(QueueClient::new(vec![
        Ok("Hi there".to_owned()),
        Err(CompletionError::BackendRejected {
            status: 500,
            body: "boom".to_owned(),
        }),
    ]));
    let sink = CapturingSink::default();
    let running = spawn_session(&registry, client.clone(), sink.clone()).await;

    running.say("Hello").await;
    sink.wait_for_len(1).await;
    assert_eq!(running.stored().await, ["Hello", "Hi there"]);

    running.say("What's 2+2").await;
    sink.wait_for_len(2).await;
    running.wait_for_state(TurnState::AwaitingInput).await;

    assert_eq!(running.stored().await, ["Hello", "Hi there"]);
    assert_eq!(sink.replies(), ["Hi there", FALLBACK]);

    // The first request carried the instruction prefix, the second
    // replayed the stored exchange plus the provisional turn.
    let requests = client.requests();
    assert_eq!(
        requests[0][0].content,
        "[System Instructions: Keep it short.]\n\nUser: Hello"
    );
    assert_eq!(requests[1].len(), 3);
    assert_eq!(requests[1][2].content, "What's 2+2");

    running.shutdown().await;
}

#[tokio::test]
async fn single_turn_window_keeps_only_latest_exchange() {
    let registry = SessionRegistry::new(settings(1));
    let client = Arc::new(QueueClient::new(vec![
        Ok("1".to_owned()),
        Ok("2".to_owned()),
        Ok("3".to_owned()),
    ]));
    let sink = CapturingSink::default();
    let running = spawn_session(&registry, client.clone(), sink.clone()).await;

    for (i, text) in ["one", "two", "three"].into_iter().enumerate() {
        running.say(text).await;
        sink.wait_for_len(i + 1).await;
    }
    running.wait_for_state(TurnState::AwaitingInput).await;

    assert_eq!(running.stored().await, ["three", "3"]);

    // Each request saw at most the previous exchange plus the new turn.
    let requests = client.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].len(), 3);
    assert_eq!(
        requests[2][0].content,
        "[System Instructions: Keep it short.]\n\nUser: two"
    );

    running.shutdown().await;
}

#[tokio::test]
async fn clear_while_speaking_cancels_and_forgets() {
    let registry = SessionRegistry::new(settings(20));
    let client = Arc::new(QueueClient::new(vec![Ok(
        "Once upon a time...".to_owned()
    )]));
    let sink = CapturingSink::held();
    let running = spawn_session(&registry, client, sink.clone()).await;

    running.say("Tell me a story").await;
    running.wait_for_state(TurnState::Speaking).await;
    assert_eq!(running.stored().await.len(), 2);

    running.control(ControlCommand::ClearHistory).await;
    sink.wait_for_len(3).await;
    running.wait_for_state(TurnState::AwaitingInput).await;

    assert_eq!(
        sink.log(),
        [
            Output::Reply("Once upon a time...".to_owned()),
            Output::Cancelled,
            Output::Cleared,
        ]
    );
    assert!(running.stored().await.is_empty());

    running.shutdown().await;
}

#[tokio::test]
async fn concurrent_sessions_stay_isolated() {
    let registry = SessionRegistry::new(settings(20));
    let client: Arc<EchoClient> = Arc::new(EchoClient);
    let sink_a = CapturingSink::default();
    let sink_b = CapturingSink::default();
    let a = spawn_session(&registry, client.clone(), sink_a.clone()).await;
    let b = spawn_session(&registry, client, sink_b.clone()).await;
    assert_ne!(a.id, b.id);
    assert_eq!(registry.len().await, 2);

    a.say("apple").await;
    b.say("banana").await;
    a.say("avocado").await;
    b.say("blueberry").await;
    sink_a.wait_for_len(2).await;
    sink_b.wait_for_len(2).await;

    // Request sizes prove neither session saw the other's turns.
    assert_eq!(sink_a.replies(), ["apple (1)", "avocado (3)"]);
    assert_eq!(sink_b.replies(), ["banana (1)", "blueberry (3)"]);

    let stored_a = a.stored().await;
    let stored_b = b.stored().await;
    assert!(stored_a.iter().all(|t| !t.starts_with('b')));
    assert!(stored_b.iter().all(|t| !t.starts_with('a')));

    let (a_id, b_id) = (a.id.clone(), b.id.clone());
    a.shutdown().await;
    assert!(registry.destroy(&a_id).await);
    assert!(registry.get(&a_id).await.is_none());
    assert!(registry.get(&b_id).await.is_some());

    b.shutdown().await;
    registry.destroy(&b_id).await;
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn destroyed_session_stops_without_further_backend_calls() {
    let registry = SessionRegistry::new(settings(20));
    let client = Arc::new(QueueClient::new(vec![
        Ok("First".to_owned()),
        Ok("Never sent".to_owned()),
    ]));
    let sink = CapturingSink::default();
    let running = spawn_session(&registry, client.clone(), sink.clone()).await;

    running.say("Hello").await;
    sink.wait_for_len(1).await;
    running.wait_for_state(TurnState::AwaitingInput).await;

    assert!(registry.destroy(&running.id).await);
    let finished = tokio::time::timeout(Duration::from_secs(2), running.task).await;
    assert!(matches!(finished, Ok(Ok(Ok(())))));

    assert_eq!(client.requests().len(), 1);
    assert_eq!(sink.replies(), ["First"]);
    let session = running.session.lock().await;
    assert_eq!(session.state(), TurnState::Terminated);
    assert!(session.context().is_empty());
}
