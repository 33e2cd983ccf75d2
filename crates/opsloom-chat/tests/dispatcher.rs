//! Turn-level tests for the dispatcher against the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opsloom_chat::{ChatEvent, ChatStore, DispatchState, Dispatcher, SessionController, TurnOutcome};
use opsloom_client::mock::{MockTransport, TransportCall};
use opsloom_client::{
    Assistant, ClientError, ContentBlock, HistoryEntry, Message, MessageContent, Role,
};
use opsloom_core::{AssistantId, SessionId};

fn sid(s: &str) -> SessionId {
    SessionId::new(s).unwrap()
}

fn aid(s: &str) -> AssistantId {
    AssistantId::new(s).unwrap()
}

fn assistant(id: &str) -> Assistant {
    Assistant {
        id: aid(id),
        name: id.to_string(),
        metadata: None,
    }
}

fn untitled(id: &str) -> HistoryEntry {
    HistoryEntry {
        id: sid(id),
        title: None,
        created_at: Utc::now(),
        assistant_id: aid("a1"),
    }
}

fn record(text: &str, title: Option<&str>) -> String {
    let mut value = serde_json::json!({
        "blocks": [{"type": "text", "text": text}],
        "message_id": "m1",
    });
    if let Some(title) = title {
        value["title"] = serde_json::Value::String(title.to_string());
    }
    format!("{value}\n")
}

/// Dispatcher over a mock with assistant `a1` loaded and selected.
async fn setup(mock: MockTransport) -> (Dispatcher<MockTransport>, Arc<MockTransport>) {
    let mock = Arc::new(mock.with_assistants(vec![assistant("a1")]));
    let session = SessionController::new(Arc::clone(&mock), ChatStore::new());
    session.init().await.unwrap();
    session.select_assistant(&aid("a1")).unwrap();
    (Dispatcher::new(session), mock)
}

async fn wait_until(store: &ChatStore, what: &str, pred: impl Fn(&ChatStore) -> bool) {
    for _ in 0..500 {
        if pred(store) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {what}");
}

fn last_text(store: &ChatStore) -> Option<String> {
    store.messages().last().map(|m| m.blocks.plain_text())
}

// =============================================================================
// Happy Path Tests
// =============================================================================

#[tokio::test]
async fn first_message_creates_session_and_streams_reply() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.push_session(&sid("s1"));
    mock.push_stream(&[&record("Hi there", None)]);

    let outcome = dispatcher.send("Hello").await;

    assert_eq!(outcome, TurnOutcome::Completed);
    let store = dispatcher.store();
    let messages = store.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], Message::user("Hello"));
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(
        messages[1].blocks,
        MessageContent::Blocks(vec![ContentBlock::text("Hi there")])
    );
    assert_eq!(messages[1].id.as_ref().map(|id| id.as_str()), Some("m1"));
    assert_eq!(store.session_id(), Some(sid("s1")));
    assert!(!store.is_loading());
    assert_eq!(store.dispatch_state(), DispatchState::Idle);
    assert_eq!(store.input(), "");

    // The new session shows up in history once the turn is over.
    assert!(store.history().iter().any(|h| h.id == sid("s1")));
    assert_eq!(
        mock.calls()[2..],
        [
            TransportCall::CreateSession(aid("a1")),
            TransportCall::SubmitMessage {
                session_id: sid("s1"),
                text: "Hello".into()
            },
            TransportCall::FetchHistory,
        ]
    );
}

#[tokio::test]
async fn records_replace_reply_content() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.push_session(&sid("s1"));
    mock.push_stream(&[
        "{\"blocks\":[],\"message_id\":\"m1\"}\n",
        &record("Hi", None),
        &record("Hi there, how", None),
        &record("Hi there, how can I help?", None),
    ]);

    assert_eq!(dispatcher.send("Hello").await, TurnOutcome::Completed);

    let messages = dispatcher.store().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].blocks.plain_text(), "Hi there, how can I help?");
}

#[tokio::test]
async fn second_turn_reuses_session() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.push_session(&sid("s1"));
    mock.push_stream(&[&record("one", None)]);
    mock.push_stream(&[&record("two", None)]);

    dispatcher.send("first").await;
    dispatcher.send("second").await;

    assert_eq!(dispatcher.store().messages().len(), 4);
    assert_eq!(
        mock.count_calls(|c| matches!(c, TransportCall::CreateSession(_))),
        1
    );
    // History is only refreshed after the turn that created the session.
    assert_eq!(
        mock.count_calls(|c| matches!(c, TransportCall::FetchHistory)),
        2
    );
}

#[tokio::test]
async fn run_queued_dispatches_only_when_queued() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.push_session(&sid("s1"));
    mock.push_stream(&[&record("ok", None)]);

    assert_eq!(dispatcher.run_queued().await, TurnOutcome::Skipped);

    assert!(dispatcher.enqueue("Hello"));
    assert_eq!(dispatcher.store().dispatch_state(), DispatchState::Queued);
    assert!(dispatcher.store().pending().queued);

    assert_eq!(dispatcher.run_queued().await, TurnOutcome::Completed);
    assert!(!dispatcher.store().pending().queued);
}

#[tokio::test]
async fn turn_broadcasts_session_change() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.push_session(&sid("s1"));
    mock.push_stream(&[&record("ok", None)]);
    let mut events = dispatcher.store().subscribe();

    dispatcher.send("Hello").await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&ChatEvent::SessionChanged(Some(sid("s1")))));
    assert!(seen.contains(&ChatEvent::TimelineChanged));
}

// =============================================================================
// Validation Tests
// =============================================================================

#[tokio::test]
async fn blank_input_changes_nothing() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    let before = dispatcher.store().snapshot();

    assert!(!dispatcher.enqueue(""));
    assert!(!dispatcher.enqueue("   "));
    assert_eq!(dispatcher.send(" \n\t").await, TurnOutcome::Skipped);

    let after = dispatcher.store().snapshot();
    assert!(after.timeline.is_empty());
    assert_eq!(after.pending, before.pending);
    assert_eq!(after.dispatch, DispatchState::Idle);
    assert_eq!(mock.calls().len(), 2);
}

#[tokio::test]
async fn enqueue_is_ignored_while_in_flight() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.push_session(&sid("s1"));
    let feeder = mock.push_channel_stream();

    let task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.send("Hello").await }
    });
    let store = dispatcher.store().clone();
    wait_until(&store, "streaming", |s| {
        s.dispatch_state() == DispatchState::Streaming
    })
    .await;

    assert!(!dispatcher.enqueue("again"));
    assert!(store.pending().is_thinking);

    feeder.send(&record("done", None));
    feeder.close();
    assert_eq!(task.await.unwrap(), TurnOutcome::Completed);
    assert_eq!(store.messages().len(), 2);
}

// =============================================================================
// Error Tests
// =============================================================================

#[tokio::test]
async fn stream_rejection_becomes_one_error_message() {
    let (dispatcher, mock) = setup(MockTransport::new().with_history(vec![untitled("s1")])).await;
    let prior = vec![
        Message::user("Earlier"),
        Message::assistant(vec![ContentBlock::text("Earlier reply")], None),
    ];
    mock.set_timeline(&sid("s1"), prior.clone());
    dispatcher.navigate(Some(&sid("s1"))).await.unwrap();
    mock.fail_stream(ClientError::request(Some(429), Some("quota exceeded".into())));

    let outcome = dispatcher.send("Hello").await;

    let messages = dispatcher.store().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[..2], prior[..]);
    assert_eq!(messages[2], Message::user("Hello"));
    assert!(messages[3].is_error);
    assert_eq!(messages[3].role, Role::Assistant);
    assert!(messages[3].blocks.plain_text().contains("quota exceeded"));
    assert_eq!(
        outcome,
        TurnOutcome::Failed("An error occurred: quota exceeded. Please try again.".into())
    );
    assert!(!dispatcher.store().is_loading());
    assert_eq!(dispatcher.store().dispatch_state(), DispatchState::Idle);
}

#[tokio::test]
async fn session_creation_failure_is_reported() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.fail_create_session(ClientError::request(Some(500), None));

    let outcome = dispatcher.send("Hello").await;

    assert!(matches!(outcome, TurnOutcome::Failed(ref text) if text.contains("Network response was not ok")));
    let messages = dispatcher.store().messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].is_error);
    assert_eq!(dispatcher.store().session_id(), None);
    assert!(!dispatcher.store().is_loading());
}

#[tokio::test]
async fn missing_assistant_is_reported() {
    let mock = Arc::new(MockTransport::new());
    let dispatcher = Dispatcher::new(SessionController::new(Arc::clone(&mock), ChatStore::new()));

    let outcome = dispatcher.send("Hello").await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed("An error occurred: no assistant selected. Please try again.".into())
    );
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn malformed_record_after_partial_reply_appends_error() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.push_session(&sid("s1"));
    mock.push_stream(&[&record("partial", None), "{broken\n", &record("never", None)]);

    let outcome = dispatcher.send("Hello").await;

    assert!(matches!(outcome, TurnOutcome::Failed(_)));
    let messages = dispatcher.store().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].blocks.plain_text(), "partial");
    assert!(!messages[1].is_error);
    assert!(messages[2].is_error);
    assert!(!dispatcher.store().is_loading());
}

// =============================================================================
// Title Tests
// =============================================================================

#[tokio::test]
async fn title_is_backfilled_once_per_stream() {
    let (dispatcher, mock) = setup(MockTransport::new().with_history(vec![untitled("s1")])).await;
    dispatcher.navigate(Some(&sid("s1"))).await.unwrap();
    mock.push_stream(&[
        &record("a", Some("First title")),
        &record("ab", Some("Second title")),
        &record("abc", Some("Third title")),
    ]);

    assert_eq!(dispatcher.send("Hello").await, TurnOutcome::Completed);

    let history = dispatcher.store().history();
    assert_eq!(history[0].title.as_deref(), Some("First title"));
}

#[tokio::test]
async fn trailing_title_record_keeps_finished_reply() {
    let (dispatcher, mock) = setup(MockTransport::new().with_history(vec![untitled("s1")])).await;
    dispatcher.navigate(Some(&sid("s1"))).await.unwrap();
    mock.push_stream(&[&record("Hi there", None), "{\"title\":\"Trip\"}\n"]);

    assert_eq!(dispatcher.send("Hello").await, TurnOutcome::Completed);

    let messages = dispatcher.store().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].blocks.plain_text(), "Hi there");
    assert_eq!(messages[1].id.as_ref().map(|id| id.as_str()), Some("m1"));
    assert_eq!(
        dispatcher.store().history()[0].title.as_deref(),
        Some("Trip")
    );
}

#[tokio::test]
async fn title_without_history_entry_is_ignored() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.set_timeline(&sid("ghost"), Vec::new());
    dispatcher.navigate(Some(&sid("ghost"))).await.unwrap();
    mock.push_stream(&[&record("reply", Some("Title"))]);

    assert_eq!(dispatcher.send("Hello").await, TurnOutcome::Completed);
    assert!(dispatcher.store().history().is_empty());
    assert_eq!(last_text(dispatcher.store()).as_deref(), Some("reply"));
}

// =============================================================================
// Navigation and Cancellation Tests
// =============================================================================

#[tokio::test]
async fn opening_another_session_mid_stream_drops_old_records() {
    let (dispatcher, mock) = setup(
        MockTransport::new().with_history(vec![untitled("sA"), untitled("sB")]),
    )
    .await;
    let b_timeline = vec![
        Message::user("B question"),
        Message::assistant(vec![ContentBlock::text("B answer")], None),
    ];
    mock.set_timeline(&sid("sB"), b_timeline.clone());
    dispatcher.navigate(Some(&sid("sA"))).await.unwrap();
    let feeder = mock.push_channel_stream();

    let task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.send("Hello A").await }
    });
    let store = dispatcher.store().clone();
    feeder.send(&record("partial A", None));
    wait_until(&store, "first record", |s| {
        last_text(s).as_deref() == Some("partial A")
    })
    .await;

    dispatcher.navigate(Some(&sid("sB"))).await.unwrap();
    feeder.send(&record("more A", None));
    feeder.close();

    assert_eq!(task.await.unwrap(), TurnOutcome::Cancelled);
    assert_eq!(store.messages(), b_timeline);
    assert_eq!(store.session_id(), Some(sid("sB")));
    assert!(!store.is_loading());
    assert!(!store.pending().is_thinking);
}

#[tokio::test]
async fn stale_stream_leaves_cancel_to_the_live_turn() {
    let (dispatcher, mock) = setup(
        MockTransport::new().with_history(vec![untitled("sA"), untitled("sB")]),
    )
    .await;
    mock.set_timeline(&sid("sB"), Vec::new());
    dispatcher.navigate(Some(&sid("sA"))).await.unwrap();
    let feeder_a = mock.push_channel_stream();
    let feeder_b = mock.push_channel_stream();
    let store = dispatcher.store().clone();

    let task_a = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.send("A").await }
    });
    feeder_a.send(&record("partial A", None));
    wait_until(&store, "first A record", |s| {
        last_text(s).as_deref() == Some("partial A")
    })
    .await;

    dispatcher.navigate(Some(&sid("sB"))).await.unwrap();
    let task_b = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.send("B").await }
    });
    wait_until(&store, "B streaming", |s| {
        s.dispatch_state() == DispatchState::Streaming
    })
    .await;

    dispatcher.cancel();
    feeder_a.send(&record("more A", None));
    assert_eq!(task_a.await.unwrap(), TurnOutcome::Cancelled);
    assert!(store.cancel_signal().is_raised());

    feeder_b.send(&record("B reply", None));
    feeder_b.close();
    assert_eq!(task_b.await.unwrap(), TurnOutcome::Cancelled);

    let messages = store.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], Message::user("B"));
    assert!(messages[1].is_placeholder());
    assert!(!store.cancel_signal().is_raised());
    assert!(!store.is_loading());
}

#[tokio::test]
async fn cancel_keeps_partial_reply() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.push_session(&sid("s1"));
    let feeder = mock.push_channel_stream();

    let task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.send("Hello").await }
    });
    let store = dispatcher.store().clone();
    feeder.send(&record("partial", None));
    wait_until(&store, "first record", |s| {
        last_text(s).as_deref() == Some("partial")
    })
    .await;

    dispatcher.cancel();
    feeder.send(&record("ignored", None));

    assert_eq!(task.await.unwrap(), TurnOutcome::Cancelled);
    assert_eq!(last_text(&store).as_deref(), Some("partial"));
    assert!(!store.is_loading());
    assert!(!store.cancel_signal().is_raised());
    // A cancelled turn does not refresh history.
    assert_eq!(
        mock.count_calls(|c| matches!(c, TransportCall::FetchHistory)),
        1
    );
}

#[tokio::test]
async fn navigation_is_skipped_while_queued() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    assert!(dispatcher.enqueue("Hello"));

    dispatcher.navigate(Some(&sid("s2"))).await.unwrap();

    assert_eq!(
        mock.count_calls(|c| matches!(c, TransportCall::FetchTimeline(_))),
        0
    );
    assert!(dispatcher.store().pending().queued);
}

#[tokio::test]
async fn navigating_to_active_session_is_noop() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.set_timeline(&sid("s1"), vec![Message::user("Hi")]);

    dispatcher.navigate(Some(&sid("s1"))).await.unwrap();
    dispatcher.navigate(Some(&sid("s1"))).await.unwrap();

    assert_eq!(
        mock.count_calls(|c| matches!(c, TransportCall::FetchTimeline(_))),
        1
    );
    assert_eq!(dispatcher.store().messages().len(), 1);
}

#[tokio::test]
async fn navigating_nowhere_clears_conversation() {
    let (dispatcher, mock) = setup(MockTransport::new()).await;
    mock.set_timeline(&sid("s1"), vec![Message::user("Hi")]);
    dispatcher.navigate(Some(&sid("s1"))).await.unwrap();

    dispatcher.navigate(None).await.unwrap();

    assert_eq!(dispatcher.store().session_id(), None);
    assert!(dispatcher.store().messages().is_empty());
}
