//! End-to-end scheduler flows over a scratch `.borg` root with a scripted
//! runtime standing in for the LLM.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use borg_agent::{AgentRuntime, QueryRequest, RuntimeError, RuntimeEvent};
use borg_core::{BorgPaths, IncomingEnvelope, OutgoingEnvelope, Source, ThreadId};
use borg_queue::{recover_processing, Queue};
use borg_scheduler::Engine;
use borg_state::ThreadStore;

/// Mock runtime: optional startup delay, optional scripted failures for
/// the first N calls, then a fixed reply.
struct MockRuntime {
    delay_ms: u64,
    fail_first: usize,
    reply: String,
    calls: AtomicUsize,
}

impl MockRuntime {
    fn replying(reply: &str) -> Self {
        Self {
            delay_ms: 0,
            fail_first: 0,
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(reply: &str, delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::replying(reply)
        }
    }

    fn flaky(reply: &str, fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::replying(reply)
        }
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(
        &self,
        _req: &QueryRequest,
        tx: mpsc::Sender<RuntimeEvent>,
    ) -> Result<(), RuntimeError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(RuntimeError::Stream("scripted failure".into()));
        }
        let _ = tx
            .send(RuntimeEvent::SessionStarted {
                session_id: format!("sess-{call}"),
            })
            .await;
        let _ = tx
            .send(RuntimeEvent::AssistantText {
                text: self.reply.clone(),
            })
            .await;
        let _ = tx
            .send(RuntimeEvent::Result {
                text: Some(self.reply.clone()),
                is_error: false,
            })
            .await;
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    paths: BorgPaths,
    queue: Queue,
    engine: Arc<Engine>,
}

fn harness(runtime: MockRuntime) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = BorgPaths::new(dir.path());
    paths.ensure_layout().unwrap();
    let queue = Queue::new(paths.clone());
    let engine = Arc::new(Engine::new(paths.clone(), Arc::new(runtime)));
    Harness {
        _dir: dir,
        paths,
        queue,
        engine,
    }
}

fn user_envelope(thread: u32, message_id: &str, message: &str) -> IncomingEnvelope {
    IncomingEnvelope {
        channel: "tg".into(),
        source: Source::User,
        thread_id: ThreadId(thread),
        source_thread_id: None,
        sender: "Alice".into(),
        message: message.into(),
        is_reply: false,
        reply_to_text: None,
        reply_to_model: None,
        topic_name: None,
        timestamp: 1,
        message_id: message_id.into(),
    }
}

fn heartbeat_envelope(thread: u32, message_id: &str) -> IncomingEnvelope {
    IncomingEnvelope {
        channel: "heartbeat".into(),
        source: Source::Heartbeat,
        thread_id: ThreadId(thread),
        source_thread_id: None,
        sender: "borg".into(),
        message: "Scheduled check-in".into(),
        is_reply: false,
        reply_to_text: None,
        reply_to_model: None,
        topic_name: None,
        timestamp: 1,
        message_id: message_id.into(),
    }
}

fn outgoing_files(paths: &BorgPaths) -> Vec<(String, OutgoingEnvelope)> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(paths.outgoing_dir()).unwrap().flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let envelope =
            serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
        out.push((name, envelope));
    }
    out
}

async fn settle(engine: &Arc<Engine>, paths: &BorgPaths, expected_outgoing: usize) {
    for _ in 0..250 {
        if engine.in_flight() == 0
            && std::fs::read_dir(paths.outgoing_dir()).unwrap().count() >= expected_outgoing
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Arc::clone(engine).scan().await;
    }
    panic!("flows did not settle");
}

#[tokio::test]
async fn fresh_thread_simple_message_end_to_end() {
    let h = harness(MockRuntime::replying("Paris."));
    h.queue
        .publish_incoming(&user_envelope(7, "m1", "What is the capital of France?"))
        .unwrap();

    Arc::clone(&h.engine).scan().await;
    settle(&h.engine, &h.paths, 1).await;

    // outgoing envelope on the lowest tier
    let outgoing = outgoing_files(&h.paths);
    assert_eq!(outgoing.len(), 1);
    let (name, envelope) = &outgoing[0];
    assert!(name.starts_with("tg_m1_"));
    assert_eq!(envelope.model, "haiku");
    assert_eq!(envelope.message, "Paris.");
    assert_eq!(envelope.message_id, "m1");

    // processing drained, thread registered with a fresh session
    assert_eq!(std::fs::read_dir(h.paths.processing_dir()).unwrap().count(), 0);
    let store = ThreadStore::new(&h.paths);
    let thread = store.get(ThreadId(7)).unwrap();
    assert!(thread.session_id.is_some());

    // one inbound and one outbound history entry
    let history = std::fs::read_to_string(h.paths.history_file()).unwrap();
    assert_eq!(history.lines().count(), 2);

    // status beacon cleaned up
    assert_eq!(std::fs::read_dir(h.paths.status_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn reply_clamp_forces_the_prior_tier() {
    let h = harness(MockRuntime::replying("done"));
    let mut envelope = user_envelope(7, "m2", "yes do it");
    envelope.is_reply = true;
    envelope.reply_to_text = Some("Shall I refactor the auth module?".into());
    envelope.reply_to_model = Some("opus".into());
    h.queue.publish_incoming(&envelope).unwrap();

    Arc::clone(&h.engine).scan().await;
    settle(&h.engine, &h.paths, 1).await;

    let outgoing = outgoing_files(&h.paths);
    assert_eq!(outgoing.len(), 1);
    // "yes do it" routes SIMPLE, but the clamp pins it to the prior opus
    assert_eq!(outgoing[0].1.model, "opus");

    // the decision log carries the clamp signal
    let routing = std::fs::read_to_string(h.paths.routing_log_file()).unwrap();
    assert!(routing.contains("replyClamp"));
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let h = harness(MockRuntime::flaky("recovered", 1));
    let store = ThreadStore::new(&h.paths);
    store.ensure_thread(ThreadId(3), None).unwrap();
    store
        .set_session(ThreadId(3), Some("sess-stale".into()))
        .unwrap();

    h.queue
        .publish_incoming(&user_envelope(3, "m5", "please summarize the build log"))
        .unwrap();
    Arc::clone(&h.engine).scan().await;

    // first attempt fails: file re-queued with a retry suffix, session
    // cleared
    for _ in 0..250 {
        if h.paths.incoming_dir().join("tg_m5_retry1.json").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(h.paths.incoming_dir().join("tg_m5_retry1.json").exists());
    assert!(store.get(ThreadId(3)).unwrap().session_id.is_none());

    // second attempt succeeds and consumes the suffix
    Arc::clone(&h.engine).scan().await;
    settle(&h.engine, &h.paths, 1).await;
    let outgoing = outgoing_files(&h.paths);
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].1.message, "recovered");
    assert!(store.get(ThreadId(3)).unwrap().session_id.is_some());
    assert_eq!(std::fs::read_dir(h.paths.incoming_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn repeated_failure_dead_letters_after_three_attempts() {
    let h = harness(MockRuntime::flaky("never", 99));
    h.queue
        .publish_incoming(&user_envelope(4, "m6", "doomed"))
        .unwrap();

    for _ in 0..3 {
        Arc::clone(&h.engine).scan().await;
        for _ in 0..250 {
            if h.engine.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    assert_eq!(std::fs::read_dir(h.paths.incoming_dir()).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(h.paths.processing_dir()).unwrap().count(), 0);
    let dead: Vec<_> = std::fs::read_dir(h.paths.dead_letter_dir())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].ends_with("_tg_m6_retry2.json"));
    // dead-letter is silent: no outgoing envelope
    assert_eq!(std::fs::read_dir(h.paths.outgoing_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn heartbeat_storm_yields_to_the_user_message() {
    let h = harness(MockRuntime::slow("HEARTBEAT_OK", 250));
    // older heartbeats first, newest file is the user message
    h.queue
        .publish_incoming(&heartbeat_envelope(2, "hb-a"))
        .unwrap();
    h.queue
        .publish_incoming(&heartbeat_envelope(3, "hb-b"))
        .unwrap();
    h.queue
        .publish_incoming(&heartbeat_envelope(4, "hb-c"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.queue
        .publish_incoming(&user_envelope(7, "u1", "real work please"))
        .unwrap();

    Arc::clone(&h.engine).scan().await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    // strict priority claimed the user message plus at most one heartbeat
    assert_eq!(h.engine.in_flight(), 2);
    let waiting: Vec<_> = std::fs::read_dir(h.paths.incoming_dir())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(waiting.len(), 2);
    assert!(waiting.iter().all(|n| n.starts_with("heartbeat_")));

    settle(&h.engine, &h.paths, 4).await;
    assert_eq!(outgoing_files(&h.paths).len(), 4);
}

#[tokio::test]
async fn per_thread_dispatch_is_serial() {
    let h = harness(MockRuntime::slow("ok", 200));
    h.queue
        .publish_incoming(&user_envelope(7, "m1", "first"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.queue
        .publish_incoming(&user_envelope(7, "m2", "second"))
        .unwrap();

    Arc::clone(&h.engine).scan().await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    // only one in flight for the thread, the other still queued
    assert_eq!(h.engine.in_flight(), 1);
    assert_eq!(std::fs::read_dir(h.paths.incoming_dir()).unwrap().count(), 1);

    settle(&h.engine, &h.paths, 2).await;
    assert_eq!(outgoing_files(&h.paths).len(), 2);
}

#[tokio::test]
async fn malformed_envelope_goes_straight_to_dead_letter() {
    let h = harness(MockRuntime::replying("unused"));
    std::fs::write(
        h.paths.incoming_dir().join("tg_bad.json"),
        r#"{"channel":"tg","source":"user"}"#,
    )
    .unwrap();

    Arc::clone(&h.engine).scan().await;
    for _ in 0..250 {
        if h.engine.in_flight() == 0
            && std::fs::read_dir(h.paths.dead_letter_dir()).unwrap().count() == 1
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(std::fs::read_dir(h.paths.dead_letter_dir()).unwrap().count(), 1);
    assert_eq!(std::fs::read_dir(h.paths.incoming_dir()).unwrap().count(), 0);
    // schema violations bypass the retry budget entirely
    assert_eq!(std::fs::read_dir(h.paths.outgoing_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn commands_apply_before_messages_and_are_consumed() {
    let h = harness(MockRuntime::replying("ok"));
    let store = ThreadStore::new(&h.paths);
    store.ensure_thread(ThreadId(9), None).unwrap();
    store.set_session(ThreadId(9), Some("sess-9".into())).unwrap();

    std::fs::write(
        h.paths.commands_dir().join("reset9.json"),
        r#"{"command":"reset","threadId":9,"timestamp":5}"#,
    )
    .unwrap();
    std::fs::write(
        h.paths.commands_dir().join("setdir9.json"),
        r#"{"command":"setdir","threadId":9,"args":{"dir":"/srv/nine"},"timestamp":6}"#,
    )
    .unwrap();

    Arc::clone(&h.engine).scan().await;

    let thread = store.get(ThreadId(9)).unwrap();
    assert!(thread.session_id.is_none());
    assert_eq!(thread.cwd, std::path::PathBuf::from("/srv/nine"));
    assert_eq!(std::fs::read_dir(h.paths.commands_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn startup_recovery_reprocesses_stranded_files() {
    let h = harness(MockRuntime::replying("after crash"));
    // simulate a crash: a fully-formed envelope stranded in processing/
    let envelope = user_envelope(7, "m9", "was mid-flight");
    std::fs::write(
        h.paths.processing_dir().join("tg_m9.json"),
        serde_json::to_string(&envelope).unwrap(),
    )
    .unwrap();

    recover_processing(&h.paths);
    assert!(h.paths.incoming_dir().join("tg_m9.json").exists());

    Arc::clone(&h.engine).scan().await;
    settle(&h.engine, &h.paths, 1).await;
    let outgoing = outgoing_files(&h.paths);
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].1.message_id, "m9");
}

#[tokio::test]
async fn heartbeat_response_uses_bare_filename_and_ok_token() {
    let h = harness(MockRuntime::replying(""));
    h.queue
        .publish_incoming(&heartbeat_envelope(2, "hb-7"))
        .unwrap();

    Arc::clone(&h.engine).scan().await;
    settle(&h.engine, &h.paths, 1).await;

    let outgoing = outgoing_files(&h.paths);
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].0, "hb-7.json");
    assert_eq!(outgoing[0].1.message, "HEARTBEAT_OK");
    // heartbeats never create a session
    let store = ThreadStore::new(&h.paths);
    assert!(store.get(ThreadId(2)).unwrap().session_id.is_none());
}
