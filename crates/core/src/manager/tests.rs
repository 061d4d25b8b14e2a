use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::stream;
use tokio::sync::mpsc;

use super::*;
use crate::callbacks::SessionCallback;
use crate::storage::MemoryStorage;
use crate::store::{SESSION_INDEX_KEY, session_key};

type Item = Result<String, StreamError>;

struct Run {
	session_id: String,
	context: Option<AgentContext>,
	tx: Option<mpsc::UnboundedSender<Item>>,
}

/// Provider whose streams are driven by the test.
#[derive(Default)]
struct Scripted {
	runs: Mutex<Vec<Run>>,
	calls: Mutex<Vec<String>>,
	resumable: bool,
	completion: Option<String>,
}

impl Scripted {
	fn channel_stream(&self, session_id: &str, context: Option<AgentContext>) -> StatusStream {
		let (tx, rx) = mpsc::unbounded_channel();
		self.runs.lock().push(Run {
			session_id: session_id.to_string(),
			context,
			tx: Some(tx),
		});
		stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
	}

	fn status(&self, run: usize, text: &str) {
		if let Some(tx) = &self.runs.lock()[run].tx {
			let _ = tx.send(Ok(text.to_string()));
		}
	}

	fn fail(&self, run: usize, err: StreamError) {
		if let Some(tx) = self.runs.lock()[run].tx.take() {
			let _ = tx.send(Err(err));
		}
	}

	fn finish(&self, run: usize) {
		self.runs.lock()[run].tx.take();
	}

	fn run_count(&self) -> usize {
		self.runs.lock().len()
	}

	fn calls(&self) -> Vec<String> {
		self.calls.lock().clone()
	}
}

impl AgentProvider for Scripted {
	fn agent_id(&self) -> &str {
		"claude"
	}

	fn run(&self, context: AgentContext, session_id: &str, _cancel: CancellationToken) -> StatusStream {
		self.channel_stream(session_id, Some(context))
	}

	fn resume(&self, session_id: &str, _cancel: CancellationToken) -> Option<StatusStream> {
		self.calls.lock().push(format!("resume:{session_id}"));
		self.resumable.then(|| self.channel_stream(session_id, None))
	}

	fn supports_resume(&self) -> bool {
		self.resumable
	}

	fn abort(&self, session_id: &str) {
		self.calls.lock().push(format!("abort:{session_id}"));
	}

	fn undo(&self, session_id: &str) {
		self.calls.lock().push(format!("undo:{session_id}"));
	}

	fn redo(&self, session_id: &str) {
		self.calls.lock().push(format!("redo:{session_id}"));
	}

	fn completion_message(&self) -> Option<String> {
		self.completion.clone()
	}
}

/// Elements are numbers; element `n` sits at `x = n * 100` and has tag `tags[n]`.
#[derive(Default)]
struct Page {
	detached: Mutex<HashSet<u32>>,
	at_point: Mutex<Option<u32>>,
	tags: HashMap<u32, &'static str>,
}

impl ElementLocator for Page {
	type Element = u32;

	fn is_connected(&self, element: &u32) -> bool {
		!self.detached.lock().contains(element)
	}

	fn bounds(&self, element: &u32) -> Rect {
		Rect::new(f64::from(*element) * 100.0, 0.0, 50.0, 20.0)
	}

	fn tag_name(&self, element: &u32) -> Option<String> {
		self.tags.get(element).map(|t| t.to_string())
	}

	fn component_name(&self, element: &u32) -> Option<String> {
		Some(format!("Component{element}"))
	}

	fn element_at(&self, _point: Position) -> Option<u32> {
		*self.at_point.lock()
	}
}

#[derive(Default)]
struct Counts {
	start: AtomicUsize,
	status: AtomicUsize,
	complete: AtomicUsize,
	error: AtomicUsize,
	resume: AtomicUsize,
	abort: AtomicUsize,
	undo: AtomicUsize,
	dismiss: AtomicUsize,
}

fn counting(counts: &Arc<Counts>) -> ManagerCallbacks {
	fn hook(counts: &Arc<Counts>, pick: fn(&Counts) -> &AtomicUsize) -> Option<SessionCallback> {
		let counts = Arc::clone(counts);
		Some(Arc::new(move |_: &Session| {
			pick(&counts).fetch_add(1, Ordering::SeqCst);
		}))
	}
	ManagerCallbacks {
		on_start: hook(counts, |c| &c.start),
		on_status: hook(counts, |c| &c.status),
		on_complete: hook(counts, |c| &c.complete),
		on_error: hook(counts, |c| &c.error),
		on_resume: hook(counts, |c| &c.resume),
		on_abort: hook(counts, |c| &c.abort),
		on_undo: hook(counts, |c| &c.undo),
		on_dismiss: hook(counts, |c| &c.dismiss),
	}
}

struct Harness {
	manager: AgentManager<Page>,
	provider: Arc<Scripted>,
	page: Arc<Page>,
	storage: Arc<MemoryStorage>,
	counts: Arc<Counts>,
}

fn harness_with(provider: Scripted, page: Page, options: AgentManagerOptions) -> Harness {
	let provider = Arc::new(provider);
	let page = Arc::new(page);
	let storage = Arc::new(MemoryStorage::new());
	let counts = Arc::new(Counts::default());
	let manager = AgentManager::builder(provider.clone(), Arc::clone(&page))
		.options(options)
		.callbacks(counting(&counts))
		.storage(storage.clone())
		.build();
	Harness {
		manager,
		provider,
		page,
		storage,
		counts,
	}
}

fn harness() -> Harness {
	let page = Page {
		tags: HashMap::from([(1, "button"), (2, "div"), (3, "button")]),
		..Page::default()
	};
	harness_with(Scripted::default(), page, AgentManagerOptions::default())
}

fn request(element: u32) -> StartRequest<u32> {
	StartRequest {
		content: vec![format!("<el{element}>")],
		elements: vec![element],
		position: Position::new(10.0, 10.0),
		bounds: vec![Rect::new(f64::from(element) * 100.0, 0.0, 50.0, 20.0)],
		..StartRequest::new("rename button")
	}
}

async fn settle() {
	tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_creates_persisted_streaming_session() {
	let h = harness();
	let id = h.manager.start(request(1));

	let session = h.manager.session(&id).unwrap();
	assert!(session.is_streaming);
	assert_eq!(session.last_status, INITIAL_STATUS);
	assert_eq!(session.tag_name.as_deref(), Some("button"));
	assert_eq!(session.component_name.as_deref(), Some("Component1"));
	assert_eq!(session.context.content, vec!["<el1>".to_string()]);
	assert!(h.manager.is_processing());
	assert_eq!(h.manager.elements(&id), vec![1]);
	assert_eq!(h.counts.start.load(Ordering::SeqCst), 1);

	assert!(h.storage.get(&session_key(&id)).unwrap().is_some());
	assert_eq!(h.storage.get(SESSION_INDEX_KEY).unwrap(), Some(format!("[\"{id}\"]")));
	assert_eq!(h.provider.runs.lock()[0].context.as_ref().unwrap().session_id.as_deref(), Some(id.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_statuses_then_done_completes_session() {
	let h = harness();
	let id = h.manager.start(request(1));

	h.provider.status(0, "Reading Button.tsx");
	h.provider.status(0, "Editing Button.tsx");
	h.provider.finish(0);
	settle().await;

	let session = h.manager.session(&id).unwrap();
	assert!(!session.is_streaming);
	assert_eq!(session.last_status, "Editing Button.tsx");
	assert_eq!(session.error, None);
	assert!(!h.manager.is_processing());
	assert!(h.manager.can_undo());
	assert_eq!(h.counts.status.load(Ordering::SeqCst), 2);
	assert_eq!(h.counts.complete.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_completion_message_replaces_last_status() {
	let provider = Scripted {
		completion: Some("Completed".into()),
		..Scripted::default()
	};
	let h = harness_with(provider, Page::default(), AgentManagerOptions::default());
	let id = h.manager.start(StartRequest::new("p"));

	h.provider.status(0, "working");
	h.provider.finish(0);
	settle().await;

	assert_eq!(h.manager.session(&id).unwrap().last_status, "Completed");
}

#[tokio::test(start_paused = true)]
async fn test_superseded_stream_is_inert() {
	let h = harness();
	let id = h.manager.start(request(1));
	h.provider.status(0, "first attempt");
	settle().await;

	let follow_up = h.manager.start(StartRequest::follow_up(id.clone(), "now make it red"));
	assert_eq!(follow_up, id);
	assert_eq!(h.manager.sessions().len(), 1);

	// Interleave messages from both attempts.
	h.provider.status(1, "second attempt");
	h.provider.status(0, "stale");
	h.provider.finish(0);
	settle().await;

	let session = h.manager.session(&id).unwrap();
	assert_eq!(session.last_status, "second attempt");
	assert!(session.is_streaming);
	assert_eq!(session.context.prompt, "now make it red");
	assert_eq!(session.context.content, vec!["<el1>".to_string()]);
	assert_eq!(h.counts.complete.load(Ordering::SeqCst), 0);
	assert_eq!(h.counts.abort.load(Ordering::SeqCst), 0);

	h.provider.finish(1);
	settle().await;
	assert!(!h.manager.session(&id).unwrap().is_streaming);
	assert_eq!(h.counts.complete.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_removes_session_without_error() {
	let h = harness();
	let id = h.manager.start(request(1));
	h.provider.status(0, "working");
	settle().await;

	h.manager.abort(&id);
	h.provider.status(0, "late");
	settle().await;

	assert!(h.manager.session(&id).is_none());
	assert!(!h.manager.is_processing());
	assert_eq!(h.provider.calls(), vec![format!("abort:{id}")]);
	assert_eq!(h.counts.abort.load(Ordering::SeqCst), 1);
	assert_eq!(h.counts.error.load(Ordering::SeqCst), 0);
	assert!(h.storage.get(&session_key(&id)).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_handler_side_abort_removes_session() {
	let h = harness();
	let id = h.manager.start(request(1));

	h.provider.fail(0, StreamError::Aborted);
	settle().await;

	assert!(h.manager.session(&id).is_none());
	assert_eq!(h.counts.abort.load(Ordering::SeqCst), 1);
	assert_eq!(h.counts.error.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_error_keeps_session_for_retry() {
	let h = harness();
	let id = h.manager.start(request(1));

	h.provider.fail(0, StreamError::Connection("socket closed".into()));
	settle().await;

	let session = h.manager.session(&id).unwrap();
	assert_eq!(session.state(), SessionState::Errored);
	assert_eq!(session.error.as_deref(), Some("relay connection lost: socket closed"));
	assert_eq!(h.counts.error.load(Ordering::SeqCst), 1);
	assert!(h.storage.get(&session_key(&id)).unwrap().unwrap().contains("socket closed"));

	assert!(h.manager.retry(&id));
	let session = h.manager.session(&id).unwrap();
	assert!(session.is_streaming);
	assert_eq!(session.error, None);
	assert_eq!(h.provider.run_count(), 2);
	assert_eq!(h.provider.runs.lock()[1].context.as_ref().unwrap().prompt, "rename button");

	assert!(!h.manager.retry(&id));
	assert!(!h.manager.retry("missing"));
}

#[tokio::test(start_paused = true)]
async fn test_fading_error_is_not_retried() {
	let h = harness();
	let id = h.manager.start(request(1));
	h.provider.fail(0, StreamError::Agent("exit status 1".into()));
	settle().await;

	assert_eq!(h.manager.acknowledge_error(&id).as_deref(), Some("rename button"));
	assert!(!h.manager.retry(&id));
	assert_eq!(h.provider.run_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dismiss_is_idempotent() {
	let h = harness();
	let id = h.manager.start(request(1));
	h.provider.finish(0);
	settle().await;

	h.manager.dismiss(&id);
	h.manager.dismiss(&id);
	assert_eq!(h.manager.session(&id).unwrap().state(), SessionState::Fading);
	assert_eq!(h.counts.dismiss.load(Ordering::SeqCst), 1);

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(h.manager.session(&id).is_some());

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(h.manager.session(&id).is_none());
	assert!(h.storage.get(&session_key(&id)).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_follow_up_during_fade_cancels_removal() {
	let h = harness();
	let id = h.manager.start(request(1));
	h.provider.finish(0);
	settle().await;

	h.manager.dismiss(&id);
	h.manager.start(StartRequest::follow_up(id.clone(), "one more thing"));
	tokio::time::sleep(Duration::from_millis(500)).await;

	let session = h.manager.session(&id).unwrap();
	assert!(session.is_streaming);
	assert!(!session.is_fading);
}

#[tokio::test(start_paused = true)]
async fn test_undo_redo_are_lifo() {
	let h = harness();
	let a = h.manager.start(request(1));
	h.provider.finish(0);
	let b = h.manager.start(request(2));
	h.provider.finish(1);
	settle().await;

	assert!(h.manager.undo());
	assert_eq!(h.provider.calls(), vec![format!("undo:{b}")]);
	assert!(h.manager.session(&b).unwrap().is_fading);
	assert_eq!(h.counts.undo.load(Ordering::SeqCst), 1);
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(h.manager.session(&b).is_none());

	assert!(h.manager.undo());
	assert!(!h.manager.undo());

	assert!(h.manager.redo());
	assert!(h.manager.redo());
	assert!(!h.manager.redo());

	assert_eq!(h.provider.calls(), vec![format!("undo:{b}"), format!("undo:{a}"), format!("redo:{a}"), format!("redo:{b}")]);
	let restored = h.manager.session(&b).unwrap();
	assert_eq!(restored.state(), SessionState::Completed);
	assert_eq!(restored.selection_bounds, vec![Rect::new(200.0, 0.0, 50.0, 20.0)]);
	assert_eq!(h.manager.elements(&b), vec![2]);
	assert!(h.manager.can_undo());
}

#[tokio::test(start_paused = true)]
async fn test_start_after_undo_clears_redo() {
	let h = harness();
	h.manager.start(request(1));
	h.provider.finish(0);
	settle().await;

	assert!(h.manager.undo());
	assert!(h.manager.can_redo());

	h.manager.start(request(2));
	assert!(!h.manager.can_redo());
	assert!(!h.manager.redo());
}

#[tokio::test(start_paused = true)]
async fn test_redo_reacquires_by_tag_at_center() {
	let h = harness();
	let id = h.manager.start(request(1));
	h.provider.finish(0);
	settle().await;
	assert!(h.manager.undo());
	tokio::time::sleep(Duration::from_millis(200)).await;

	h.page.detached.lock().insert(1);
	*h.page.at_point.lock() = Some(3);

	assert!(h.manager.redo());
	assert_eq!(h.manager.elements(&id), vec![3]);
	assert_eq!(h.manager.session(&id).unwrap().selection_bounds, vec![Rect::new(300.0, 0.0, 50.0, 20.0)]);
}

#[tokio::test(start_paused = true)]
async fn test_redo_without_reachable_element_is_not_restored() {
	let h = harness();
	let id = h.manager.start(request(1));
	h.provider.finish(0);
	settle().await;
	assert!(h.manager.undo());
	tokio::time::sleep(Duration::from_millis(200)).await;

	h.page.detached.lock().insert(1);
	*h.page.at_point.lock() = Some(2);

	assert!(h.manager.redo());
	assert!(h.provider.calls().contains(&format!("redo:{id}")));
	assert!(h.manager.session(&id).is_none());
	assert!(!h.manager.can_undo());
	assert!(!h.manager.can_redo());
}

#[tokio::test(start_paused = true)]
async fn test_transform_error_skips_provider() {
	let options = AgentManagerOptions {
		transform_content: Some(Arc::new(|_: Vec<String>| -> Result<Vec<String>, String> { Err("source map unavailable".to_string()) })),
		..AgentManagerOptions::default()
	};
	let h = harness_with(Scripted::default(), Page::default(), options);
	let id = h.manager.start(StartRequest::new("p"));

	assert_eq!(h.provider.run_count(), 0);
	let session = h.manager.session(&id).unwrap();
	assert_eq!(session.error.as_deref(), Some("source map unavailable"));
	assert!(!session.is_streaming);
	assert!(!h.manager.is_processing());
	assert_eq!(h.counts.error.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transform_and_agent_options_shape_request() {
	let options = AgentManagerOptions {
		transform_content: Some(Arc::new(|content: Vec<String>| -> Result<Vec<String>, String> { Ok(content.into_iter().map(|c| c.to_uppercase()).collect()) })),
		agent_options: Some(serde_json::json!({ "cwd": "/srv/app" })),
		..AgentManagerOptions::default()
	};
	let h = harness_with(Scripted::default(), Page::default(), options);
	let id = h.manager.start(request(1));

	let sent = h.provider.runs.lock()[0].context.clone().unwrap();
	assert_eq!(sent.content, vec!["<EL1>".to_string()]);
	assert_eq!(sent.cwd(), Some("/srv/app"));
	assert_eq!(h.manager.session(&id).unwrap().context.content, vec!["<el1>".to_string()]);
}

fn persisted(id: &str, streaming: bool, error: Option<&str>, age_ms: u64) -> Session {
	let now = now_ms();
	let mut s = Session::new(id, AgentContext::new("p", vec![]), Position::default(), now - age_ms);
	s.is_streaming = streaming;
	s.error = error.map(str::to_string);
	s.last_updated_at = now - age_ms;
	s.tag_name = Some("button".into());
	s.selection_bounds = vec![Rect::new(0.0, 0.0, 10.0, 10.0)];
	s
}

fn seed(storage: &MemoryStorage, sessions: &[Session]) {
	let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
	storage.set(SESSION_INDEX_KEY, &serde_json::to_string(&ids).unwrap()).unwrap();
	for s in sessions {
		storage.set(&session_key(&s.id), &serde_json::to_string(s).unwrap()).unwrap();
	}
}

#[tokio::test(start_paused = true)]
async fn test_try_resume_keeps_streaming_and_recent_errors() {
	let provider = Scripted {
		resumable: true,
		..Scripted::default()
	};
	let page = Page {
		at_point: Mutex::new(Some(3)),
		tags: HashMap::from([(3, "button")]),
		..Page::default()
	};
	let h = harness_with(provider, page, AgentManagerOptions::default());
	seed(
		&h.storage,
		&[
			persisted("running", true, None, 5_000),
			persisted("recent-error", false, Some("boom"), 10_000),
			persisted("old-error", false, Some("boom"), 120_000),
			persisted("done", false, None, 1_000),
		],
	);

	assert_eq!(h.manager.try_resume(), 2);

	let ids: Vec<String> = h.manager.sessions().into_iter().map(|s| s.id).collect();
	assert_eq!(ids, ["running", "recent-error"]);
	let resumed = h.manager.session("recent-error").unwrap();
	assert!(resumed.is_streaming);
	assert_eq!(resumed.error, None);
	assert_eq!(h.manager.elements("running"), vec![3]);
	assert_eq!(h.counts.resume.load(Ordering::SeqCst), 2);
	assert_eq!(h.provider.runs.lock()[1].session_id, "recent-error");
	assert!(h.storage.get(&session_key("old-error")).unwrap().is_none());
	assert!(h.storage.get(&session_key("done")).unwrap().is_none());

	h.provider.status(0, "still going");
	h.provider.finish(0);
	settle().await;
	let session = h.manager.session("running").unwrap();
	assert_eq!(session.last_status, "still going");
	assert!(!session.is_streaming);
}

#[tokio::test(start_paused = true)]
async fn test_try_resume_without_support_discards_everything() {
	let h = harness();
	seed(&h.storage, &[persisted("running", true, None, 0)]);

	assert_eq!(h.manager.try_resume(), 0);
	assert!(h.manager.sessions().is_empty());
	assert!(h.storage.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abort_all_resets_everything() {
	let h = harness();
	let done = h.manager.start(request(1));
	h.provider.finish(0);
	settle().await;
	let a = h.manager.start(request(2));
	let b = h.manager.start(request(3));
	h.manager.dismiss(&done);

	h.manager.abort_all();
	tokio::time::sleep(Duration::from_millis(500)).await;

	assert!(h.manager.sessions().is_empty());
	assert!(!h.manager.is_processing());
	assert!(!h.manager.can_undo());
	assert!(!h.manager.can_redo());
	assert!(h.storage.is_empty());

	let mut calls = h.provider.calls();
	calls.sort();
	let mut expected = vec![format!("abort:{a}"), format!("abort:{b}")];
	expected.sort();
	assert_eq!(calls, expected);
	assert_eq!(h.counts.abort.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledge_error_returns_prompt() {
	let h = harness();
	let id = h.manager.start(request(1));
	h.provider.fail(0, StreamError::Agent("exit status 1".into()));
	settle().await;

	assert_eq!(h.manager.acknowledge_error(&id).as_deref(), Some("rename button"));
	assert!(h.manager.session(&id).unwrap().is_fading);
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(h.manager.session(&id).is_none());
	assert_eq!(h.manager.acknowledge_error(&id), None);
}
