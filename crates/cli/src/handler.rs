//! Agent handler that runs a local command per request.
//!
//! The prompt is appended as the last argument. Each non-empty stdout line becomes a
//! status event. Exit status 0 ends the run with `done`; anything else ends it with
//! the last stderr line as the error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use agent_relay_protocol::{ABORTED_MARKER, HandlerEvent};
use agent_relay_runtime::{AgentHandler, HandlerStream, RunOptions};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::config::HandlerSpec;

const EVENT_BUFFER: usize = 1024;

struct Run {
	attempt: u64,
	kill: Option<oneshot::Sender<()>>,
	events: broadcast::Sender<HandlerEvent>,
}

type Runs = Arc<Mutex<HashMap<String, Run>>>;

#[derive(Clone)]
pub struct CommandHandler {
	agent_id: String,
	command: String,
	args: Vec<String>,
	cwd: Option<PathBuf>,
	runs: Runs,
	next_attempt: Arc<AtomicU64>,
}

impl CommandHandler {
	pub fn new(agent_id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
		Self {
			agent_id: agent_id.into(),
			command: command.into(),
			args,
			cwd: None,
			runs: Arc::default(),
			next_attempt: Arc::default(),
		}
	}

	/// Working directory used when a request does not carry its own.
	pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
		self.cwd = Some(cwd.into());
		self
	}

	fn spawn_child(&self, prompt: &str, options: &RunOptions) -> std::io::Result<Child> {
		let mut cmd = Command::new(&self.command);
		cmd.args(&self.args).arg(prompt).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

		if let Some(cwd) = options.cwd.as_deref().map(PathBuf::from).or_else(|| self.cwd.clone()) {
			cmd.current_dir(cwd);
		}
		cmd.spawn()
	}
}

impl From<&HandlerSpec> for CommandHandler {
	fn from(spec: &HandlerSpec) -> Self {
		let handler = CommandHandler::new(&spec.agent_id, &spec.command, spec.args.clone());
		match &spec.cwd {
			Some(cwd) => handler.with_cwd(cwd),
			None => handler,
		}
	}
}

#[async_trait]
impl AgentHandler for CommandHandler {
	fn agent_id(&self) -> &str {
		&self.agent_id
	}

	fn run(&self, prompt: String, options: RunOptions) -> HandlerStream {
		let session_id = options.session_id.clone();

		let child = match self.spawn_child(&prompt, &options) {
			Ok(child) => child,
			Err(err) => {
				let message = if err.kind() == std::io::ErrorKind::NotFound {
					format!("command not found: {}", self.command)
				} else {
					format!("failed to start {}: {err}", self.command)
				};
				warn!(target = "agent_relay.handler", agent = %self.agent_id, session = %session_id, error = %err, "spawn failed");
				return futures::stream::iter([HandlerEvent::error(message)]).boxed();
			}
		};

		info!(target = "agent_relay.handler", agent = %self.agent_id, session = %session_id, pid = child.id(), "started {}", self.command);

		let (events, rx) = broadcast::channel(EVENT_BUFFER);
		let (kill_tx, kill_rx) = oneshot::channel();
		let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);

		let previous = self.runs.lock().insert(
			session_id.clone(),
			Run {
				attempt,
				kill: Some(kill_tx),
				events: events.clone(),
			},
		);
		if let Some(kill) = previous.and_then(|mut run| run.kill.take()) {
			let _ = kill.send(());
		}

		let runs = Arc::clone(&self.runs);
		let command = self.command.clone();
		tokio::spawn(async move {
			let terminal = drive(child, &command, &events, kill_rx).await;
			{
				let mut runs = runs.lock();
				if runs.get(&session_id).is_some_and(|run| run.attempt == attempt) {
					runs.remove(&session_id);
				}
			}
			debug!(target = "agent_relay.handler", session = %session_id, ?terminal, "run finished");
			let _ = events.send(terminal);
		});

		subscribe(rx)
	}

	async fn abort(&self, session_id: &str) {
		let kill = self.runs.lock().get_mut(session_id).and_then(|run| run.kill.take());
		if let Some(kill) = kill {
			info!(target = "agent_relay.handler", agent = %self.agent_id, session = %session_id, "killing run");
			let _ = kill.send(());
		}
	}

	async fn resume(&self, session_id: &str) -> Option<HandlerStream> {
		let rx = self.runs.lock().get(session_id).map(|run| run.events.subscribe())?;
		Some(subscribe(rx))
	}
}

fn subscribe(rx: broadcast::Receiver<HandlerEvent>) -> HandlerStream {
	BroadcastStream::new(rx).filter_map(|event| futures::future::ready(event.ok())).boxed()
}

/// Forwards stdout lines until the child exits or is killed; returns the terminal event.
async fn drive(mut child: Child, command: &str, events: &broadcast::Sender<HandlerEvent>, kill_rx: oneshot::Receiver<()>) -> HandlerEvent {
	// A dropped sender means nobody can abort this run anymore.
	let killed = async move {
		if kill_rx.await.is_err() {
			std::future::pending::<()>().await;
		}
	};
	tokio::pin!(killed);

	let stderr_task = child.stderr.take().map(|stderr| {
		tokio::spawn(async move {
			let mut lines = BufReader::new(stderr).lines();
			let mut last = None;
			while let Ok(Some(line)) = lines.next_line().await {
				if !line.trim().is_empty() {
					last = Some(line.trim().to_string());
				}
			}
			last
		})
	});

	if let Some(stdout) = child.stdout.take() {
		let mut lines = BufReader::new(stdout).lines();
		loop {
			tokio::select! {
				_ = &mut killed => return kill(&mut child).await,
				line = lines.next_line() => match line {
					Ok(Some(line)) => {
						let line = line.trim_end();
						if !line.is_empty() {
							let _ = events.send(HandlerEvent::status(line));
						}
					}
					Ok(None) => break,
					Err(err) => {
						warn!(target = "agent_relay.handler", error = %err, "failed reading stdout");
						break;
					}
				},
			}
		}
	}

	let status = tokio::select! {
		_ = &mut killed => return kill(&mut child).await,
		status = child.wait() => status,
	};

	let last_stderr = match stderr_task {
		Some(task) => task.await.ok().flatten(),
		None => None,
	};

	match status {
		Ok(status) if status.success() => HandlerEvent::done(""),
		Ok(status) => HandlerEvent::error(last_stderr.unwrap_or_else(|| exit_message(command, status))),
		Err(err) => HandlerEvent::error(format!("failed waiting for {command}: {err}")),
	}
}

async fn kill(child: &mut Child) -> HandlerEvent {
	if let Err(err) = child.kill().await {
		warn!(target = "agent_relay.handler", error = %err, "failed to kill child");
	}
	HandlerEvent::error(ABORTED_MARKER)
}

fn exit_message(command: &str, status: ExitStatus) -> String {
	match status.code() {
		Some(code) => format!("{command} exited with code {code}"),
		None => format!("{command} was terminated by a signal"),
	}
}
