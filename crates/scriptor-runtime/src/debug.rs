//! Debug sessions and the V8 inspector bridge.
//!
//! A [`DebugSession`] is created per request, only when the request carries
//! [`DebugOptions`]. The caller controls it through a [`DebugHandle`]
//! delivered over the channel in the options. With no controller attached
//! (or once the controller is dropped) every pause resumes immediately.
//!
//! # Bridge flow
//!
//! 1. Script is written to `<work_dir>/debug/<session id>.js`
//! 2. `node --inspect-brk=127.0.0.1:0 <script>` is spawned
//! 3. The `ws://` URL is read from the child's stderr
//! 4. Debugger is enabled, breakpoints set by URL regex, script released
//! 5. The initial break-on-start pause is resumed automatically
//! 6. Each later `Debugger.paused` moves the session to `Suspended` until
//!    the controller sends a command
//! 7. `Runtime.executionContextDestroyed` closes the socket so the child exits

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{Result, RuntimeError};
use crate::executor::ScriptOutput;
use crate::process::EnvironmentPatch;
use crate::resource::ScriptResource;

/// Debug options carried by a request.
#[derive(Clone, Default)]
pub struct DebugOptions {
    /// 1-based line numbers to break on.
    pub breakpoints: Vec<u32>,
    controller: Option<mpsc::UnboundedSender<DebugHandle>>,
}

impl DebugOptions {
    /// Options without a controller: breakpoints are set but never hold.
    pub fn new(breakpoints: Vec<u32>) -> Self {
        Self {
            breakpoints,
            controller: None,
        }
    }

    /// Options plus the receiver on which the session's handle arrives.
    pub fn with_controller(breakpoints: Vec<u32>) -> (Self, mpsc::UnboundedReceiver<DebugHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                breakpoints,
                controller: Some(tx),
            },
            rx,
        )
    }
}

impl fmt::Debug for DebugOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugOptions")
            .field("breakpoints", &self.breakpoints)
            .field("controller", &self.controller.is_some())
            .finish()
    }
}

/// Observable state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugState {
    Starting,
    Running,
    /// Paused at `line` (1-based). `pause` counts pauses from 1.
    Suspended { line: u32, pause: u32 },
    Terminated,
}

/// Commands a controller can send while the script is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCommand {
    Resume,
    StepOver,
    Terminate,
}

/// Runtime side of a debug session.
pub struct DebugSession {
    id: Uuid,
    breakpoints: Vec<u32>,
    state: watch::Sender<DebugState>,
    commands: mpsc::UnboundedReceiver<DebugCommand>,
}

impl DebugSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn breakpoints(&self) -> &[u32] {
        &self.breakpoints
    }

    pub fn state(&self) -> DebugState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: DebugState) {
        self.state.send_replace(state);
    }

    /// Next controller command; `None` once the controller is gone.
    pub(crate) async fn next_command(&mut self) -> Option<DebugCommand> {
        self.commands.recv().await
    }
}

impl fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSession")
            .field("id", &self.id)
            .field("breakpoints", &self.breakpoints)
            .field("state", &self.state())
            .finish()
    }
}

/// Controller side of a debug session.
pub struct DebugHandle {
    id: Uuid,
    state: watch::Receiver<DebugState>,
    commands: mpsc::UnboundedSender<DebugCommand>,
    last_pause: u32,
}

impl DebugHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> DebugState {
        *self.state.borrow()
    }

    pub fn resume(&self) -> Result<()> {
        self.send(DebugCommand::Resume)
    }

    pub fn step_over(&self) -> Result<()> {
        self.send(DebugCommand::StepOver)
    }

    pub fn terminate(&self) -> Result<()> {
        self.send(DebugCommand::Terminate)
    }

    fn send(&self, command: DebugCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RuntimeError::Debug(format!("session {} has ended", self.id)))
    }

    /// Wait for the next pause and return its line, or `None` once the
    /// session terminates.
    pub async fn wait_suspended(&mut self) -> Option<u32> {
        loop {
            let current = *self.state.borrow_and_update();
            match current {
                DebugState::Suspended { line, pause } if pause > self.last_pause => {
                    self.last_pause = pause;
                    return Some(line);
                }
                DebugState::Terminated => return None,
                _ => {}
            }
            if self.state.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Wait until the session has terminated.
    pub async fn wait_terminated(&mut self) {
        // An error means the sender is gone, which only happens after termination.
        let _ = self
            .state
            .wait_for(|s| matches!(s, DebugState::Terminated))
            .await;
    }
}

impl fmt::Debug for DebugHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Create a session for the request if it asked for debugging.
///
/// The handle goes to the request's controller channel when there is one.
pub fn attach(request: &RequestContext) -> Option<DebugSession> {
    let options = request.debug.as_ref()?;
    let id = Uuid::new_v4();
    let (state_tx, state_rx) = watch::channel(DebugState::Starting);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    if let Some(ref controller) = options.controller {
        let handle = DebugHandle {
            id,
            state: state_rx,
            commands: commands_tx,
            last_pause: 0,
        };
        if controller.send(handle).is_err() {
            debug!(session = %id, "Debug controller gone before attach");
        }
    }

    debug!(
        session = %id,
        path = %request.path,
        breakpoints = ?options.breakpoints,
        "Debug session attached"
    );
    Some(DebugSession {
        id,
        breakpoints: options.breakpoints.clone(),
        state: state_tx,
        commands: commands_rx,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Inspector protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Inspector events the bridge reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectorEvent {
    /// Execution paused; `line` is 0-based as reported by V8.
    Paused {
        reason: String,
        line: u32,
        hit_breakpoint: bool,
    },
    Resumed,
    ContextDestroyed,
    /// Reply to a command we sent.
    Response { id: u64, error: Option<String> },
    Other(String),
}

/// Extract the inspector URL from a line like
/// `Debugger listening on ws://127.0.0.1:9229/0f2c...`.
pub fn parse_inspector_url(line: &str) -> Option<String> {
    let start = line.find("ws://")?;
    let url = line[start..].split_whitespace().next()?;
    Some(url.to_string())
}

/// Decode one inspector message.
pub fn parse_event(text: &str) -> Option<InspectorEvent> {
    let value: Value = serde_json::from_str(text).ok()?;

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let error = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Some(InspectorEvent::Response { id, error });
    }

    let method = value.get("method")?.as_str()?;
    let event = match method {
        "Debugger.paused" => {
            let params = value.get("params")?;
            let line = params
                .get("callFrames")
                .and_then(|frames| frames.get(0))
                .and_then(|frame| frame.pointer("/location/lineNumber"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let hit_breakpoint = params
                .get("hitBreakpoints")
                .and_then(Value::as_array)
                .is_some_and(|hits| !hits.is_empty());
            InspectorEvent::Paused {
                reason: params
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                line: u32::try_from(line).unwrap_or(u32::MAX),
                hit_breakpoint,
            }
        }
        "Debugger.resumed" => InspectorEvent::Resumed,
        "Runtime.executionContextDestroyed" => InspectorEvent::ContextDestroyed,
        other => InspectorEvent::Other(other.to_string()),
    };
    Some(event)
}

/// URL regex matching a script by file name.
pub fn breakpoint_url_regex(file_name: &str) -> String {
    format!("{}$", regex::escape(file_name))
}

/// Node prints these around an inspector session; they are not script output.
fn is_inspector_banner(line: &str) -> bool {
    line.starts_with("Debugger listening on")
        || line.starts_with("For help, see")
        || line.starts_with("Debugger attached.")
        || line.starts_with("Waiting for the debugger to disconnect")
}

type InspectorSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct InspectorClient {
    sink: InspectorSink,
    next_id: u64,
}

impl InspectorClient {
    async fn call(&mut self, method: &str, params: Value) -> Result<u64> {
        self.next_id += 1;
        let id = self.next_id;
        let message = json!({ "id": id, "method": method, "params": params });
        self.sink
            .send(Message::Text(message.to_string().into()))
            .await
            .map_err(|e| RuntimeError::Debug(format!("{method}: {e}")))?;
        Ok(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one script under the inspector and drives a [`DebugSession`].
#[derive(Debug, Clone)]
pub struct InspectorBridge {
    argv: Vec<String>,
    work_dir: PathBuf,
    connect_timeout: Duration,
    run_timeout: Duration,
}

impl InspectorBridge {
    /// `argv` is the debug interpreter command; the script path is appended.
    pub fn new(argv: Vec<String>, work_dir: impl Into<PathBuf>, run_timeout: Duration) -> Self {
        Self {
            argv,
            work_dir: work_dir.into(),
            connect_timeout: Duration::from_secs(10),
            run_timeout,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Run `resource` under the session. The session is `Terminated` on return.
    pub async fn run(
        &self,
        mut session: DebugSession,
        resource: &ScriptResource,
        env: EnvironmentPatch,
    ) -> Result<ScriptOutput> {
        let dir = self.work_dir.join("debug");
        let script = dir.join(format!("{}.js", session.id()));

        let result = async {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| RuntimeError::Debug(format!("{}: {e}", dir.display())))?;
            tokio::fs::write(&script, &resource.content)
                .await
                .map_err(|e| RuntimeError::Debug(format!("{}: {e}", script.display())))?;
            self.drive(&mut session, &script, env).await
        }
        .await;

        session.set_state(DebugState::Terminated);
        let _ = tokio::fs::remove_file(&script).await;
        info!(
            session = %session.id(),
            path = %resource.path,
            ok = result.is_ok(),
            "Debug session ended"
        );
        result
    }

    async fn drive(
        &self,
        session: &mut DebugSession,
        script: &std::path::Path,
        env: EnvironmentPatch,
    ) -> Result<ScriptOutput> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(RuntimeError::Debug("empty debug command".to_string()));
        };

        let start = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        env.apply_to(&mut cmd);
        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Debug(format!("Failed to start '{program}': {e}")))?;

        let stdout_pipe = child.stdout.take();
        let mut stdout_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| RuntimeError::Debug("stderr not captured".to_string()))?;
        let mut stderr_lines = BufReader::new(stderr_pipe).lines();

        // The inspector announces its URL on stderr before running anything.
        let url = tokio::time::timeout(self.connect_timeout, async {
            while let Ok(Some(line)) = stderr_lines.next_line().await {
                if let Some(url) = parse_inspector_url(&line) {
                    return Some(url);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .ok_or_else(|| RuntimeError::Debug("inspector did not announce a URL".to_string()))?;

        let mut stderr_reader = tokio::spawn(async move {
            let mut out = String::new();
            while let Ok(Some(line)) = stderr_lines.next_line().await {
                if !is_inspector_banner(&line) {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
            out
        });

        debug!(session = %session.id(), url = %url, "Connecting to inspector");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RuntimeError::Debug(format!("inspector connect failed: {e}")))?;
        let (sink, mut stream) = ws.split();
        let mut client = InspectorClient { sink, next_id: 0 };

        client.call("Runtime.enable", json!({})).await?;
        client.call("Debugger.enable", json!({})).await?;
        let file_name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for &line in session.breakpoints() {
            client
                .call(
                    "Debugger.setBreakpointByUrl",
                    json!({
                        "lineNumber": line.saturating_sub(1),
                        "urlRegex": breakpoint_url_regex(&file_name),
                    }),
                )
                .await?;
        }
        client.call("Runtime.runIfWaitingForDebugger", json!({})).await?;
        session.set_state(DebugState::Running);

        let mut suspended = false;
        let mut controller_gone = false;
        let mut seen_first_pause = false;
        let mut pauses = 0u32;
        let mut terminated = false;
        let mut timed_out = false;
        // Time spent suspended at a breakpoint does not count against the run timeout.
        let mut deadline = tokio::time::Instant::now() + self.run_timeout;
        let mut suspended_since: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline), if !suspended => {
                    timed_out = true;
                    warn!(
                        session = %session.id(),
                        timeout = ?self.run_timeout,
                        "Debuggee exceeded run timeout"
                    );
                    if let Err(e) = child.start_kill() {
                        warn!(session = %session.id(), error = %e, "Failed to kill debuggee");
                    }
                    break;
                }
                command = session.next_command(), if suspended && !controller_gone => {
                    suspended = false;
                    if let Some(since) = suspended_since.take() {
                        deadline += since.elapsed();
                    }
                    match command {
                        Some(DebugCommand::Resume) => {
                            client.call("Debugger.resume", json!({})).await?;
                        }
                        Some(DebugCommand::StepOver) => {
                            client.call("Debugger.stepOver", json!({})).await?;
                        }
                        Some(DebugCommand::Terminate) => {
                            terminated = true;
                            if let Err(e) = child.start_kill() {
                                warn!(session = %session.id(), error = %e, "Kill failed");
                            }
                            break;
                        }
                        None => {
                            controller_gone = true;
                            client.call("Debugger.resume", json!({})).await?;
                        }
                    }
                    session.set_state(DebugState::Running);
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => match parse_event(&text) {
                        Some(InspectorEvent::Paused { reason, line, hit_breakpoint }) => {
                            let initial = !seen_first_pause && !hit_breakpoint;
                            seen_first_pause = true;
                            if initial || controller_gone {
                                debug!(session = %session.id(), reason = %reason, "Resuming pause");
                                client.call("Debugger.resume", json!({})).await?;
                                continue;
                            }
                            pauses += 1;
                            suspended = true;
                            suspended_since = Some(tokio::time::Instant::now());
                            let line = line + 1;
                            session.set_state(DebugState::Suspended { line, pause: pauses });
                            info!(session = %session.id(), line, reason = %reason, "Suspended");
                        }
                        Some(InspectorEvent::Resumed) => {
                            if !suspended {
                                session.set_state(DebugState::Running);
                            }
                        }
                        Some(InspectorEvent::ContextDestroyed) => {
                            let _ = client.sink.close().await;
                            break;
                        }
                        Some(InspectorEvent::Response { id, error: Some(error) }) => {
                            warn!(
                                session = %session.id(),
                                id,
                                error = %error,
                                "Inspector command failed"
                            );
                        }
                        _ => {}
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = client.sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session = %session.id(), error = %e, "Inspector connection error");
                        break;
                    }
                }
            }
        }

        if timed_out {
            let _ = child.kill().await;
            stdout_reader.abort();
            stderr_reader.abort();
            return Err(RuntimeError::ProcessTimeout(self.run_timeout));
        }

        let finished = tokio::time::timeout_at(deadline, async {
            let status = child.wait().await;
            let stdout = (&mut stdout_reader).await.unwrap_or_default();
            let stderr = (&mut stderr_reader).await.unwrap_or_default();
            (status, stdout, stderr)
        })
        .await;
        let (status, stdout, stderr) = match finished {
            Ok((Ok(status), stdout, stderr)) => (status, stdout, stderr),
            Ok((Err(e), _, _)) => return Err(RuntimeError::Debug(format!("wait failed: {e}"))),
            Err(_) => {
                let _ = child.kill().await;
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(RuntimeError::ProcessTimeout(self.run_timeout));
            }
        };

        if terminated {
            return Err(RuntimeError::Debug(format!(
                "session {} terminated by controller",
                session.id()
            )));
        }
        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            return Err(RuntimeError::execution(format!(
                "debuggee exited with code {exit_code}: {}",
                stderr.trim_end()
            )));
        }
        Ok(ScriptOutput {
            stdout,
            stderr,
            exit_code,
            elapsed: start.elapsed(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::program_available;
    use tempfile::TempDir;

    #[test]
    fn test_attach_requires_debug_options() {
        let request = RequestContext::new("js-debug", "/a.js");
        assert!(attach(&request).is_none());

        let request = request.with_debug(DebugOptions::new(vec![3, 7]));
        let session = attach(&request).unwrap();
        assert_eq!(session.breakpoints(), &[3, 7]);
        assert_eq!(session.state(), DebugState::Starting);
    }

    #[test]
    fn test_attach_delivers_handle() {
        let (options, mut handles) = DebugOptions::with_controller(vec![1]);
        let request = RequestContext::new("js-debug", "/a.js").with_debug(options);
        let session = attach(&request).unwrap();
        let handle = handles.try_recv().unwrap();
        assert_eq!(handle.id(), session.id());
        assert_eq!(handle.state(), DebugState::Starting);
    }

    #[tokio::test]
    async fn test_handle_commands_reach_session() {
        let (options, mut handles) = DebugOptions::with_controller(vec![]);
        let request = RequestContext::new("js-debug", "/a.js").with_debug(options);
        let mut session = attach(&request).unwrap();
        let handle = handles.recv().await.unwrap();

        handle.step_over().unwrap();
        handle.resume().unwrap();
        assert_eq!(session.next_command().await, Some(DebugCommand::StepOver));
        assert_eq!(session.next_command().await, Some(DebugCommand::Resume));

        drop(handle);
        assert_eq!(session.next_command().await, None);
    }

    #[tokio::test]
    async fn test_no_controller_means_no_commands() {
        let request =
            RequestContext::new("js-debug", "/a.js").with_debug(DebugOptions::new(vec![2]));
        let mut session = attach(&request).unwrap();
        assert_eq!(session.next_command().await, None);
    }

    #[tokio::test]
    async fn test_wait_suspended_reports_each_pause_once() {
        let (options, mut handles) = DebugOptions::with_controller(vec![]);
        let request = RequestContext::new("js-debug", "/a.js").with_debug(options);
        let session = attach(&request).unwrap();
        let mut handle = handles.recv().await.unwrap();

        session.set_state(DebugState::Suspended { line: 4, pause: 1 });
        assert_eq!(handle.wait_suspended().await, Some(4));

        // Same line again, new pause.
        session.set_state(DebugState::Suspended { line: 4, pause: 2 });
        assert_eq!(handle.wait_suspended().await, Some(4));

        session.set_state(DebugState::Terminated);
        assert_eq!(handle.wait_suspended().await, None);
        handle.wait_terminated().await;

        drop(session);
        assert!(handle.resume().is_err());
    }

    #[test]
    fn test_parse_inspector_url() {
        assert_eq!(
            parse_inspector_url(
                "Debugger listening on ws://127.0.0.1:40123/6b1f0a52-7e2a-4bd0-9c1e-0c5b8c1f2d3e"
            )
            .as_deref(),
            Some("ws://127.0.0.1:40123/6b1f0a52-7e2a-4bd0-9c1e-0c5b8c1f2d3e")
        );
        let help = "For help, see: https://nodejs.org/en/docs/inspector";
        assert_eq!(parse_inspector_url(help), None);
    }

    #[test]
    fn test_parse_paused_event() {
        let text = r#"{"method":"Debugger.paused","params":{"callFrames":[{"callFrameId":"1","location":{"scriptId":"42","lineNumber":4,"columnNumber":2}}],"reason":"other","hitBreakpoints":["1:4:0:x\\.js$"]}}"#;
        assert_eq!(
            parse_event(text),
            Some(InspectorEvent::Paused {
                reason: "other".to_string(),
                line: 4,
                hit_breakpoint: true,
            })
        );

        let start = r#"{"method":"Debugger.paused","params":{"callFrames":[{"location":{"lineNumber":0}}],"reason":"Break on start"}}"#;
        assert!(matches!(
            parse_event(start),
            Some(InspectorEvent::Paused { hit_breakpoint: false, line: 0, .. })
        ));
    }

    #[test]
    fn test_parse_other_events() {
        assert_eq!(
            parse_event(r#"{"method":"Debugger.resumed","params":{}}"#),
            Some(InspectorEvent::Resumed)
        );
        assert_eq!(
            parse_event(r#"{"method":"Runtime.executionContextDestroyed","params":{"executionContextId":1}}"#),
            Some(InspectorEvent::ContextDestroyed)
        );
        assert_eq!(
            parse_event(r#"{"id":3,"result":{}}"#),
            Some(InspectorEvent::Response { id: 3, error: None })
        );
        assert_eq!(
            parse_event(r#"{"id":4,"error":{"code":-32000,"message":"nope"}}"#),
            Some(InspectorEvent::Response {
                id: 4,
                error: Some("nope".to_string())
            })
        );
        assert_eq!(
            parse_event(r#"{"method":"Debugger.scriptParsed","params":{}}"#),
            Some(InspectorEvent::Other("Debugger.scriptParsed".to_string()))
        );
        assert_eq!(parse_event("not json"), None);
    }

    #[test]
    fn test_breakpoint_url_regex() {
        assert_eq!(breakpoint_url_regex("abc.js"), r"abc\.js$");
    }

    #[test]
    fn test_banner_lines() {
        assert!(is_inspector_banner("Debugger attached."));
        assert!(is_inspector_banner("Waiting for the debugger to disconnect..."));
        assert!(!is_inspector_banner("TypeError: x is not a function"));
    }

    #[tokio::test]
    #[ignore] // Needs node; run with --ignored
    async fn test_node_breakpoint_roundtrip() {
        if !program_available("node") {
            eprintln!("Skipping: node not available");
            return;
        }
        let dir = TempDir::new().unwrap();
        let bridge = InspectorBridge::new(
            vec!["node".into(), "--inspect-brk=127.0.0.1:0".into()],
            dir.path(),
            Duration::from_secs(30),
        );
        let (options, mut handles) = DebugOptions::with_controller(vec![2]);
        let request = RequestContext::new("js-debug", "/dbg.js").with_debug(options);
        let session = attach(&request).unwrap();
        let mut handle = handles.recv().await.unwrap();

        let resource = ScriptResource::new(
            "/dbg.js",
            b"let a = 1;\nlet b = a + 1;\nconsole.log('b=' + b);\n".to_vec(),
        );
        let run = tokio::spawn({
            let bridge = bridge.clone();
            async move {
                bridge
                    .run(session, &resource, EnvironmentPatch::default())
                    .await
            }
        });

        assert_eq!(handle.wait_suspended().await, Some(2));
        handle.resume().unwrap();
        let out = run.await.unwrap().unwrap();
        assert_eq!(out.stdout, "b=2\n");
        assert_eq!(handle.state(), DebugState::Terminated);
    }

    #[tokio::test]
    #[ignore] // Needs node; run with --ignored
    async fn test_runaway_script_without_controller_times_out() {
        if !program_available("node") {
            eprintln!("Skipping: node not available");
            return;
        }
        let dir = TempDir::new().unwrap();
        let bridge = InspectorBridge::new(
            vec!["node".into(), "--inspect-brk=127.0.0.1:0".into()],
            dir.path(),
            Duration::from_secs(2),
        );
        let request =
            RequestContext::new("js-debug", "/spin.js").with_debug(DebugOptions::new(vec![]));
        let session = attach(&request).unwrap();
        let resource = ScriptResource::new("/spin.js", b"while (true) {}\n".to_vec());

        let started = Instant::now();
        let err = bridge
            .run(session, &resource, EnvironmentPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ProcessTimeout(d) if d == Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(15));
    }
}
