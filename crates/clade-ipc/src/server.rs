// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Unix-domain-socket side of §4.8: one task per accepted connection,
//! one JSON request read, one JSON reply written, socket closed.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use clade_config::BrowserConfig;
use clade_core::{Session, SessionStatus};
use clade_registry::Registry;
use clade_session::SessionManager;
use clade_store::{SessionFilter, Store};
use clade_toolcfg::BuildManifestInput;

use crate::wire::Request;

/// Caller-visible request deadline (§5: "the IPC client enforces 120 s").
/// Guarded server-side too so a stuck handler can't wedge a connection slot
/// forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest a single request line is allowed to be before it's rejected as
/// malformed, guarding against an unbounded read on a misbehaving client.
const MAX_REQUEST_BYTES: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("another IPC server is already listening on {0}")]
    AlreadyRunning(PathBuf),
    #[error("binding socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Owns the socket file for its entire lifetime: creates it (cleaning up a
/// stale one first), accepts connections, and removes it again on clean
/// shutdown (§4.8 "Transport note").
pub struct IpcServer {
    socket_path: PathBuf,
    store: Arc<Store>,
    registry: Arc<Registry>,
    sessions: Arc<SessionManager>,
    host_exe: PathBuf,
    home_dir: PathBuf,
    browser: Option<BrowserConfig>,
}

impl IpcServer {
    pub fn new(
        socket_path: PathBuf,
        store: Arc<Store>,
        registry: Arc<Registry>,
        sessions: Arc<SessionManager>,
        host_exe: PathBuf,
        home_dir: PathBuf,
        browser: Option<BrowserConfig>,
    ) -> Self {
        Self {
            socket_path,
            store,
            registry,
            sessions,
            host_exe,
            home_dir,
            browser,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and accepts connections, one spawned task each,
    /// until `shutdown` resolves. Removes the socket file before returning.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<(), IpcError> {
        let listener = bind_listener(&self.socket_path)?;
        info!(socket = %self.socket_path.display(), "IPC server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(err) = server.handle_connection(stream).await {
                                    warn!(error = %err, "IPC connection handling failed");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "IPC accept failed"),
                    }
                }
                _ = &mut shutdown => {
                    debug!("IPC server shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    async fn handle_connection(&self, stream: UnixStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        let reply = match tokio::time::timeout(
            REQUEST_TIMEOUT,
            read_one_line(&mut reader, &mut line),
        )
        .await
        {
            Ok(Ok(0)) => return Ok(()), // client disconnected without sending anything
            Ok(Ok(_)) => self.dispatch_line(&line).await,
            Ok(Err(err)) => serde_json::json!({"ok": false, "error": err}),
            Err(_) => serde_json::json!({"ok": false, "error": "request timed out"}),
        };

        let mut out = serde_json::to_vec(&reply).unwrap_or_else(|_| b"{\"ok\":false}".to_vec());
        out.push(b'\n');
        write_half.write_all(&out).await?;
        write_half.flush().await?;
        Ok(())
    }

    async fn dispatch_line(&self, line: &str) -> serde_json::Value {
        let request: Request = match serde_json::from_str(line.trim()) {
            Ok(req) => req,
            Err(err) => return serde_json::json!({"ok": false, "error": format!("unknown type or malformed request: {err}")}),
        };
        self.handle(request).await
    }

    async fn handle(&self, request: Request) -> serde_json::Value {
        match request {
            Request::SessionsList => self.sessions_list().await,
            Request::SessionsSpawn {
                agent_id,
                prompt,
                parent_session_id,
                calling_agent_id,
            } => {
                self.sessions_spawn(&agent_id, &prompt, parent_session_id, calling_agent_id)
                    .await
            }
            Request::SessionsSend { session_id, message } => {
                self.sessions_send(&session_id, &message).await
            }
            Request::SessionsStatus { session_id } => self.sessions_status(&session_id).await,
            Request::AgentsList => self.agents_list(),
            Request::TaskqueueSchedule {
                agent_id,
                session_id,
                prompt,
                description,
                delay_minutes,
            } => {
                self.taskqueue_schedule(agent_id, session_id, prompt, description, delay_minutes)
                    .await
            }
            Request::TaskqueueCancel { task_id, agent_id } => {
                self.taskqueue_cancel(&task_id, agent_id.as_deref()).await
            }
            Request::TaskqueueList { agent_id } => self.taskqueue_list(agent_id.as_deref()).await,
        }
    }

    async fn sessions_list(&self) -> serde_json::Value {
        match self
            .store
            .list_sessions(SessionFilter {
                agent_id: None,
                status: Some(SessionStatus::Active),
            })
            .await
        {
            Ok(sessions) => {
                serde_json::json!({"ok": true, "sessions": sessions.iter().map(session_json).collect::<Vec<_>>()})
            }
            Err(err) => err_reply(err.to_string()),
        }
    }

    async fn sessions_spawn(
        &self,
        agent_id: &str,
        prompt: &str,
        parent_session_id: Option<String>,
        calling_agent_id: Option<String>,
    ) -> serde_json::Value {
        if !self.registry.has(agent_id) {
            return err_reply(format!("agent {agent_id:?} is not registered"));
        }
        match self
            .sessions
            .send_message(
                agent_id,
                prompt,
                Some("ipc"),
                calling_agent_id.as_deref(),
                parent_session_id.as_deref(),
            )
            .await
        {
            Ok(out) => serde_json::json!({"ok": true, "sessionId": out.session_id, "response": out.text}),
            Err(err) => err_reply(err.to_string()),
        }
    }

    async fn sessions_send(&self, session_id: &str, message: &str) -> serde_json::Value {
        match self.sessions.resume_session(session_id, message).await {
            Ok(out) => serde_json::json!({"ok": true, "response": out.text}),
            Err(err) => err_reply(err.to_string()),
        }
    }

    async fn sessions_status(&self, session_id: &str) -> serde_json::Value {
        match self.store.get_session(session_id).await {
            Ok(Some(session)) => serde_json::json!({
                "ok": true,
                "status": status_str(session.status),
                "agentId": session.agent_id,
                "channel": session.channel,
                "createdAt": session.created_at.to_rfc3339(),
                "lastActive": session.last_active_at.to_rfc3339(),
            }),
            Ok(None) => err_reply(format!("session {session_id:?} not found")),
            Err(err) => err_reply(err.to_string()),
        }
    }

    fn agents_list(&self) -> serde_json::Value {
        let agents: Vec<serde_json::Value> = self
            .registry
            .list()
            .into_iter()
            .map(|bundle| {
                let manifest_input = BuildManifestInput {
                    agent_id: &bundle.id,
                    preset: bundle.config.preset,
                    custom_tools: &bundle.config.custom_tools,
                    skills: &bundle.config.skills,
                    admin_enabled: bundle.config.admin.enabled,
                    browser: self.browser.as_ref(),
                    host_exe: &self.host_exe,
                    home_dir: &self.home_dir,
                    ipc_socket_path: &self.socket_path,
                };
                let servers: Vec<String> = clade_toolcfg::build_manifest(&manifest_input)
                    .servers
                    .into_iter()
                    .map(|s| s.name)
                    .collect();
                serde_json::json!({
                    "id": bundle.id,
                    "name": bundle.config.name,
                    "description": bundle.config.description,
                    "preset": bundle.config.preset,
                    "servers": servers,
                })
            })
            .collect();
        serde_json::json!({"ok": true, "agents": agents})
    }

    async fn taskqueue_schedule(
        &self,
        agent_id: String,
        session_id: Option<String>,
        prompt: String,
        description: String,
        delay_minutes: f64,
    ) -> serde_json::Value {
        if !clade_core::validate_delay_minutes(delay_minutes) {
            return err_reply(format!(
                "delayMinutes {delay_minutes} is outside [{}, {}]",
                clade_core::MIN_DELAY_MINUTES,
                clade_core::MAX_DELAY_MINUTES
            ));
        }
        if !self.registry.has(&agent_id) {
            return err_reply(format!("agent {agent_id:?} is not registered"));
        }
        let execute_at = chrono::Utc::now() + chrono::Duration::seconds((delay_minutes * 60.0) as i64);
        match self
            .store
            .enqueue_task(agent_id, session_id, prompt, description, execute_at)
            .await
        {
            Ok(task) => serde_json::json!({
                "ok": true,
                "taskId": task.id,
                "executeAt": task.execute_at.to_rfc3339(),
            }),
            Err(err) => err_reply(err.to_string()),
        }
    }

    async fn taskqueue_cancel(&self, task_id: &str, agent_id: Option<&str>) -> serde_json::Value {
        let task = match self.store.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return err_reply(format!("task {task_id:?} not found")),
            Err(err) => return err_reply(err.to_string()),
        };
        if let Some(caller) = agent_id {
            if caller != task.agent_id {
                return err_reply("caller does not own this task".to_string());
            }
        }
        match self.store.cancel_task(task_id).await {
            Ok(true) => serde_json::json!({"ok": true}),
            Ok(false) => err_reply("task is not in a cancellable state".to_string()),
            Err(err) => err_reply(err.to_string()),
        }
    }

    async fn taskqueue_list(&self, agent_id: Option<&str>) -> serde_json::Value {
        match self.store.list_tasks_by_agent(agent_id).await {
            Ok(tasks) => {
                let tasks: Vec<serde_json::Value> = tasks
                    .into_iter()
                    .map(|t| {
                        serde_json::json!({
                            "id": t.id,
                            "agentId": t.agent_id,
                            "sessionId": t.session_id,
                            "prompt": t.prompt,
                            "description": t.description,
                            "executeAt": t.execute_at.to_rfc3339(),
                            "status": t.status,
                            "error": t.error,
                        })
                    })
                    .collect();
                serde_json::json!({"ok": true, "tasks": tasks})
            }
            Err(err) => err_reply(err.to_string()),
        }
    }
}

fn err_reply(error: String) -> serde_json::Value {
    serde_json::json!({"ok": false, "error": error})
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Idle => "idle",
        SessionStatus::Terminated => "terminated",
    }
}

fn session_json(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "id": session.id,
        "agentId": session.agent_id,
        "channel": session.channel,
        "channelUserId": session.channel_user_id,
        "chatId": session.chat_id,
        "status": status_str(session.status),
        "createdAt": session.created_at.to_rfc3339(),
        "lastActiveAt": session.last_active_at.to_rfc3339(),
    })
}

/// Reads up to [`MAX_REQUEST_BYTES`] of one line. Returns `Ok(0)` on a clean
/// EOF before any byte was read (a client that connected and closed).
async fn read_one_line<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut String,
) -> Result<usize, String> {
    let n = reader
        .read_line(buf)
        .await
        .map_err(|err| format!("reading request: {err}"))?;
    if buf.len() > MAX_REQUEST_BYTES {
        return Err("request too large".to_string());
    }
    Ok(n)
}

/// Binds `path`, treating an existing file as stale (no listener behind it)
/// rather than a fatal "address in use" (§4.8 "Transport note").
fn bind_listener(path: &Path) -> Result<UnixListener, IpcError> {
    if path.exists() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(IpcError::AlreadyRunning(path.to_path_buf()));
        }
        let _ = std::fs::remove_file(path);
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let listener = UnixListener::bind(path).map_err(|source| IpcError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(listener)
}
