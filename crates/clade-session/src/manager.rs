// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use clade_cli_runner::{CliError, CliRunInput, CliRunner, CliRunnerConfig};
use clade_config::BrowserConfig;
use clade_core::{Session, SessionKey};
use clade_reflection::{ReflectionDriver, TurnRunner, TurnRunnerError};
use clade_registry::{Registry, RegistryError};
use clade_store::{Store, StoreError};
use clade_toolcfg::{self, BuildManifestInput, ToolCfgError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("agent {0:?} is not registered")]
    AgentNotFound(String),
    #[error("session {0:?} not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    ToolCfg(#[from] ToolCfgError),
    #[error(transparent)]
    Cli(#[from] CliError),
}

impl From<SessionError> for clade_core::OrchestrationError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::AgentNotFound(m) => clade_core::OrchestrationError::NotFound(m),
            SessionError::SessionNotFound(m) => clade_core::OrchestrationError::NotFound(m),
            SessionError::Registry(e) => match e {
                RegistryError::NotFound(m) => clade_core::OrchestrationError::NotFound(m),
                other => clade_core::OrchestrationError::Store(other.to_string()),
            },
            SessionError::Store(e) => e.into(),
            SessionError::ToolCfg(e) => clade_core::OrchestrationError::Cli(e.to_string()),
            SessionError::Cli(e) => clade_core::OrchestrationError::Cli(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageOutput {
    pub text: String,
    pub session_id: String,
    pub duration_ms: u64,
}

/// Everything the manager needs besides the components it's handed
/// (Store/Registry/ReflectionDriver) — the bits that come from the root
/// `Config` and the host binary's own location (§4.6: servers re-invoke the
/// host binary; §6: the IPC socket path is published read-only).
pub struct SessionManagerConfig {
    pub host_exe: PathBuf,
    pub home_dir: PathBuf,
    pub ipc_socket_path: PathBuf,
    pub browser: Option<BrowserConfig>,
    pub cli: CliRunnerConfig,
}

/// Orchestrates C2–C6 per turn, serialized per session key (§5). Intended to
/// be shared via `Arc` — `send_message`/`resume_session` take `&Arc<Self>`
/// so the post-turn reflection fire-and-forget can hold its own clone.
pub struct SessionManager {
    store: Arc<Store>,
    registry: Arc<Registry>,
    reflection: Arc<ReflectionDriver>,
    host_exe: PathBuf,
    home_dir: PathBuf,
    ipc_socket_path: PathBuf,
    browser: Option<BrowserConfig>,
    cli_config: CliRunnerConfig,
    queues: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        reflection: Arc<ReflectionDriver>,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            reflection,
            host_exe: config.host_exe,
            home_dir: config.home_dir,
            ipc_socket_path: config.ipc_socket_path,
            browser: config.browser,
            cli_config: config.cli,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// A bare `CliRunner` sharing this manager's configuration, for one-off
    /// uses outside the turn pipeline (e.g. the capability probe at startup).
    pub fn create_runner(&self) -> CliRunner {
        CliRunner::new(self.cli_config.clone())
    }

    /// §4.7 `sendMessage`. Resolves (or starts) the session for the tuple
    /// and runs one turn against it.
    pub async fn send_message(
        self: &Arc<Self>,
        agent_id: &str,
        prompt: &str,
        channel: Option<&str>,
        user_id: Option<&str>,
        chat_id: Option<&str>,
    ) -> Result<SendMessageOutput, SessionError> {
        let key = SessionKey::derive(agent_id, channel, user_id, chat_id);
        let lock = self.queue_for(key.as_str());
        let _guard = lock.lock().await;

        let existing = if channel.is_some() && user_id.is_some() {
            self.store
                .find_active_session(agent_id, channel, user_id, chat_id)
                .await?
        } else {
            self.store.find_any_active_session(agent_id).await?
        };

        let result = self
            .run_turn(agent_id, prompt, channel, user_id, chat_id, existing)
            .await;
        self.release_queue(key.as_str(), lock);
        result
    }

    /// §4.7 `resumeSession`. Same pipeline, but the session is looked up by
    /// id directly rather than by tuple.
    pub async fn resume_session(
        self: &Arc<Self>,
        session_id: &str,
        prompt: &str,
    ) -> Result<SendMessageOutput, SessionError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        let key = SessionKey::derive(
            &session.agent_id,
            session.channel.as_deref(),
            session.channel_user_id.as_deref(),
            session.chat_id.as_deref(),
        );
        let lock = self.queue_for(key.as_str());
        let _guard = lock.lock().await;

        let agent_id = session.agent_id.clone();
        let channel = session.channel.clone();
        let user_id = session.channel_user_id.clone();
        let chat_id = session.chat_id.clone();
        let result = self
            .run_turn(
                &agent_id,
                prompt,
                channel.as_deref(),
                user_id.as_deref(),
                chat_id.as_deref(),
                Some(session),
            )
            .await;
        self.release_queue(key.as_str(), lock);
        result
    }

    /// Steps 3–9 of §4.7: resolve agent, build prompt/manifest, run the CLI,
    /// persist, and fire reflection. Must be called with the session-key
    /// lock already held.
    async fn run_turn(
        self: &Arc<Self>,
        agent_id: &str,
        prompt: &str,
        channel: Option<&str>,
        user_id: Option<&str>,
        chat_id: Option<&str>,
        existing: Option<Session>,
    ) -> Result<SendMessageOutput, SessionError> {
        let bundle = self
            .registry
            .try_get(agent_id)
            .ok_or_else(|| SessionError::AgentNotFound(agent_id.to_string()))?;

        let soul = self.registry.read_soul(agent_id)?;
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let system_prompt = clade_prompt::assemble(&soul, &bundle, &today);

        let manifest_input = BuildManifestInput {
            agent_id,
            preset: bundle.config.preset,
            custom_tools: &bundle.config.custom_tools,
            skills: &bundle.config.skills,
            admin_enabled: bundle.config.admin.enabled,
            browser: self.browser.as_ref(),
            host_exe: &self.host_exe,
            home_dir: &self.home_dir,
            ipc_socket_path: &self.ipc_socket_path,
        };
        let manifest = clade_toolcfg::build_manifest(&manifest_input);
        let allowed_tools = clade_toolcfg::resolved_allowed_tools(&manifest_input, &manifest);
        let manifest_handle = clade_toolcfg::write_manifest(&manifest)?;

        let input = CliRunInput {
            prompt: prompt.to_string(),
            resume_session_id: existing.as_ref().map(|s| s.id.clone()),
            system_prompt_inline: Some(system_prompt),
            system_prompt_file: None,
            tool_manifest_path: Some(manifest_handle.path().display().to_string()),
            allowed_tools,
            max_turns: Some(bundle.config.max_turns),
            model: Some(bundle.config.model.clone()),
        };

        let runner = CliRunner::new(self.cli_config.clone());
        let output = runner.run(input).await?;
        drop(manifest_handle);

        let session_id = match &existing {
            Some(session) => {
                self.store.touch_session(&session.id).await?;
                session.id.clone()
            }
            None => {
                let id = output.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let session = Session::new(
                    id.clone(),
                    agent_id,
                    channel.map(str::to_string),
                    user_id.map(str::to_string),
                    chat_id.map(str::to_string),
                );
                self.store.create_session(session).await?;
                id
            }
        };

        let manager = Arc::clone(self);
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            manager.reflection.on_turn_complete(&agent_id, manager.as_ref()).await;
        });

        Ok(SendMessageOutput {
            text: output.text,
            session_id,
            duration_ms: output.duration_ms,
        })
    }

    fn queue_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut queues = self.queues.lock().expect("session queue lock poisoned");
        queues
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drops the map entry once nobody else is waiting on it, so the queue
    /// map doesn't grow without bound across the lifetime of a long-running
    /// host (§5 "full parallelism across keys" implies keys come and go).
    fn release_queue(&self, key: &str, lock: Arc<AsyncMutex<()>>) {
        let mut queues = self.queues.lock().expect("session queue lock poisoned");
        if Arc::strong_count(&lock) <= 2 {
            queues.remove(key);
        }
        debug!(key, "released session queue slot");
    }
}

#[async_trait]
impl TurnRunner for SessionManager {
    /// The Reflection Driver's meta-invocation: a bare turn with no resume,
    /// no tool manifest, and no system prompt beyond the instruction itself.
    async fn run_meta_turn(&self, agent_id: &str, instruction: &str) -> Result<String, TurnRunnerError> {
        let runner = CliRunner::new(self.cli_config.clone());
        let input = CliRunInput {
            prompt: instruction.to_string(),
            ..Default::default()
        };
        runner
            .run(input)
            .await
            .map(|output| output.text)
            .map_err(|err| {
                warn!(agent = agent_id, error = %err, "reflection meta-turn failed");
                TurnRunnerError(err.to_string())
            })
    }
}
