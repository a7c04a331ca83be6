// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use clade_core::DeferredTask;
use clade_session::SessionManager;
use clade_store::Store;

#[derive(Debug, Clone, Copy)]
pub struct TaskQueueTickerConfig {
    /// Poll interval; default is 15s (`clade_config::TaskQueueConfig::tick_secs`).
    /// Responsiveness for a freshly scheduled task is bounded by this
    /// interval, not instant.
    pub tick: Duration,
    /// Upper bound on tasks running concurrently across all agents (§4.9
    /// "At most K tasks run concurrently"; `clade_config::TaskQueueConfig::max_concurrent`).
    pub max_concurrent: usize,
}

impl Default for TaskQueueTickerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(15),
            max_concurrent: 4,
        }
    }
}

/// §4.9's due-time ticker: claims `pending` rows whose `executeAt` has
/// passed and re-enters the Session Manager for each, bounded by a
/// semaphore so at most `max_concurrent` run at once. Surplus due tasks
/// simply wait in `pending` state for the next tick with a free permit —
/// there is no in-memory queue to overflow.
pub struct TaskQueueTicker {
    store: Arc<Store>,
    sessions: Arc<SessionManager>,
    config: TaskQueueTickerConfig,
    permits: Arc<Semaphore>,
}

impl TaskQueueTicker {
    pub fn new(store: Arc<Store>, sessions: Arc<SessionManager>, config: TaskQueueTickerConfig) -> Self {
        Self {
            store,
            sessions,
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
        }
    }

    /// Runs until `shutdown` resolves. Every background firing is spawned
    /// under this function's own task (joined implicitly by `shutdown`
    /// draining — callers that need a hard join should track the returned
    /// `JoinHandle` from wherever they spawn `run` itself).
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_secs = self.config.tick.as_secs(), "task queue ticker started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.clone().tick_once().await;
                }
                _ = &mut shutdown => {
                    debug!("task queue ticker shutting down");
                    break;
                }
            }
        }
    }

    /// One polling pass: fetch due tasks, claim each, spawn a bounded
    /// fire-and-forget turn per claimed task. Exposed separately from
    /// `run` so tests can drive exactly one pass deterministically.
    pub async fn tick_once(self: Arc<Self>) {
        let due = match self.store.list_due_tasks(Utc::now()).await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "listing due tasks failed");
                return;
            }
        };
        for task in due {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.fire_one(task).await;
            });
        }
    }

    async fn fire_one(self: Arc<Self>, task: DeferredTask) {
        // Acquire the permit *before* claiming the row (§5: surplus due
        // tasks "wait in the pending state (not in memory queues)"). A
        // task that finds every permit taken is left `pending` for the
        // next tick rather than transitioned to `running` and parked here
        // in memory — that would both desync the row from reality and
        // strand it in `running` forever if the host crashed first.
        let Ok(_permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            debug!(task = %task.id, "no free task queue permit this tick, leaving pending");
            return;
        };

        let claimed = match self.store.mark_task_running(&task.id).await {
            Ok(claimed) => claimed,
            Err(err) => {
                warn!(task = %task.id, error = %err, "claiming due task failed");
                return;
            }
        };
        if !claimed {
            // Another tick (or another host, in a future multi-host world)
            // already claimed this row between listDue and here.
            return;
        }

        let result = self
            .sessions
            .send_message(
                &task.agent_id,
                &task.prompt,
                Some("taskqueue"),
                Some(&task.agent_id),
                task.session_id.as_deref(),
            )
            .await;

        match result {
            Ok(output) => {
                if let Err(err) = self.store.mark_task_done(&task.id).await {
                    warn!(task = %task.id, error = %err, "marking task done failed");
                }
                debug!(task = %task.id, session = %output.session_id, "deferred task fired");
            }
            Err(err) => {
                if let Err(store_err) = self.store.mark_task_failed(&task.id, err.to_string()).await {
                    warn!(task = %task.id, error = %store_err, "marking task failed failed");
                }
                warn!(task = %task.id, error = %err, "deferred task turn failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clade_core::{AdminConfig, AgentConfig, HeartbeatConfig, ReflectionConfig, ToolPreset};
    use clade_registry::Registry;
    use clade_reflection::ReflectionDriver;
    use clade_session::SessionManagerConfig;
    use std::path::PathBuf;

    fn agent_config() -> AgentConfig {
        AgentConfig {
            name: "Jarvis".to_string(),
            description: String::new(),
            model: "claude-opus".to_string(),
            preset: ToolPreset::Coding,
            custom_tools: Vec::new(),
            skills: Vec::new(),
            heartbeat: HeartbeatConfig::default(),
            reflection: ReflectionConfig {
                enabled: false,
                interval: 1000,
            },
            max_turns: 50,
            admin: AdminConfig::default(),
        }
    }

    fn mock_cli_script(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("mockcli.sh");
        std::fs::write(
            &path,
            r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "mockcli 1.0.0"; exit 0; fi
if [ "$1" = "--help" ]; then
  echo "--output-format stream-json --resume --append-system-prompt --allowed-tools --mcp-config --max-turns --model"
  exit 0
fi
echo '{"type":"result","result":"pong","session_id":"cli-sess-tq"}'
"#,
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    async fn harness() -> (tempfile::TempDir, Arc<Store>, Arc<SessionManager>) {
        clade_capability::reset_cache_for_tests().await;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = Arc::new(Registry::new(dir.path().to_path_buf(), clade_config::Config::default()));
        registry.register("jarvis", agent_config()).unwrap();
        let reflection = Arc::new(ReflectionDriver::new(registry.clone()));
        let cli_path = mock_cli_script(dir.path());
        let manager = Arc::new(SessionManager::new(
            store.clone(),
            registry,
            reflection,
            SessionManagerConfig {
                host_exe: PathBuf::from("/usr/bin/clade"),
                home_dir: dir.path().to_path_buf(),
                ipc_socket_path: dir.path().join("ipc.sock"),
                browser: None,
                cli: clade_cli_runner::CliRunnerConfig {
                    cli_path: cli_path.to_str().unwrap().to_string(),
                    idle_timeout: Duration::from_secs(5),
                    hard_timeout: Duration::from_secs(5),
                    term_grace: Duration::from_millis(200),
                },
            },
        ));
        (dir, store, manager)
    }

    #[tokio::test]
    async fn due_task_fires_and_transitions_to_done() {
        let (_dir, store, sessions) = harness().await;
        let task = store
            .enqueue_task(
                "jarvis".into(),
                None,
                "ping me".into(),
                "ping".into(),
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let ticker = Arc::new(TaskQueueTicker::new(
            store.clone(),
            sessions,
            TaskQueueTickerConfig {
                tick: Duration::from_secs(15),
                max_concurrent: 4,
            },
        ));
        ticker.tick_once().await;
        // fire_one is spawned; give it a moment to complete.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, clade_core::TaskStatus::Done);
    }

    #[tokio::test]
    async fn future_task_is_left_pending() {
        let (_dir, store, sessions) = harness().await;
        store
            .enqueue_task(
                "jarvis".into(),
                None,
                "ping me".into(),
                "ping".into(),
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();

        let ticker = Arc::new(TaskQueueTicker::new(
            store.clone(),
            sessions,
            TaskQueueTickerConfig::default(),
        ));
        ticker.tick_once().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let tasks = store.list_tasks_by_agent(Some("jarvis")).await.unwrap();
        assert_eq!(tasks[0].status, clade_core::TaskStatus::Pending);
    }

    #[tokio::test]
    async fn failing_turn_marks_task_failed() {
        let (dir, store, _sessions) = harness().await;
        // A session manager pointed at a CLI that always fails.
        let registry = Arc::new(Registry::new(dir.path().to_path_buf(), clade_config::Config::default()));
        registry.register("jarvis", agent_config()).unwrap();
        let reflection = Arc::new(ReflectionDriver::new(registry.clone()));
        let bad_cli = dir.path().join("bad.sh");
        std::fs::write(&bad_cli, "#!/bin/sh\nexit 1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bad_cli, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let failing_sessions = Arc::new(SessionManager::new(
            store.clone(),
            registry,
            reflection,
            SessionManagerConfig {
                host_exe: PathBuf::from("/usr/bin/clade"),
                home_dir: dir.path().to_path_buf(),
                ipc_socket_path: dir.path().join("ipc.sock"),
                browser: None,
                cli: clade_cli_runner::CliRunnerConfig {
                    cli_path: bad_cli.to_str().unwrap().to_string(),
                    idle_timeout: Duration::from_secs(5),
                    hard_timeout: Duration::from_secs(5),
                    term_grace: Duration::from_millis(200),
                },
            },
        ));

        let task = store
            .enqueue_task(
                "jarvis".into(),
                None,
                "ping me".into(),
                "ping".into(),
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let ticker = Arc::new(TaskQueueTicker::new(
            store.clone(),
            failing_sessions,
            TaskQueueTickerConfig::default(),
        ));
        ticker.tick_once().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, clade_core::TaskStatus::Failed);
        assert!(fetched.error.is_some());
    }

    #[tokio::test]
    async fn surplus_due_tasks_beyond_max_concurrent_stay_pending() {
        let (_dir, store, sessions) = harness().await;
        let due = Utc::now() - chrono::Duration::seconds(1);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let task = store
                .enqueue_task("jarvis".into(), None, "ping me".into(), "ping".into(), due)
                .await
                .unwrap();
            ids.push(task.id);
        }

        // Hold every permit so none of this tick's due tasks can acquire one.
        let ticker = Arc::new(TaskQueueTicker::new(
            store.clone(),
            sessions,
            TaskQueueTickerConfig {
                tick: Duration::from_secs(15),
                max_concurrent: 2,
            },
        ));
        let _held = Arc::clone(&ticker.permits).try_acquire_owned().unwrap();
        let _held2 = Arc::clone(&ticker.permits).try_acquire_owned().unwrap();

        ticker.clone().tick_once().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        // No permits were free, so every row must still be pending — never
        // claimed into `running` and stranded there.
        for id in &ids {
            let fetched = store.get_task(id).await.unwrap().unwrap();
            assert_eq!(fetched.status, clade_core::TaskStatus::Pending);
        }
    }
}
