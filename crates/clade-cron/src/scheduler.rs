// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use clade_core::{ChannelSink, CronJob};
use clade_session::SessionManager;
use clade_store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron expression {expr:?}: {source}")]
    InvalidSchedule {
        expr: String,
        #[source]
        source: cron::error::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cron job named {0:?} not found")]
    NotFound(String),
}

/// §3/§8 S5 express jobs with standard 5-field unix cron syntax (minute
/// resolution, no seconds field). The `cron` crate expects a leading
/// seconds field, so a 5-field expression is normalized to 6 fields by
/// prepending `"0"`; 6- and 7-field (with year) expressions pass through
/// unchanged for callers that want sub-minute resolution.
fn parse_schedule(expr: &str) -> Result<Schedule, CronError> {
    let field_count = expr.split_whitespace().count();
    let normalized = if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).map_err(|source| CronError::InvalidSchedule {
        expr: expr.to_string(),
        source,
    })
}

struct LiveJob {
    handle: JoinHandle<()>,
}

/// Owns the live, in-memory schedule derived from the store's `cron_jobs`
/// table. `addJob`/`removeJob`/`enableJob`/`disableJob` (§4.10) update both
/// the store row and this live schedule in the same call so the two never
/// drift apart.
pub struct CronScheduler {
    store: Arc<Store>,
    sessions: Arc<SessionManager>,
    channels: HashMap<String, Arc<dyn ChannelSink>>,
    live: Mutex<HashMap<String, LiveJob>>,
}

impl CronScheduler {
    pub fn new(
        store: Arc<Store>,
        sessions: Arc<SessionManager>,
        channels: Vec<Arc<dyn ChannelSink>>,
    ) -> Self {
        let channels = channels.into_iter().map(|c| (c.name().to_string(), c)).collect();
        Self {
            store,
            sessions,
            channels,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Loads every row and schedules the enabled ones (§4.10 "On start").
    pub async fn start(self: &Arc<Self>) -> Result<(), CronError> {
        let jobs = self.store.list_cron_jobs().await?;
        for job in jobs {
            if job.enabled {
                self.spawn_live(job).await?;
            }
        }
        Ok(())
    }

    /// `isJobActive` (§8 property 3): true iff a live task is scheduled for
    /// this job name right now.
    pub async fn is_job_active(&self, name: &str) -> bool {
        let Some(job) = self.job_by_name(name).await else {
            return false;
        };
        self.live.lock().await.contains_key(&job.id)
    }

    pub async fn list_jobs(&self) -> Result<Vec<CronJob>, CronError> {
        Ok(self.store.list_cron_jobs().await?)
    }

    pub async fn add_job(
        self: &Arc<Self>,
        name: String,
        schedule: String,
        agent_id: String,
        prompt: String,
        deliver_to: Option<String>,
        enabled: bool,
    ) -> Result<CronJob, CronError> {
        parse_schedule(&schedule)?;
        let job = self
            .store
            .create_cron_job(name, schedule, agent_id, prompt, deliver_to, enabled)
            .await?;
        if job.enabled {
            self.spawn_live(job.clone()).await?;
        }
        Ok(job)
    }

    pub async fn remove_job(&self, id: &str) -> Result<(), CronError> {
        self.stop_live(id).await;
        self.store.delete_cron_job(id).await?;
        Ok(())
    }

    pub async fn enable_job(self: &Arc<Self>, id: &str) -> Result<(), CronError> {
        self.store.set_cron_job_enabled(id, true).await?;
        let job = self
            .store
            .get_cron_job_by_id(id)
            .await?
            .ok_or_else(|| CronError::NotFound(id.to_string()))?;
        self.spawn_live(job).await?;
        Ok(())
    }

    pub async fn disable_job(&self, id: &str) -> Result<(), CronError> {
        self.store.set_cron_job_enabled(id, false).await?;
        self.stop_live(id).await;
        Ok(())
    }

    /// Tears down every live schedule without touching the store (§4.10
    /// "Stop tears down all live schedules").
    pub async fn stop(&self) {
        let mut live = self.live.lock().await;
        for (_, job) in live.drain() {
            job.handle.abort();
        }
    }

    async fn job_by_name(&self, name: &str) -> Option<CronJob> {
        self.store.get_cron_job_by_name(name).await.ok().flatten()
    }

    async fn stop_live(&self, id: &str) {
        let mut live = self.live.lock().await;
        if let Some(job) = live.remove(id) {
            job.handle.abort();
        }
    }

    async fn spawn_live(self: &Arc<Self>, job: CronJob) -> Result<(), CronError> {
        let schedule = parse_schedule(&job.schedule)?;
        self.stop_live(&job.id).await;
        let this = Arc::clone(self);
        let job_id = job.id.clone();
        let handle = tokio::spawn(async move {
            this.drive(job, schedule).await;
        });
        self.live.lock().await.insert(job_id, LiveJob { handle });
        Ok(())
    }

    /// The per-job loop: sleep until the next scheduled fire time, fire,
    /// recompute, repeat. Runs until aborted by `stop`/`disable_job`/`remove_job`.
    async fn drive(self: Arc<Self>, job: CronJob, schedule: Schedule) {
        info!(job = %job.name, schedule = %job.schedule, "cron job scheduled");
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!(job = %job.name, "cron schedule produced no further fire times");
                return;
            };
            let now = Utc::now();
            let delay = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
            self.fire(&job).await;
        }
    }

    async fn fire(&self, job: &CronJob) {
        debug!(job = %job.name, "cron job firing");
        let result = self
            .sessions
            .send_message(&job.agent_id, &job.prompt, Some("cron"), Some("cron"), None)
            .await;
        if let Err(err) = self.store.touch_cron_last_run(&job.id).await {
            warn!(job = %job.name, error = %err, "touching cron last_run_at failed");
        }
        match result {
            Ok(output) => {
                if let Some(deliver_to) = &job.deliver_to {
                    self.deliver(job, deliver_to, &output.text).await;
                }
            }
            Err(err) => {
                warn!(job = %job.name, error = %err, "cron turn failed");
            }
        }
    }

    async fn deliver(&self, job: &CronJob, deliver_to: &str, text: &str) {
        let Some((channel, target)) = job.delivery_target() else {
            warn!(job = %job.name, deliver_to, "malformed deliverTo, expected \"<channel>:<target>\"");
            return;
        };
        let Some(sink) = self.channels.get(channel) else {
            warn!(job = %job.name, channel, "no channel adapter registered for deliverTo");
            return;
        };
        if let Err(err) = sink.send(target, text).await {
            warn!(job = %job.name, channel, target, error = %err, "cron result delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clade_core::{AdminConfig, AgentConfig, HeartbeatConfig, OrchestrationError, ReflectionConfig, ToolPreset};
    use clade_registry::Registry;
    use clade_reflection::ReflectionDriver;
    use clade_session::SessionManagerConfig;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn agent_config() -> AgentConfig {
        AgentConfig {
            name: "Scout".to_string(),
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
echo '{"type":"result","result":"scan complete","session_id":"cli-sess-cron"}'
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

    struct RecordingSink {
        name: &'static str,
        sent: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl ChannelSink for RecordingSink {
        fn name(&self) -> &str {
            self.name
        }

        async fn send(&self, target: &str, text: &str) -> Result<(), OrchestrationError> {
            self.sent.lock().unwrap().push((target.to_string(), text.to_string()));
            Ok(())
        }
    }

    async fn harness() -> (tempfile::TempDir, Arc<Store>, Arc<SessionManager>) {
        clade_capability::reset_cache_for_tests().await;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = Arc::new(Registry::new(dir.path().to_path_buf(), clade_config::Config::default()));
        registry.register("scout", agent_config()).unwrap();
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
    async fn add_job_schedules_it_live() {
        let (_dir, store, sessions) = harness().await;
        let scheduler = Arc::new(CronScheduler::new(store, sessions, Vec::new()));
        scheduler
            .add_job(
                "scan".into(),
                "* * * * *".into(),
                "scout".into(),
                "scan".into(),
                None,
                true,
            )
            .await
            .unwrap();
        assert!(scheduler.is_job_active("scan").await);
    }

    #[tokio::test]
    async fn disable_then_enable_round_trips_without_data_loss() {
        let (_dir, store, sessions) = harness().await;
        let scheduler = Arc::new(CronScheduler::new(store, sessions, Vec::new()));
        let job = scheduler
            .add_job(
                "scan".into(),
                "* * * * *".into(),
                "scout".into(),
                "scan".into(),
                None,
                true,
            )
            .await
            .unwrap();
        scheduler.disable_job(&job.id).await.unwrap();
        assert!(!scheduler.is_job_active("scan").await);
        scheduler.enable_job(&job.id).await.unwrap();
        assert!(scheduler.is_job_active("scan").await);
        let jobs = scheduler.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].schedule, "* * * * *");
    }

    #[tokio::test]
    async fn invalid_schedule_is_rejected() {
        let (_dir, store, sessions) = harness().await;
        let scheduler = Arc::new(CronScheduler::new(store, sessions, Vec::new()));
        let err = scheduler
            .add_job("bad".into(), "not a cron expr".into(), "scout".into(), "p".into(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::InvalidSchedule { .. }));
    }

    #[tokio::test]
    async fn fire_touches_last_run_and_delivers() {
        let (_dir, store, sessions) = harness().await;
        let sink = Arc::new(RecordingSink {
            name: "webchat",
            sent: StdMutex::new(Vec::new()),
        });
        let scheduler = Arc::new(CronScheduler::new(store.clone(), sessions, vec![sink.clone()]));
        let job = store
            .create_cron_job(
                "scan".into(),
                "* * * * *".into(),
                "scout".into(),
                "scan".into(),
                Some("webchat:u1".into()),
                true,
            )
            .await
            .unwrap();
        scheduler.fire(&job).await;
        let fetched = store.get_cron_job_by_id(&job.id).await.unwrap().unwrap();
        assert!(fetched.last_run_at.is_some());
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0], ("u1".to_string(), "scan complete".to_string()));
    }

    #[tokio::test]
    async fn delivery_with_unknown_channel_does_not_panic() {
        let (_dir, store, sessions) = harness().await;
        let scheduler = Arc::new(CronScheduler::new(store.clone(), sessions, Vec::new()));
        let job = store
            .create_cron_job(
                "scan".into(),
                "* * * * *".into(),
                "scout".into(),
                "scan".into(),
                Some("telegram:u1".into()),
                true,
            )
            .await
            .unwrap();
        scheduler.fire(&job).await;
        let fetched = store.get_cron_job_by_id(&job.id).await.unwrap().unwrap();
        assert!(fetched.last_run_at.is_some());
    }

    #[tokio::test]
    async fn remove_job_stops_and_deletes() {
        let (_dir, store, sessions) = harness().await;
        let scheduler = Arc::new(CronScheduler::new(store, sessions, Vec::new()));
        let job = scheduler
            .add_job(
                "scan".into(),
                "* * * * *".into(),
                "scout".into(),
                "scan".into(),
                None,
                true,
            )
            .await
            .unwrap();
        scheduler.remove_job(&job.id).await.unwrap();
        assert!(!scheduler.is_job_active("scan").await);
        assert!(scheduler.list_jobs().await.unwrap().is_empty());
    }
}
