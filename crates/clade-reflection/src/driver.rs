// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use clade_registry::{Registry, RegistryError};

use crate::turn_runner::TurnRunner;

/// Meta-prompt sent in place of a normal user turn. Asks the agent to
/// propose a full replacement for its own soul document, or hand back
/// nothing if no revision is warranted.
const REFLECTION_INSTRUCTION: &str = "\
You have just completed a number of turns. Reflect on what you have \
learned about your own behavior, priorities, or persona since your soul \
document was last written, and decide whether it should change.

If a revision is warranted, reply with the complete, new contents of your \
soul document and nothing else. If no revision is warranted, reply with an \
empty response.";

#[derive(Debug, Error)]
pub enum ReflectionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("reading/writing soul history at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-agent turn counters and reflection locks, all in-memory: the store
/// schema has no columns for either, and neither needs to survive a host
/// restart (a restart simply restarts each agent's count toward its next
/// reflection from zero).
pub struct ReflectionDriver {
    registry: Arc<Registry>,
    counters: Mutex<HashMap<String, u32>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReflectionDriver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Call after every successfully completed turn. Bumps `agent_id`'s
    /// counter and, once it reaches the agent's configured interval, tries
    /// to run one reflection. A reflection already in flight for this agent
    /// causes this call to drop out silently rather than queue behind it.
    /// Every failure is logged and swallowed — reflection is best-effort and
    /// must never fail the turn that triggered it.
    pub async fn on_turn_complete(&self, agent_id: &str, runner: &dyn TurnRunner) {
        let Some(bundle) = self.registry.try_get(agent_id) else {
            return;
        };
        if !bundle.config.reflection.enabled {
            return;
        }
        let interval = bundle.config.reflection.interval.max(1);

        let reached = {
            let mut counters = self.counters.lock().expect("counters lock poisoned");
            let count = counters.entry(agent_id.to_string()).or_insert(0);
            *count += 1;
            if *count >= interval {
                *count = 0;
                true
            } else {
                false
            }
        };
        if !reached {
            return;
        }

        let lock = self.lock_for(agent_id);
        let Ok(_guard) = lock.try_lock() else {
            debug!(agent = agent_id, "reflection already in flight, dropping this attempt");
            return;
        };

        if let Err(err) = self.run_reflection(agent_id, runner).await {
            warn!(agent = agent_id, error = %err, "reflection failed");
        }
    }

    fn lock_for(&self, agent_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("locks lock poisoned");
        locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn run_reflection(
        &self,
        agent_id: &str,
        runner: &dyn TurnRunner,
    ) -> Result<(), ReflectionError> {
        let revision = runner
            .run_meta_turn(agent_id, REFLECTION_INSTRUCTION)
            .await
            .map_err(|err| {
                warn!(agent = agent_id, error = %err, "meta-turn for reflection failed");
                err
            })
            .unwrap_or_default();

        let revision = revision.trim();
        if revision.is_empty() {
            debug!(agent = agent_id, "reflection produced no revision");
            return Ok(());
        }

        let bundle = self
            .registry
            .try_get(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;

        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let snapshot_path = bundle.soul_history_dir.join(format!("{today}.md"));
        let current_soul = self.registry.read_soul(agent_id)?;
        std::fs::write(&snapshot_path, &current_soul).map_err(|source| ReflectionError::Io {
            path: snapshot_path.clone(),
            source,
        })?;

        self.registry.write_soul(agent_id, revision)?;
        info!(agent = agent_id, "soul revised by reflection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clade_core::{AdminConfig, AgentConfig, HeartbeatConfig, ReflectionConfig, ToolPreset};
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::turn_runner::TurnRunnerError;

    struct FixedRunner(String);

    #[async_trait]
    impl TurnRunner for FixedRunner {
        async fn run_meta_turn(&self, _agent_id: &str, _instruction: &str) -> Result<String, TurnRunnerError> {
            Ok(self.0.clone())
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl TurnRunner for FailingRunner {
        async fn run_meta_turn(&self, _agent_id: &str, _instruction: &str) -> Result<String, TurnRunnerError> {
            Err(TurnRunnerError("cli exploded".to_string()))
        }
    }

    struct CountingRunner(AtomicU32);

    #[async_trait]
    impl TurnRunner for CountingRunner {
        async fn run_meta_turn(&self, _agent_id: &str, _instruction: &str) -> Result<String, TurnRunnerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok("new soul".to_string())
        }
    }

    fn agent_config(interval: u32) -> AgentConfig {
        AgentConfig {
            name: "Jarvis".to_string(),
            description: String::new(),
            model: "claude-opus".to_string(),
            preset: ToolPreset::Coding,
            custom_tools: Vec::new(),
            skills: Vec::new(),
            heartbeat: HeartbeatConfig::default(),
            reflection: ReflectionConfig {
                enabled: true,
                interval,
            },
            max_turns: 50,
            admin: AdminConfig::default(),
        }
    }

    fn driver_with_agent(interval: u32) -> (tempfile::TempDir, Arc<Registry>, ReflectionDriver) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(dir.path().to_path_buf(), clade_config::Config::default()));
        registry.register("jarvis", agent_config(interval)).unwrap();
        let driver = ReflectionDriver::new(registry.clone());
        (dir, registry, driver)
    }

    #[tokio::test]
    async fn fires_only_once_interval_is_reached() {
        let (_dir, registry, driver) = driver_with_agent(3);
        let runner = FixedRunner("revised soul".to_string());

        driver.on_turn_complete("jarvis", &runner).await;
        driver.on_turn_complete("jarvis", &runner).await;
        assert_eq!(registry.read_soul("jarvis").unwrap(), "# Soul\n\n(Describe this agent's persona and directives here.)\n");

        driver.on_turn_complete("jarvis", &runner).await;
        assert_eq!(registry.read_soul("jarvis").unwrap(), "revised soul");
    }

    #[tokio::test]
    async fn counter_resets_after_firing_and_counts_toward_next_interval() {
        let (_dir, registry, driver) = driver_with_agent(2);
        let runner = FixedRunner("rev one".to_string());
        driver.on_turn_complete("jarvis", &runner).await;
        driver.on_turn_complete("jarvis", &runner).await;
        assert_eq!(registry.read_soul("jarvis").unwrap(), "rev one");

        let runner2 = FixedRunner("rev two".to_string());
        driver.on_turn_complete("jarvis", &runner2).await;
        assert_eq!(registry.read_soul("jarvis").unwrap(), "rev one");
        driver.on_turn_complete("jarvis", &runner2).await;
        assert_eq!(registry.read_soul("jarvis").unwrap(), "rev two");
    }

    #[tokio::test]
    async fn empty_revision_leaves_soul_untouched() {
        let (_dir, registry, driver) = driver_with_agent(1);
        let runner = FixedRunner("   ".to_string());
        let before = registry.read_soul("jarvis").unwrap();
        driver.on_turn_complete("jarvis", &runner).await;
        assert_eq!(registry.read_soul("jarvis").unwrap(), before);
    }

    #[tokio::test]
    async fn failing_meta_turn_is_swallowed() {
        let (_dir, registry, driver) = driver_with_agent(1);
        let before = registry.read_soul("jarvis").unwrap();
        driver.on_turn_complete("jarvis", &FailingRunner).await;
        assert_eq!(registry.read_soul("jarvis").unwrap(), before);
    }

    #[tokio::test]
    async fn non_empty_revision_snapshots_old_soul_before_replacing() {
        let (_dir, registry, driver) = driver_with_agent(1);
        let bundle = registry.try_get("jarvis").unwrap();
        let original = registry.read_soul("jarvis").unwrap();

        let runner = FixedRunner("brand new soul".to_string());
        driver.on_turn_complete("jarvis", &runner).await;

        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let snapshot = bundle.soul_history_dir.join(format!("{today}.md"));
        assert_eq!(std::fs::read_to_string(snapshot).unwrap(), original);
        assert_eq!(registry.read_soul("jarvis").unwrap(), "brand new soul");
    }

    #[tokio::test]
    async fn disabled_reflection_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(dir.path().to_path_buf(), clade_config::Config::default()));
        let mut cfg = agent_config(1);
        cfg.reflection.enabled = false;
        registry.register("jarvis", cfg).unwrap();
        let driver = ReflectionDriver::new(registry.clone());
        let before = registry.read_soul("jarvis").unwrap();

        let runner = FixedRunner("should never apply".to_string());
        driver.on_turn_complete("jarvis", &runner).await;
        assert_eq!(registry.read_soul("jarvis").unwrap(), before);
    }

    #[tokio::test]
    async fn concurrent_attempts_only_let_one_reflection_proceed() {
        let (_dir, _registry, driver) = driver_with_agent(1);
        let driver = Arc::new(driver);
        let runner = Arc::new(CountingRunner(AtomicU32::new(0)));

        let d1 = driver.clone();
        let r1 = runner.clone();
        let d2 = driver.clone();
        let r2 = runner.clone();

        let (a, b) = tokio::join!(
            tokio::spawn(async move { d1.on_turn_complete("jarvis", r1.as_ref()).await }),
            tokio::spawn(async move { d2.on_turn_complete("jarvis", r2.as_ref()).await }),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(runner.0.load(Ordering::SeqCst), 1);
    }
}
