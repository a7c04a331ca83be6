// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};

use clade_config::Config;
use clade_core::{Agent, AgentConfig, OrchestrationError};

use crate::layout::AgentBundle;

/// Placeholder MEMORY.md content written for a freshly registered agent.
/// `clade-prompt` compares a live file against this constant to decide
/// whether an agent has accrued any real long-term memory yet (§4.5 step 2).
pub const DEFAULT_MEMORY_TEMPLATE: &str = "# Memory\n\n(No long-term memory recorded yet.)\n";

const DEFAULT_SOUL_TEMPLATE: &str = "# Soul\n\n(Describe this agent's persona and directives here.)\n";
const DEFAULT_HEARTBEAT_TEMPLATE: &str = "# Heartbeat Log\n";
const DEFAULT_TOOLS_TEMPLATE: &str = "# Tool Notes\n";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent {0:?} is not registered")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] OrchestrationError),
    #[error("persisting config: {0}")]
    Config(#[from] clade_config::ConfigError),
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Single writer for the agent config map and sole owner of each agent's
/// on-disk document bundle (§3 "Ownership").
pub struct Registry {
    home_dir: PathBuf,
    config: RwLock<Config>,
}

impl Registry {
    pub fn new(home_dir: PathBuf, config: Config) -> Self {
        Self {
            home_dir,
            config: RwLock::new(config),
        }
    }

    pub fn list(&self) -> Vec<AgentBundle> {
        let config = self.config.read().expect("registry lock poisoned");
        config
            .agents
            .iter()
            .map(|(id, cfg)| self.bundle_for(id, cfg))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        let config = self.config.read().expect("registry lock poisoned");
        config.agents.keys().cloned().collect()
    }

    pub fn has(&self, id: &str) -> bool {
        let config = self.config.read().expect("registry lock poisoned");
        config.agents.contains_key(id)
    }

    pub fn try_get(&self, id: &str) -> Option<AgentBundle> {
        let config = self.config.read().expect("registry lock poisoned");
        config.agents.get(id).map(|cfg| self.bundle_for(id, cfg))
    }

    /// Creates or replaces the registration for `id`. Validates `config`
    /// against the schema before touching disk, scaffolds the document
    /// bundle for a brand-new agent (leaving an existing one's documents
    /// untouched on replace), then persists the updated config map.
    pub fn register(&self, id: &str, config: AgentConfig) -> Result<AgentBundle, RegistryError> {
        let agent = Agent::new(id, config)?;
        let bundle = AgentBundle::new(&self.home_dir, agent.clone());

        if !bundle.base_dir.is_dir() {
            self.scaffold(&bundle)?;
        }

        {
            let mut cfg = self.config.write().expect("registry lock poisoned");
            cfg.agents.insert(agent.id.clone(), agent.config.clone());
            clade_config::save(&cfg, &self.home_dir)?;
        }
        info!(agent = %agent.id, "registered agent");
        Ok(bundle)
    }

    /// Removes `id` from the config map. The document bundle on disk is left
    /// in place — re-registering the same id picks its history back up.
    pub fn unregister(&self, id: &str) -> Result<(), RegistryError> {
        let mut cfg = self.config.write().expect("registry lock poisoned");
        if cfg.agents.remove(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        clade_config::save(&cfg, &self.home_dir)?;
        info!(agent = %id, "unregistered agent");
        Ok(())
    }

    pub fn read_soul(&self, id: &str) -> Result<String, RegistryError> {
        self.read_doc(id, |b| &b.soul_path)
    }

    pub fn write_soul(&self, id: &str, contents: &str) -> Result<(), RegistryError> {
        self.write_doc(id, contents, |b| &b.soul_path)
    }

    pub fn read_heartbeat(&self, id: &str) -> Result<String, RegistryError> {
        self.read_doc(id, |b| &b.heartbeat_path)
    }

    pub fn write_heartbeat(&self, id: &str, contents: &str) -> Result<(), RegistryError> {
        self.write_doc(id, contents, |b| &b.heartbeat_path)
    }

    pub fn read_tools_notes(&self, id: &str) -> Result<String, RegistryError> {
        self.read_doc(id, |b| &b.tools_path)
    }

    pub fn write_tools_notes(&self, id: &str, contents: &str) -> Result<(), RegistryError> {
        self.write_doc(id, contents, |b| &b.tools_path)
    }

    pub fn read_memory(&self, id: &str) -> Result<String, RegistryError> {
        self.read_doc(id, |b| &b.memory_path)
    }

    fn read_doc(
        &self,
        id: &str,
        path_of: impl Fn(&AgentBundle) -> &PathBuf,
    ) -> Result<String, RegistryError> {
        let bundle = self.try_get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let path = path_of(&bundle);
        std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })
    }

    fn write_doc(
        &self,
        id: &str,
        contents: &str,
        path_of: impl Fn(&AgentBundle) -> &PathBuf,
    ) -> Result<(), RegistryError> {
        let bundle = self.try_get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let path = path_of(&bundle);
        std::fs::write(path, contents).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })
    }

    fn bundle_for(&self, id: &str, config: &AgentConfig) -> AgentBundle {
        AgentBundle::new(
            &self.home_dir,
            Agent {
                id: id.to_string(),
                config: config.clone(),
            },
        )
    }

    fn scaffold(&self, bundle: &AgentBundle) -> Result<(), RegistryError> {
        debug!(agent = %bundle.id, dir = %bundle.base_dir.display(), "scaffolding new agent document bundle");
        for dir in [&bundle.memory_dir, &bundle.soul_history_dir, &bundle.tools_history_dir] {
            std::fs::create_dir_all(dir).map_err(|source| RegistryError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        write_if_absent(&bundle.soul_path, DEFAULT_SOUL_TEMPLATE)?;
        write_if_absent(&bundle.heartbeat_path, DEFAULT_HEARTBEAT_TEMPLATE)?;
        write_if_absent(&bundle.memory_path, DEFAULT_MEMORY_TEMPLATE)?;
        write_if_absent(&bundle.tools_path, DEFAULT_TOOLS_TEMPLATE)?;
        Ok(())
    }
}

fn write_if_absent(path: &PathBuf, contents: &str) -> Result<(), RegistryError> {
    if path.is_file() {
        return Ok(());
    }
    std::fs::write(path, contents).map_err(|source| RegistryError::Io {
        path: path.clone(),
        source,
    })
}
