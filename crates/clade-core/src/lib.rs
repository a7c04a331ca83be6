// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared data model and error taxonomy for the `clade` orchestration host.
//!
//! Every other `clade-*` crate depends on this one for the types that cross
//! component boundaries: [`Agent`]/[`AgentConfig`], [`Session`]/[`SessionKey`],
//! [`CronJob`], [`DeferredTask`], [`MemoryChunk`], [`Skill`], and the
//! [`OrchestrationError`] taxonomy.
mod agent;
mod channel;
mod cron_job;
mod error;
pub mod memory;
mod session;
mod skill;
mod task;

pub use agent::{
    AdminConfig, Agent, AgentConfig, HeartbeatConfig, HeartbeatMode, ReflectionConfig, ToolPreset,
    AGENT_ID_PATTERN,
};
pub use channel::ChannelSink;
pub use cron_job::CronJob;
pub use error::OrchestrationError;
pub use memory::MemoryChunk;
pub use session::{Session, SessionKey, SessionStatus};
pub use skill::{is_reserved_name, Skill, SkillStatus, RESERVED_SERVER_NAMES};
pub use task::{
    validate_delay_minutes, DeferredTask, TaskStatus, MAX_DELAY_MINUTES, MIN_DELAY_MINUTES,
};
