// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The §4.8 wire message types. One JSON object per request, tagged by
//! `type`; unknown fields are rejected so a caller sending a stale shape
//! fails loudly rather than silently dropping data (§9 "parsers reject
//! unknown variants rather than silently ignoring").
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
pub enum Request {
    #[serde(rename = "sessions.list")]
    SessionsList,
    #[serde(rename = "sessions.spawn")]
    SessionsSpawn {
        agent_id: String,
        prompt: String,
        parent_session_id: Option<String>,
        calling_agent_id: Option<String>,
    },
    #[serde(rename = "sessions.send")]
    SessionsSend { session_id: String, message: String },
    #[serde(rename = "sessions.status")]
    SessionsStatus { session_id: String },
    #[serde(rename = "agents.list")]
    AgentsList,
    #[serde(rename = "taskqueue.schedule")]
    TaskqueueSchedule {
        agent_id: String,
        session_id: Option<String>,
        prompt: String,
        description: String,
        delay_minutes: f64,
    },
    #[serde(rename = "taskqueue.cancel")]
    TaskqueueCancel {
        task_id: String,
        agent_id: Option<String>,
    },
    #[serde(rename = "taskqueue.list")]
    TaskqueueList { agent_id: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_list_has_no_fields() {
        let req: Request = serde_json::from_str(r#"{"type":"sessions.list"}"#).unwrap();
        assert!(matches!(req, Request::SessionsList));
    }

    #[test]
    fn sessions_spawn_parses_optional_fields() {
        let req: Request = serde_json::from_str(
            r#"{"type":"sessions.spawn","agentId":"jarvis","prompt":"hi"}"#,
        )
        .unwrap();
        match req {
            Request::SessionsSpawn {
                agent_id,
                prompt,
                parent_session_id,
                calling_agent_id,
            } => {
                assert_eq!(agent_id, "jarvis");
                assert_eq!(prompt, "hi");
                assert!(parent_session_id.is_none());
                assert!(calling_agent_id.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn taskqueue_schedule_parses_delay_minutes() {
        let req: Request = serde_json::from_str(
            r#"{"type":"taskqueue.schedule","agentId":"jarvis","prompt":"p","description":"d","delayMinutes":0.5}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::TaskqueueSchedule { .. }));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result: Result<Request, _> = serde_json::from_str(r#"{"type":"bogus.op"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result: Result<Request, _> =
            serde_json::from_str(r#"{"type":"sessions.list","extra":1}"#);
        assert!(result.is_err());
    }
}
