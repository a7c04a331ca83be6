// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::probe::CliCapabilities;

/// Per-invocation options the CLI Runner wants to translate into an argument
/// vector (§4.2, §4.3). Mirrors the wire shape `clade-session` builds per
/// turn, kept independent of it so this crate has no dependency on
/// `clade-session`.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub prompt: String,
    pub resume_session_id: Option<String>,
    /// System prompt supplied inline, used directly when present.
    pub system_prompt_inline: Option<String>,
    /// Path to a file holding the system prompt; preferred over the inline
    /// form when the CLI supports the file flag.
    pub system_prompt_file: Option<String>,
    pub tool_manifest_path: Option<String>,
    pub allowed_tools: Vec<String>,
    pub max_turns: Option<u32>,
    pub model: Option<String>,
}

/// Builds the argument vector for one CLI invocation, gated by `caps`
/// (§4.2). Flags for capabilities the CLI doesn't advertise are silently
/// omitted rather than erroring — the probe already rejected CLIs missing a
/// *critical* capability, so anything reaching here is an optional one.
pub fn build_args(options: &CliOptions, caps: &CliCapabilities) -> Vec<String> {
    let mut args = Vec::new();

    if caps.stream_json {
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());
    }

    if let Some(id) = &options.resume_session_id {
        if caps.resume {
            args.push("--resume".to_string());
            args.push(id.clone());
        }
    }

    push_system_prompt(&mut args, options, caps);

    if caps.allowed_tools && !options.allowed_tools.is_empty() {
        args.push("--allowed-tools".to_string());
        args.push(options.allowed_tools.join(","));
    }

    if caps.tool_server_config_file {
        if let Some(path) = &options.tool_manifest_path {
            args.push("--mcp-config".to_string());
            args.push(path.clone());
        }
    }

    if caps.max_turns {
        if let Some(turns) = options.max_turns {
            args.push("--max-turns".to_string());
            args.push(turns.to_string());
        }
    }

    if caps.model_selection {
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
    }

    args.push("--print".to_string());
    args.push(options.prompt.clone());

    args
}

/// §4.2 capability-gated fallback: prefer the file form when supported;
/// otherwise read the file's contents and pass them inline; if the file is
/// unreadable, fall back to the caller-supplied inline value.
fn push_system_prompt(args: &mut Vec<String>, options: &CliOptions, caps: &CliCapabilities) {
    if caps.append_system_prompt_file {
        if let Some(path) = &options.system_prompt_file {
            args.push("--append-system-prompt-file".to_string());
            args.push(path.clone());
            return;
        }
    }

    if caps.append_system_prompt {
        if let Some(path) = &options.system_prompt_file {
            if let Ok(contents) = std::fs::read_to_string(path) {
                args.push("--append-system-prompt".to_string());
                args.push(contents);
                return;
            }
        }
        if let Some(inline) = &options.system_prompt_inline {
            args.push("--append-system-prompt".to_string());
            args.push(inline.clone());
        }
    }
}
