// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use crate::OrchestrationError;

/// Delivery boundary to a third-party messaging channel (Telegram, Discord,
/// webchat, …). Channel adapters themselves are out of scope for this
/// runtime (§1) — this trait is the named interface the Cron Scheduler
/// (`clade-cron`) calls into for `deliverTo` delivery, and the only piece of
/// the channel layer this crate owns.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// The channel name this sink answers to, e.g. `"webchat"`.
    fn name(&self) -> &str;

    /// Deliver `text` to `target` on this channel. Delivery failures are
    /// logged by the caller and never fail the originating job (§4.10).
    async fn send(&self, target: &str, text: &str) -> Result<(), OrchestrationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChannelSink for RecordingSink {
        fn name(&self) -> &str {
            "webchat"
        }

        async fn send(&self, target: &str, text: &str) -> Result<(), OrchestrationError> {
            self.sent
                .lock()
                .unwrap()
                .push((target.to_string(), text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_records_target_and_text() {
        let sink = RecordingSink {
            sent: Mutex::new(Vec::new()),
        };
        sink.send("u1", "hello").await.unwrap();
        let recorded = sink.sent.lock().unwrap();
        assert_eq!(recorded[0], ("u1".to_string(), "hello".to_string()));
    }
}
