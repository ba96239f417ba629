//! Smart floating assistant, the addon bundled with the host
//!
//! Watches the global text selection from its background task and, when the
//! selection changes while a model is ready, asks the session for a short
//! summary and publishes it as a chat message. Event-driven for model
//! availability, polling for the selection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use lantern_core::bus::{Event, EventPayload, Topic};
use lantern_core::session::SamplingParams;
use lantern_core::Result;

use crate::host::AddonHost;
use crate::supervisor::BackgroundSpec;
use crate::{Addon, UiPanel};

pub const ENTRY_POINT: &str = "lantern::smart_floating_assistant";

const SUMMARY_MAX_TOKENS: usize = 128;
// Short selections are noise (double-clicked words, stray whitespace).
const MIN_SELECTION_LEN: usize = 16;

pub struct SmartFloatingAssistant {
    host: AddonHost,
    model_ready: AtomicBool,
    last_selection: Mutex<String>,
}

impl SmartFloatingAssistant {
    pub fn new(host: AddonHost) -> Self {
        Self {
            host,
            model_ready: AtomicBool::new(false),
            last_selection: Mutex::new(String::new()),
        }
    }

    /// Record the selection if it changed; returns the new text
    fn selection_changed(&self, selection: &str) -> bool {
        let mut last = self
            .last_selection
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if *last == selection {
            return false;
        }
        *last = selection.to_string();
        true
    }

    async fn summarize(&self, selection: &str) -> Result<()> {
        let prompt = format!("Summarize the following text in one or two sentences:\n\n{selection}");
        let sampling = SamplingParams {
            max_tokens: SUMMARY_MAX_TOKENS,
            ..SamplingParams::default()
        };
        let stream = self.host.infer(&prompt, sampling).await?;
        let summary = stream.collect_text().await?;
        self.host.publish(EventPayload::ChatMessage {
            source: self.host.addon_name().to_string(),
            content: summary,
        });
        Ok(())
    }
}

#[async_trait]
impl Addon for SmartFloatingAssistant {
    async fn initialize(&self) -> Result<()> {
        // A model may already be resident when the addon comes up.
        let (status, _) = self.host.session_status();
        self.model_ready
            .store(status == lantern_core::session::SessionStatus::Ready, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn subscriptions(&self) -> Vec<Topic> {
        vec![Topic::ModelLoaded, Topic::ModelUnloaded]
    }

    fn on_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::ModelLoaded { error: None, .. } => {
                self.model_ready.store(true, Ordering::SeqCst);
            }
            EventPayload::ModelLoaded { error: Some(_), .. } | EventPayload::ModelUnloaded => {
                self.model_ready.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    fn background(&self) -> Option<BackgroundSpec> {
        Some(BackgroundSpec::default())
    }

    async fn tick(&self) -> Result<()> {
        let selection = self.host.read_selection()?;
        let trimmed = selection.trim();
        if trimmed.len() < MIN_SELECTION_LEN {
            return Ok(());
        }
        // Do not mark the selection as seen while no model is ready, so
        // text selected before a load is picked up once one arrives.
        if !self.model_ready.load(Ordering::SeqCst) {
            debug!("selection present but no model is ready");
            return Ok(());
        }
        if !self.selection_changed(trimmed) {
            return Ok(());
        }
        if let Err(error) = self.summarize(trimmed).await {
            warn!(%error, "failed to summarize selection");
            return Err(error);
        }
        Ok(())
    }

    fn ui_panel(&self) -> Option<UiPanel> {
        Some(UiPanel {
            title: "Smart Floating Assistant".to_string(),
            description: "Summarizes the current text selection".to_string(),
        })
    }
}
