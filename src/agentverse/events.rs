// src/agentverse/events.rs

use log::warn;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// One structured progress event (§4.11, §6 "Progress events").
///
/// `event` is the tag (`"stage_start"`, `"discussion_round"`, ...) and
/// `data` carries `stage`/`iteration` plus whatever stage-specific payload
/// that tag implies. Kept as a loose `Value` bag rather than a closed enum
/// because downstream consumers (a UI, a log sink) are out of scope for
/// this crate - it only needs to emit the wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub event: &'static str,
    pub data: Value,
}

impl ProgressEvent {
    pub fn new(event: &'static str, data: Value) -> Self {
        ProgressEvent { event, data }
    }
}

/// Optional sink receiving progress events as stages advance.
///
/// Send failures must never propagate into the workflow (§4.11): a full or
/// closed channel just gets logged and dropped.
#[derive(Clone)]
pub struct ProgressChannel {
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressChannel {
    pub fn none() -> Self {
        ProgressChannel { sender: None }
    }

    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        ProgressChannel { sender: Some(sender) }
    }

    /// Best-effort send. A closed receiver or absent sink is not an error
    /// the workflow should ever see.
    pub fn emit(&self, event: &'static str, data: Value) {
        if let Some(sender) = &self.sender {
            if sender.send(ProgressEvent::new(event, data)).is_err() {
                warn!("progress channel closed; dropping event '{}'", event);
            }
        }
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::none()
    }
}
