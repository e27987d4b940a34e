// Popup side of the delegation contract
// Holds the request the user is looking at and produces their decision

use serde_json::Value;

use crate::protocol::{codes, ChannelMessage, PageRequest, PopupDecision, ResponseEnvelope};

/// Approval state inside the popup. The signing UI reads `current()` and
/// answers through `approve` or `reject`.
#[derive(Default)]
pub struct ApprovalSession {
    current: Option<PageRequest>,
}

impl ApprovalSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a runtime message. Only controller deliveries are requests for
    /// the popup; returns the request now shown.
    pub fn receive(&mut self, message: ChannelMessage) -> Option<&PageRequest> {
        let ChannelMessage::ControllerRelay { data } = message else {
            return None;
        };

        if let Some(previous) = &self.current {
            if previous.key() != data.key() {
                log::warn!(
                    "⚠️ {} replaced {} before the user answered",
                    data.key(),
                    previous.key()
                );
            }
        }
        log::info!("🔔 Approval requested for '{}'", data.envelope.method);
        self.current = Some(data);
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&PageRequest> {
        self.current.as_ref()
    }

    pub fn approve(&mut self, result: Value) -> Option<ChannelMessage> {
        self.decide(ResponseEnvelope::success(result))
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Option<ChannelMessage> {
        self.decide(ResponseEnvelope::error(codes::USER_REJECTED, reason))
    }

    /// Consumes the shown request, so each request is answered once.
    fn decide(&mut self, response: ResponseEnvelope) -> Option<ChannelMessage> {
        let request = self.current.take()?;
        Some(ChannelMessage::FromPopup(PopupDecision {
            context: request.context,
            id: request.id,
            response,
        }))
    }
}
