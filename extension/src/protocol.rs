// Wallet bridge wire messages
// Shapes exchanged between page, content script, background and popup

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable numeric codes handed back to page scripts.
pub mod codes {
    /// The user (or the popup acting for them) rejected the request.
    pub const USER_REJECTED: i64 = 4001;
    /// No reply arrived within the provider timeout.
    pub const REQUEST_TIMEOUT: i64 = 4100;
    /// The extension context could not be reached.
    pub const DISCONNECTED: i64 = 4900;
    /// Another request from the same page is still in flight.
    pub const ALREADY_PENDING: i64 = -32002;
}

/// Identifies one page context (a tab's page world).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PageContextId(pub u64);

/// Per-provider request counter value.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RequestId(pub u64);

/// Correlates a reply with the call that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub context: PageContextId,
    pub id: RequestId,
}

impl std::fmt::Display for CallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.context.0, self.id.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RequestEnvelope {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Request as it travels between the page and the controller.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PageRequest {
    pub context: PageContextId,
    pub id: RequestId,
    #[serde(flatten)]
    pub envelope: RequestEnvelope,
}

impl PageRequest {
    pub fn key(&self) -> CallKey {
        CallKey {
            context: self.context,
            id: self.id,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseEnvelope {
    Success {
        result: Value,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i64>,
    },
}

impl ResponseEnvelope {
    pub fn success(result: Value) -> Self {
        ResponseEnvelope::Success { result }
    }

    pub fn error(code: i64, error: impl Into<String>) -> Self {
        ResponseEnvelope::Error {
            error: error.into(),
            code: Some(code),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success { .. })
    }

    /// Interpret a page-level reply payload.
    ///
    /// Older popups answer with the bare result, newer ones with a
    /// `status`-tagged envelope. Anything that is not a recognisable
    /// envelope counts as a bare result.
    pub fn from_reply_payload(payload: Value) -> Self {
        let tagged = payload
            .get("status")
            .and_then(Value::as_str)
            .map(|status| status == "SUCCESS" || status == "ERROR")
            .unwrap_or(false);

        if tagged {
            if let Ok(envelope) = serde_json::from_value::<ResponseEnvelope>(payload.clone()) {
                return envelope;
            }
        }
        ResponseEnvelope::Success { result: payload }
    }

    /// Payload carried by the page-level reply event: the bare result on
    /// success, the error object otherwise.
    ///
    /// The bare result is not wrapped, so a result that is itself shaped
    /// like a `status`-tagged envelope reads back through
    /// `from_reply_payload` as that envelope, not as a plain result.
    pub fn into_reply_payload(self) -> Value {
        match self {
            ResponseEnvelope::Success { result } => result,
            error @ ResponseEnvelope::Error { .. } => {
                serde_json::to_value(&error).unwrap_or(Value::Null)
            }
        }
    }
}

/// Reply as delivered back into the page.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PageReply {
    pub context: PageContextId,
    pub id: RequestId,
    pub payload: Value,
}

impl PageReply {
    pub fn key(&self) -> CallKey {
        CallKey {
            context: self.context,
            id: self.id,
        }
    }
}

/// Page-local events. Request and reply use distinct event names, so the
/// variant is never encoded on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum PageEvent {
    Request(PageRequest),
    Reply(PageReply),
}

/// Answer emitted by the popup once the user has decided.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PopupDecision {
    pub context: PageContextId,
    pub id: RequestId,
    pub response: ResponseEnvelope,
}

impl PopupDecision {
    pub fn key(&self) -> CallKey {
        CallKey {
            context: self.context,
            id: self.id,
        }
    }
}

/// Which hop produced a cross-context message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OriginTag {
    FromPageWorld,
    FromControllerWorld,
    ControllerRelay,
    FromPopup,
}

/// Messages carried on the extension runtime channel.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "origin", rename_all = "kebab-case")]
pub enum ChannelMessage {
    FromPageWorld(PageRequest),
    FromControllerWorld(PageRequest),
    ControllerRelay { data: PageRequest },
    FromPopup(PopupDecision),
}

impl ChannelMessage {
    pub fn origin(&self) -> OriginTag {
        match self {
            ChannelMessage::FromPageWorld(_) => OriginTag::FromPageWorld,
            ChannelMessage::FromControllerWorld(_) => OriginTag::FromControllerWorld,
            ChannelMessage::ControllerRelay { .. } => OriginTag::ControllerRelay,
            ChannelMessage::FromPopup(_) => OriginTag::FromPopup,
        }
    }

    pub fn key(&self) -> CallKey {
        match self {
            ChannelMessage::FromPageWorld(request)
            | ChannelMessage::FromControllerWorld(request)
            | ChannelMessage::ControllerRelay { data: request } => request.key(),
            ChannelMessage::FromPopup(decision) => decision.key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign_request() -> PageRequest {
        PageRequest {
            context: PageContextId(7),
            id: RequestId(1),
            envelope: RequestEnvelope {
                method: "sign_message".to_string(),
                params: json!({ "message": "abc123" }),
            },
        }
    }

    #[test]
    fn page_request_keeps_method_and_params_at_top_level() {
        let value = serde_json::to_value(sign_request()).unwrap();
        assert_eq!(
            value,
            json!({
                "context": 7,
                "id": 1,
                "method": "sign_message",
                "params": { "message": "abc123" },
            })
        );
    }

    #[test]
    fn channel_message_is_tagged_by_origin() {
        let value = serde_json::to_value(ChannelMessage::FromPageWorld(sign_request())).unwrap();
        assert_eq!(value["origin"], "from-page-world");
        assert_eq!(value["method"], "sign_message");

        let echo: ChannelMessage = serde_json::from_value(json!({
            "origin": "from-controller-world",
            "context": 7,
            "id": 1,
            "method": "sign_message",
            "params": null,
        }))
        .unwrap();
        assert_eq!(echo.origin(), OriginTag::FromControllerWorld);
    }

    #[test]
    fn delegation_wraps_request_in_data() {
        let message = ChannelMessage::ControllerRelay {
            data: sign_request(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["origin"], "controller-relay");
        assert_eq!(value["data"]["params"]["message"], "abc123");

        let back: ChannelMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn popup_decision_parses_success_envelope() {
        let message: ChannelMessage = serde_json::from_value(json!({
            "origin": "from-popup",
            "context": 7,
            "id": 1,
            "response": { "status": "SUCCESS", "result": { "signature": "3045" } },
        }))
        .unwrap();

        let ChannelMessage::FromPopup(decision) = message else {
            panic!("expected popup decision");
        };
        assert_eq!(
            decision.response,
            ResponseEnvelope::success(json!({ "signature": "3045" }))
        );
    }

    #[test]
    fn reply_payload_accepts_both_generations() {
        let raw = ResponseEnvelope::from_reply_payload(json!({ "signature": "3045" }));
        assert_eq!(raw, ResponseEnvelope::success(json!({ "signature": "3045" })));

        let error = ResponseEnvelope::from_reply_payload(json!({
            "status": "ERROR",
            "error": "User rejected",
        }));
        assert_eq!(
            error,
            ResponseEnvelope::Error {
                error: "User rejected".to_string(),
                code: None,
            }
        );

        // A result that merely has a `status` field is still a result.
        let odd = ResponseEnvelope::from_reply_payload(json!({ "status": "pending" }));
        assert!(odd.is_success());
    }

    #[test]
    fn envelope_shaped_result_reads_back_as_the_envelope() {
        let approved = ResponseEnvelope::success(json!({
            "status": "ERROR",
            "error": "x",
        }));
        let payload = approved.into_reply_payload();
        assert_eq!(
            ResponseEnvelope::from_reply_payload(payload),
            ResponseEnvelope::Error {
                error: "x".to_string(),
                code: None,
            }
        );

        let approved = ResponseEnvelope::success(json!({
            "status": "SUCCESS",
            "result": 7,
        }));
        assert_eq!(
            ResponseEnvelope::from_reply_payload(approved.into_reply_payload()),
            ResponseEnvelope::success(json!(7))
        );
    }

    #[test]
    fn error_reply_payload_is_the_envelope() {
        let payload = ResponseEnvelope::error(codes::DISCONNECTED, "communication failed")
            .into_reply_payload();
        assert_eq!(
            payload,
            json!({ "status": "ERROR", "error": "communication failed", "code": 4900 })
        );

        let success = ResponseEnvelope::success(json!("0xabc")).into_reply_payload();
        assert_eq!(success, json!("0xabc"));
    }
}
