// Content-script entry: page events in, runtime messages out

use async_trait::async_trait;
use serde_json::Value;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use super::{await_promise, chrome, from_js, init_logging, js_error_text, listen, to_js, WindowEventSink};
use crate::config::BridgeConfig;
use crate::error::TransportError;
use crate::platform::BackgroundChannel;
use crate::protocol::{ChannelMessage, PageEvent, PageRequest, ResponseEnvelope};
use crate::relay::Relay;

/// `chrome.runtime.sendMessage` to the background service worker.
struct RuntimeChannel;

#[async_trait(?Send)]
impl BackgroundChannel for RuntimeChannel {
    async fn send(&self, message: ChannelMessage) -> Result<ResponseEnvelope, TransportError> {
        let payload = to_js(&message).map_err(|e| TransportError::Malformed(js_error_text(&e)))?;

        // Throws synchronously once the extension has been reloaded.
        let response = await_promise(chrome::send_message(&payload))
            .await
            .map_err(|e| TransportError::ContextInvalidated(js_error_text(&e)))?;
        if response.is_undefined() || response.is_null() {
            return Err(TransportError::NoReceiver);
        }

        let payload: Value =
            from_js(&response).map_err(|e| TransportError::Malformed(js_error_text(&e)))?;
        Ok(ResponseEnvelope::from_reply_payload(payload))
    }
}

#[wasm_bindgen(js_name = startContentRelay)]
pub fn start_content_relay() -> Result<(), JsValue> {
    init_logging();
    let config = BridgeConfig::bundled();

    let relay = Relay::new(
        Rc::new(RuntimeChannel),
        Rc::new(WindowEventSink {
            events: config.events.clone(),
        }),
    );

    listen::<PageRequest, _>(&config.events.request, move |request| {
        let relay = relay.clone();
        spawn_local(async move {
            relay.handle_page_event(PageEvent::Request(request)).await;
        });
    })?;

    log::info!("🚀 Content relay listening on '{}'", config.events.request);
    Ok(())
}
