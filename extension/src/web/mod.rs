// Browser glue
// One wasm module, four entry points: page, content script, background, popup

pub mod background;
mod chrome;
pub mod content;
pub mod page;
pub mod popup;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Once;
use std::time::Duration;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{CustomEvent, CustomEventInit};

use crate::config::EventNames;
use crate::error::TransportError;
use crate::platform::{PageEventSink, Timer};
use crate::protocol::PageEvent;

static LOGGER: Once = Once::new();

fn init_logging() {
    LOGGER.call_once(|| wasm_logger::init(wasm_logger::Config::default()));
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let json = serde_json::to_string(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))?;
    js_sys::JSON::parse(&json)
}

fn from_js<T: DeserializeOwned>(value: &JsValue) -> Result<T, JsValue> {
    let json = if value.is_undefined() {
        "null".to_string()
    } else {
        String::from(js_sys::JSON::stringify(value)?)
    };
    serde_json::from_str(&json).map_err(|e| JsValue::from_str(&format!("Parse error: {}", e)))
}

fn js_error_text(error: &JsValue) -> String {
    error
        .as_string()
        .or_else(|| {
            js_sys::Reflect::get(error, &"message".into())
                .ok()
                .and_then(|message| message.as_string())
        })
        .unwrap_or_else(|| format!("{:?}", error))
}

async fn await_promise(promise: Result<js_sys::Promise, JsValue>) -> Result<JsValue, JsValue> {
    JsFuture::from(promise?).await
}

struct GlooTimer;

impl Timer for GlooTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        gloo_timers::future::sleep(duration).boxed_local()
    }
}

/// Page-local events as `CustomEvent`s on `window`, detail as a JSON string
/// so it survives the page / isolated-world boundary.
struct WindowEventSink {
    events: EventNames,
}

impl PageEventSink for WindowEventSink {
    fn dispatch(&self, event: PageEvent) -> Result<(), TransportError> {
        let (name, detail) = match &event {
            PageEvent::Request(request) => (&self.events.request, serde_json::to_string(request)),
            PageEvent::Reply(reply) => (&self.events.response, serde_json::to_string(reply)),
        };
        let detail = detail.map_err(|e| TransportError::Malformed(e.to_string()))?;

        let window = web_sys::window()
            .ok_or_else(|| TransportError::ContextInvalidated("no window".to_string()))?;
        let init = CustomEventInit::new();
        init.set_detail(&JsValue::from_str(&detail));
        let custom = CustomEvent::new_with_event_init_dict(name, &init)
            .map_err(|e| TransportError::ContextInvalidated(js_error_text(&e)))?;
        window
            .dispatch_event(&custom)
            .map_err(|e| TransportError::ContextInvalidated(js_error_text(&e)))?;
        Ok(())
    }
}

/// Listen for page-local event `name`, decoding its JSON detail as `T`.
fn listen<T, F>(name: &str, handler: F) -> Result<(), JsValue>
where
    T: DeserializeOwned + 'static,
    F: Fn(T) + 'static,
{
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
    let callback = Closure::wrap(Box::new(move |event: web_sys::Event| {
        let detail = event
            .dyn_ref::<CustomEvent>()
            .and_then(|custom| custom.detail().as_string());
        let Some(detail) = detail else {
            log::debug!("Ignoring page event without detail");
            return;
        };
        match serde_json::from_str::<T>(&detail) {
            Ok(decoded) => handler(decoded),
            Err(e) => log::debug!("Ignoring malformed page event: {}", e),
        }
    }) as Box<dyn FnMut(web_sys::Event)>);

    window.add_event_listener_with_callback(name, callback.as_ref().unchecked_ref())?;
    callback.forget();
    Ok(())
}
