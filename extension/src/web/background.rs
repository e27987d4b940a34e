// Background service worker entry
// Runtime messages and window events feed the controller

use async_trait::async_trait;
use serde_json::json;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;

use super::{await_promise, chrome, from_js, init_logging, js_error_text, to_js, GlooTimer};
use crate::config::BridgeConfig;
use crate::controller::Controller;
use crate::error::PlatformError;
use crate::platform::{PopupSpec, WindowId, WindowInfo, WindowPlatform};
use crate::protocol::ChannelMessage;

/// `chrome.windows` plus runtime messaging into the popup.
struct ChromeWindows;

#[async_trait(?Send)]
impl WindowPlatform for ChromeWindows {
    async fn all_windows(&self) -> Result<Vec<WindowInfo>, PlatformError> {
        let query_error = |e: JsValue| PlatformError::Query(js_error_text(&e));
        let query = to_js(&json!({ "populate": false })).map_err(query_error)?;
        let windows = await_promise(chrome::get_all_windows(&query))
            .await
            .map_err(query_error)?;
        from_js(&windows).map_err(query_error)
    }

    async fn last_focused(&self) -> Result<WindowInfo, PlatformError> {
        let query_error = |e: JsValue| PlatformError::Query(js_error_text(&e));
        let window = await_promise(chrome::get_last_focused_window())
            .await
            .map_err(query_error)?;
        from_js(&window).map_err(query_error)
    }

    async fn create_popup(&self, spec: PopupSpec) -> Result<WindowInfo, PlatformError> {
        let create_error = |e: JsValue| PlatformError::Create(js_error_text(&e));
        let data = to_js(&json!({
            "url": chrome::get_url(&spec.url),
            "type": "popup",
            "focused": true,
            "left": spec.bounds.left,
            "top": spec.bounds.top,
            "width": spec.bounds.width,
            "height": spec.bounds.height,
        }))
        .map_err(create_error)?;

        let window = await_promise(chrome::create_window(&data))
            .await
            .map_err(create_error)?;
        if window.is_undefined() || window.is_null() {
            return Err(PlatformError::Create("browser returned no window".to_string()));
        }
        from_js(&window).map_err(create_error)
    }

    async fn focus(&self, id: WindowId) -> Result<(), PlatformError> {
        let focus_error = |e: JsValue| PlatformError::Focus(js_error_text(&e));
        let info = to_js(&json!({ "focused": true })).map_err(focus_error)?;
        await_promise(chrome::update_window(id, &info))
            .await
            .map_err(focus_error)?;
        Ok(())
    }

    async fn send_to_popup(&self, message: ChannelMessage) -> Result<(), PlatformError> {
        let deliver_error = |e: JsValue| PlatformError::Deliver(js_error_text(&e));
        let payload = to_js(&message).map_err(deliver_error)?;
        // Rejects with "Receiving end does not exist" if the popup never loaded.
        await_promise(chrome::send_message(&payload))
            .await
            .map_err(deliver_error)?;
        Ok(())
    }
}

#[wasm_bindgen(js_name = startBackground)]
pub fn start_background() {
    init_logging();
    let config = BridgeConfig::bundled();
    let controller = Controller::new(Rc::new(ChromeWindows), Rc::new(GlooTimer), config.popup);

    let on_message = {
        let controller = controller.clone();
        Closure::wrap(Box::new(
            move |message: JsValue, _sender: JsValue, send_response: js_sys::Function| -> bool {
                let message: ChannelMessage = match from_js(&message) {
                    Ok(message) => message,
                    Err(_) => return false,
                };
                if !Controller::accepts(&message) {
                    log::debug!("Ignoring {:?} message", message.origin());
                    return false;
                }

                let controller = controller.clone();
                spawn_local(async move {
                    let answer = match controller.handle_message(message).await {
                        Some(response) => to_js(&response),
                        None => Ok(JsValue::TRUE),
                    };
                    let sent = answer.and_then(|answer| send_response.call1(&JsValue::NULL, &answer));
                    if let Err(e) = sent {
                        log::warn!("⚠️ Could not answer runtime message: {}", js_error_text(&e));
                    }
                });
                // Keeps sendResponse alive until the popup has answered.
                true
            },
        ) as Box<dyn FnMut(JsValue, JsValue, js_sys::Function) -> bool>)
    };
    chrome::add_message_listener(on_message.as_ref().unchecked_ref());
    on_message.forget();

    let on_removed = Closure::wrap(Box::new(move |window_id: i32| {
        let controller = controller.clone();
        spawn_local(async move {
            controller.on_window_removed(window_id).await;
        });
    }) as Box<dyn FnMut(i32)>);
    chrome::add_window_removed_listener(on_removed.as_ref().unchecked_ref());
    on_removed.forget();

    log::info!("🚀 Wallet bridge background started");
}
