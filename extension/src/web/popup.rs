// Popup entry: receives delegated requests, sends the user's decision

use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{chrome, from_js, init_logging, js_error_text, to_js};
use crate::popup::ApprovalSession;
use crate::protocol::ChannelMessage;

#[wasm_bindgen]
pub struct PopupBridge {
    session: Rc<RefCell<ApprovalSession>>,
}

#[wasm_bindgen]
impl PopupBridge {
    /// `on_request` is called with each request delivered for approval.
    #[wasm_bindgen(constructor)]
    pub fn new(on_request: js_sys::Function) -> PopupBridge {
        init_logging();
        let session = Rc::new(RefCell::new(ApprovalSession::new()));

        let listener_session = session.clone();
        let on_message = Closure::wrap(Box::new(
            move |message: JsValue, _sender: JsValue, send_response: js_sys::Function| -> bool {
                let Ok(message) = from_js::<ChannelMessage>(&message) else {
                    return false;
                };
                let shown = listener_session.borrow_mut().receive(message).cloned();
                let Some(request) = shown else {
                    return false;
                };

                let notified = to_js(&request).and_then(|request| on_request.call1(&JsValue::NULL, &request));
                if let Err(e) = notified {
                    log::error!("❌ Approval UI rejected request: {}", js_error_text(&e));
                }
                if let Err(e) = send_response.call1(&JsValue::NULL, &JsValue::TRUE) {
                    log::warn!("⚠️ Could not acknowledge delivery: {}", js_error_text(&e));
                }
                false
            },
        ) as Box<dyn FnMut(JsValue, JsValue, js_sys::Function) -> bool>);
        chrome::add_message_listener(on_message.as_ref().unchecked_ref());
        on_message.forget();

        log::info!("🚀 Popup bridge ready");
        PopupBridge { session }
    }

    #[wasm_bindgen(js_name = currentRequest)]
    pub fn current_request(&self) -> Result<JsValue, JsValue> {
        match self.session.borrow().current() {
            Some(request) => to_js(request),
            None => Ok(JsValue::NULL),
        }
    }

    pub fn approve(&self, result: JsValue) -> Result<js_sys::Promise, JsValue> {
        let result = from_js(&result)?;
        let decision = self.session.borrow_mut().approve(result);
        Self::send(decision)
    }

    pub fn reject(&self, reason: String) -> Result<js_sys::Promise, JsValue> {
        let decision = self.session.borrow_mut().reject(reason);
        Self::send(decision)
    }
}

impl PopupBridge {
    fn send(decision: Option<ChannelMessage>) -> Result<js_sys::Promise, JsValue> {
        let decision = decision.ok_or_else(|| JsValue::from_str("No request awaiting approval"))?;
        chrome::send_message(&to_js(&decision)?)
    }
}
