// Page-world provider exported to web pages

use serde_json::Value;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use super::{from_js, init_logging, listen, to_js, GlooTimer, WindowEventSink};
use crate::config::BridgeConfig;
use crate::protocol::{PageContextId, PageEvent, PageReply};
use crate::provider::{PageProvider, Provider};

#[wasm_bindgen]
pub struct WalletProvider {
    page: PageProvider,
}

#[wasm_bindgen]
impl WalletProvider {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WalletProvider, JsValue> {
        init_logging();
        let config = BridgeConfig::bundled();

        let sink = Rc::new(WindowEventSink {
            events: config.events.clone(),
        });
        let provider = Provider::new(sink, Rc::new(GlooTimer), config.provider.clone());

        let listener = provider.clone();
        listen::<PageReply, _>(&config.events.response, move |reply| {
            listener.handle_page_event(PageEvent::Reply(reply))
        })?;

        // Tells tabs apart at the controller; 53 bits keeps it exact in JS.
        let context = PageContextId((js_sys::Math::random() * 9_007_199_254_740_992.0) as u64);
        log::info!("🚀 Wallet provider ready (page {})", context.0);

        Ok(WalletProvider {
            page: provider.page(context),
        })
    }

    /// `request(method, params)`: resolves with the approved result or
    /// rejects with `{ message, code }`.
    pub fn request(&self, method: String, params: JsValue) -> js_sys::Promise {
        let page = self.page.clone();
        future_to_promise(async move {
            let params: Value = from_js(&params)?;
            match page.request(method, params).await {
                Ok(result) => to_js(&result),
                Err(e) => Err(to_js(&e.to_rpc_error())?),
            }
        })
    }

    #[wasm_bindgen(js_name = isPending)]
    pub fn is_pending(&self) -> bool {
        self.page.is_pending()
    }
}
