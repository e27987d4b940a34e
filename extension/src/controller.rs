// Background controller
// Owns the approval popup and serializes requests through it
//
// Flow per request:
// 1. Filter echoes by origin tag
// 2. Queue the request with its reply channel
// 3. Find the remembered popup (focus it) or open a new one
// 4. After a settle delay, deliver the request into the popup
// 5. Route the popup's decision back to the captured reply channel

use futures::channel::oneshot;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::config::PopupConfig;
use crate::error::PlatformError;
use crate::platform::{Bounds, PopupSpec, Timer, WindowId, WindowInfo, WindowKind, WindowPlatform};
use crate::protocol::{
    codes, CallKey, ChannelMessage, PageRequest, PopupDecision, ResponseEnvelope,
};

/// A request waiting for (or being shown in) the popup.
struct InFlight {
    request: PageRequest,
    reply: oneshot::Sender<ResponseEnvelope>,
    /// Set once the popup has accepted the delivery.
    shown: bool,
}

#[derive(Default)]
struct ControllerState {
    popup: Option<WindowId>,
    active: Option<InFlight>,
    queue: VecDeque<InFlight>,
    delivering: bool,
}

/// Point-in-time view of the controller, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub popup: Option<WindowId>,
    pub active: Option<CallKey>,
    pub queued: usize,
}

struct ControllerInner {
    platform: Rc<dyn WindowPlatform>,
    timer: Rc<dyn Timer>,
    config: PopupConfig,
    state: RefCell<ControllerState>,
}

#[derive(Clone)]
pub struct Controller {
    inner: Rc<ControllerInner>,
}

impl Controller {
    pub fn new(platform: Rc<dyn WindowPlatform>, timer: Rc<dyn Timer>, config: PopupConfig) -> Self {
        Self {
            inner: Rc::new(ControllerInner {
                platform,
                timer,
                config,
                state: RefCell::new(ControllerState::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = self.inner.state.borrow();
        ControllerSnapshot {
            popup: state.popup,
            active: state.active.as_ref().map(|flight| flight.request.key()),
            queued: state.queue.len(),
        }
    }

    /// Whether `message` is meant for the controller. Echoes of the
    /// controller's own output are not.
    pub fn accepts(message: &ChannelMessage) -> bool {
        matches!(
            message,
            ChannelMessage::FromPageWorld(_) | ChannelMessage::FromPopup(_)
        )
    }

    /// Process one runtime message. Page requests resolve to the response
    /// for the relay; popup decisions and ignored messages resolve to `None`.
    pub async fn handle_message(&self, message: ChannelMessage) -> Option<ResponseEnvelope> {
        match message {
            ChannelMessage::FromPageWorld(request) => Some(self.handle_request(request).await),
            ChannelMessage::FromPopup(decision) => {
                self.handle_decision(decision).await;
                None
            }
            echo => {
                log::debug!("Ignoring {:?} echo for {}", echo.origin(), echo.key());
                None
            }
        }
    }

    async fn handle_request(&self, request: PageRequest) -> ResponseEnvelope {
        let key = request.key();
        log::info!("📥 Request '{}' from {}", request.envelope.method, key);

        let (tx, rx) = oneshot::channel();
        let idle = {
            let mut state = self.inner.state.borrow_mut();
            state.queue.push_back(InFlight {
                request,
                reply: tx,
                shown: false,
            });
            state.active.is_none()
        };
        if idle {
            self.advance().await;
        } else {
            log::debug!("Popup busy, {} queued", key);
        }

        match rx.await {
            Ok(response) => response,
            Err(oneshot::Canceled) => {
                ResponseEnvelope::error(codes::DISCONNECTED, "request dropped by the controller")
            }
        }
    }

    async fn handle_decision(&self, decision: PopupDecision) {
        let key = decision.key();
        if self.settle(key, decision.response) {
            log::info!("✅ Popup answered {}", key);
            self.advance().await;
        } else {
            log::warn!("⚠️ Popup answered {} which is not being shown", key);
        }
    }

    /// The browser reports a closed window. A request the user was looking
    /// at is rejected; one still on its way goes back to the front of the
    /// queue and is delivered into a fresh popup.
    pub async fn on_window_removed(&self, id: WindowId) {
        let shown = {
            let mut state = self.inner.state.borrow_mut();
            if state.popup != Some(id) {
                return;
            }
            state.popup = None;
            match state.active.take() {
                Some(flight) if flight.shown => {
                    let key = flight.request.key();
                    state.active = Some(flight);
                    Some(key)
                }
                Some(flight) => {
                    log::debug!("{} was not shown yet, requeueing", flight.request.key());
                    state.queue.push_front(flight);
                    None
                }
                None => None,
            }
        };

        log::info!("🪟 Approval popup {} closed", id);
        if let Some(key) = shown {
            self.settle(
                key,
                ResponseEnvelope::error(codes::USER_REJECTED, "approval window closed"),
            );
        }
        self.advance().await;
    }

    /// Answer the active request if it is `key`. Returns whether it was.
    fn settle(&self, key: CallKey, response: ResponseEnvelope) -> bool {
        let flight = {
            let mut state = self.inner.state.borrow_mut();
            match &state.active {
                Some(flight) if flight.request.key() == key => state.active.take(),
                _ => None,
            }
        };

        match flight {
            Some(flight) => {
                if flight.reply.send(response).is_err() {
                    log::debug!("Reply channel for {} already closed", key);
                }
                true
            }
            None => false,
        }
    }

    /// Deliver queued requests into the popup, one at a time. Only one
    /// delivery runs at once; the loop stops while a request awaits the user.
    async fn advance(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.delivering {
                return;
            }
            state.delivering = true;
        }
        let _delivering = DeliveryGuard(self);

        loop {
            let request = {
                let mut state = self.inner.state.borrow_mut();
                if state.active.is_some() {
                    break;
                }
                let Some(next) = state.queue.pop_front() else {
                    break;
                };
                let request = next.request.clone();
                state.active = Some(next);
                request
            };

            let key = request.key();
            match self.deliver(&request).await {
                Ok(()) => {
                    let mut state = self.inner.state.borrow_mut();
                    match state.active.as_mut() {
                        Some(flight) if flight.request.key() == key => flight.shown = true,
                        // closed mid-send and requeued; the loop delivers it again
                        _ => {}
                    }
                }
                Err(e) if self.is_requeued(key) => {
                    log::debug!("Delivery of {} interrupted: {}", key, e);
                }
                Err(e) => {
                    log::warn!("❌ Could not show {} in the popup: {}", key, e);
                    self.settle(
                        key,
                        ResponseEnvelope::error(
                            codes::DISCONNECTED,
                            format!("approval window unavailable: {}", e),
                        ),
                    );
                }
            }
        }
    }

    /// Whether `key` was pulled back into the queue while being delivered.
    fn is_requeued(&self, key: CallKey) -> bool {
        let state = self.inner.state.borrow();
        state
            .queue
            .front()
            .is_some_and(|flight| flight.request.key() == key)
    }

    async fn deliver(&self, request: &PageRequest) -> Result<(), PlatformError> {
        let (popup, settle) = self.locate_popup().await?;
        self.inner.timer.sleep(settle).await;

        if self.inner.state.borrow().popup != Some(popup) {
            return Err(PlatformError::Deliver(format!(
                "popup {} closed before delivery",
                popup
            )));
        }

        log::debug!("📤 Delivering {} to popup", request.key());
        self.inner
            .platform
            .send_to_popup(ChannelMessage::ControllerRelay {
                data: request.clone(),
            })
            .await
    }

    /// Focus the remembered popup if it still exists, otherwise open a new
    /// one. Returns the popup and how long to wait before it can take
    /// messages.
    async fn locate_popup(&self) -> Result<(WindowId, Duration), PlatformError> {
        let platform = &self.inner.platform;
        let remembered = self.inner.state.borrow().popup;

        if let Some(id) = remembered {
            let windows = platform.all_windows().await?;
            let alive = windows
                .iter()
                .any(|window| window.id == id && window.kind == WindowKind::Popup);
            if alive {
                platform.focus(id).await?;
                log::info!("🔍 Focused approval popup {}", id);
                return Ok((id, self.inner.config.refocus_settle()));
            }
            log::debug!("Remembered popup {} no longer exists", id);
            self.inner.state.borrow_mut().popup = None;
        }

        let anchor = match platform.last_focused().await {
            Ok(window) => Some(window),
            Err(e) => {
                log::warn!("⚠️ No focused window to anchor the popup: {}", e);
                None
            }
        };
        let spec = PopupSpec {
            url: self.inner.config.page.clone(),
            bounds: popup_bounds(&self.inner.config, anchor.as_ref()),
        };

        let window = platform.create_popup(spec).await?;
        log::info!("🪟 Opened approval popup {}", window.id);
        self.inner.state.borrow_mut().popup = Some(window.id);
        Ok((window.id, self.inner.config.create_settle()))
    }
}

struct DeliveryGuard<'a>(&'a Controller);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.state.borrow_mut().delivering = false;
    }
}

/// Where a new popup goes: right-aligned inside `anchor`, shifted by the
/// configured offsets.
///
/// Screen size is not known here, so "on screen" only means the origin is
/// never negative and never left of the anchor. The right and bottom edges
/// are not clamped: a popup wider than its anchor overhangs it on the right.
pub fn popup_bounds(config: &PopupConfig, anchor: Option<&WindowInfo>) -> Bounds {
    let (width, height) = (config.width, config.height);
    let Some(anchor) = anchor else {
        return Bounds {
            left: config.offset_x.max(0),
            top: config.offset_y.max(0),
            width,
            height,
        };
    };

    let left = (anchor.left + anchor.width - width - config.offset_x)
        .max(anchor.left)
        .max(0);
    let top = (anchor.top + config.offset_y).max(0);

    Bounds {
        left,
        top,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(left: i32, top: i32, width: i32, height: i32) -> WindowInfo {
        WindowInfo {
            id: 1,
            kind: WindowKind::Normal,
            left,
            top,
            width,
            height,
        }
    }

    #[test]
    fn popup_sits_at_top_right_of_anchor() {
        let config = PopupConfig::default();
        let bounds = popup_bounds(&config, Some(&window(100, 50, 1280, 800)));
        assert_eq!(
            bounds,
            Bounds {
                left: 100 + 1280 - 360 - 20,
                top: 50 + 80,
                width: 360,
                height: 620,
            }
        );
    }

    #[test]
    fn narrow_anchor_keeps_popup_on_its_left_edge() {
        let config = PopupConfig::default();
        let bounds = popup_bounds(&config, Some(&window(200, 0, 300, 400)));
        assert_eq!(bounds.left, 200);
    }

    #[test]
    fn popup_never_goes_off_screen() {
        let config = PopupConfig::default();
        let bounds = popup_bounds(&config, Some(&window(-500, -200, 400, 300)));
        assert_eq!((bounds.left, bounds.top), (0, 0));
    }

    #[test]
    fn right_and_bottom_edges_are_not_clamped() {
        let config = PopupConfig::default();
        let anchor = window(0, 0, 200, 100);
        let bounds = popup_bounds(&config, Some(&anchor));
        assert_eq!((bounds.left, bounds.top), (0, 80));
        assert!(bounds.left + bounds.width > anchor.left + anchor.width);
        assert!(bounds.top + bounds.height > anchor.top + anchor.height);
    }

    #[test]
    fn without_anchor_uses_offsets() {
        let config = PopupConfig::default();
        let bounds = popup_bounds(&config, None);
        assert_eq!((bounds.left, bounds.top), (20, 80));
    }

    #[test]
    fn only_page_requests_and_decisions_are_accepted() {
        use crate::protocol::{PageContextId, RequestEnvelope, RequestId};

        let request = PageRequest {
            context: PageContextId(1),
            id: RequestId(1),
            envelope: RequestEnvelope {
                method: "connect".to_string(),
                params: serde_json::Value::Null,
            },
        };
        assert!(Controller::accepts(&ChannelMessage::FromPageWorld(
            request.clone()
        )));
        assert!(!Controller::accepts(&ChannelMessage::FromControllerWorld(
            request.clone()
        )));
        assert!(!Controller::accepts(&ChannelMessage::ControllerRelay {
            data: request
        }));
    }
}
