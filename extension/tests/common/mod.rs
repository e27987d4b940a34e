// In-memory browser for driving the bridge hops in tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::future::LocalBoxFuture;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use wallet_bridge_extension::config::BridgeConfig;
use wallet_bridge_extension::platform::{
    BackgroundChannel, PageEventSink, PopupSpec, Timer, WindowId, WindowInfo, WindowKind,
    WindowPlatform,
};
use wallet_bridge_extension::protocol::{
    ChannelMessage, PageContextId, PageEvent, PageRequest, RequestEnvelope, RequestId,
    ResponseEnvelope,
};
use wallet_bridge_extension::{ApprovalSession, Controller, PlatformError, Provider, Relay, TransportError};

pub const BROWSER_WINDOW: WindowId = 1;

pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed_local()
    }
}

/// Let spawned tasks run to quiescence.
pub async fn settle_tasks() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Window manager with one normal browser window; popup deliveries land in
/// the receiver returned by `new`.
pub struct FakeWindows {
    windows: RefCell<Vec<WindowInfo>>,
    next_id: Cell<WindowId>,
    pub created: RefCell<Vec<PopupSpec>>,
    pub focused: RefCell<Vec<WindowId>>,
    pub fail_create: Cell<bool>,
    pub fail_delivery: Cell<bool>,
    pub fail_last_focused: Cell<bool>,
    inbox: mpsc::UnboundedSender<ChannelMessage>,
}

impl FakeWindows {
    pub fn new() -> (Rc<Self>, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (tx, rx) = mpsc::unbounded();
        let windows = FakeWindows {
            windows: RefCell::new(vec![WindowInfo {
                id: BROWSER_WINDOW,
                kind: WindowKind::Normal,
                left: 100,
                top: 50,
                width: 1280,
                height: 800,
            }]),
            next_id: Cell::new(100),
            created: RefCell::new(Vec::new()),
            focused: RefCell::new(Vec::new()),
            fail_create: Cell::new(false),
            fail_delivery: Cell::new(false),
            fail_last_focused: Cell::new(false),
            inbox: tx,
        };
        (Rc::new(windows), rx)
    }

    /// The user closes a window (the controller is not told).
    pub fn close(&self, id: WindowId) {
        self.windows.borrow_mut().retain(|window| window.id != id);
    }

    pub fn popups(&self) -> Vec<WindowInfo> {
        self.windows
            .borrow()
            .iter()
            .filter(|window| window.kind == WindowKind::Popup)
            .cloned()
            .collect()
    }
}

#[async_trait(?Send)]
impl WindowPlatform for FakeWindows {
    async fn all_windows(&self) -> Result<Vec<WindowInfo>, PlatformError> {
        Ok(self.windows.borrow().clone())
    }

    async fn last_focused(&self) -> Result<WindowInfo, PlatformError> {
        if self.fail_last_focused.get() {
            return Err(PlatformError::Query("no focused window".to_string()));
        }
        self.windows
            .borrow()
            .iter()
            .find(|window| window.id == BROWSER_WINDOW)
            .cloned()
            .ok_or_else(|| PlatformError::Query("browser window gone".to_string()))
    }

    async fn create_popup(&self, spec: PopupSpec) -> Result<WindowInfo, PlatformError> {
        if self.fail_create.get() {
            return Err(PlatformError::Create("window limit reached".to_string()));
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let window = WindowInfo {
            id,
            kind: WindowKind::Popup,
            left: spec.bounds.left,
            top: spec.bounds.top,
            width: spec.bounds.width,
            height: spec.bounds.height,
        };
        self.created.borrow_mut().push(spec);
        self.windows.borrow_mut().push(window.clone());
        Ok(window)
    }

    async fn focus(&self, id: WindowId) -> Result<(), PlatformError> {
        if !self.windows.borrow().iter().any(|window| window.id == id) {
            return Err(PlatformError::Focus(format!("no window {}", id)));
        }
        self.focused.borrow_mut().push(id);
        Ok(())
    }

    async fn send_to_popup(&self, message: ChannelMessage) -> Result<(), PlatformError> {
        if self.fail_delivery.get() {
            return Err(PlatformError::Deliver(
                "Receiving end does not exist.".to_string(),
            ));
        }
        self.inbox
            .unbounded_send(message)
            .map_err(|e| PlatformError::Deliver(e.to_string()))
    }
}

pub fn controller(windows: Rc<FakeWindows>) -> Controller {
    Controller::new(windows, Rc::new(TokioTimer), BridgeConfig::default().popup)
}

pub fn page_request(context: u64, id: u64, method: &str, params: Value) -> PageRequest {
    PageRequest {
        context: PageContextId(context),
        id: RequestId(id),
        envelope: RequestEnvelope {
            method: method.to_string(),
            params,
        },
    }
}

/// Plays the popup: waits for the next delivery and answers it.
pub struct PopupDriver {
    inbox: mpsc::UnboundedReceiver<ChannelMessage>,
    session: ApprovalSession,
    controller: Controller,
}

impl PopupDriver {
    pub fn new(inbox: mpsc::UnboundedReceiver<ChannelMessage>, controller: Controller) -> Self {
        Self {
            inbox,
            session: ApprovalSession::new(),
            controller,
        }
    }

    pub async fn next_request(&mut self) -> PageRequest {
        let message = self.inbox.next().await.expect("popup inbox closed");
        self.session
            .receive(message)
            .cloned()
            .expect("controller delivered something other than a request")
    }

    pub fn try_next_request(&mut self) -> Option<PageRequest> {
        let message = self.inbox.try_recv().ok()?;
        self.session.receive(message).cloned()
    }

    pub async fn approve(&mut self, result: Value) {
        let decision = self.session.approve(result).expect("nothing to approve");
        assert!(self.controller.handle_message(decision).await.is_none());
    }

    pub async fn reject(&mut self, reason: &str) {
        let decision = self.session.reject(reason).expect("nothing to reject");
        assert!(self.controller.handle_message(decision).await.is_none());
    }
}

/// Page event bus leg: forwards dispatched events into a channel.
struct BusSink(mpsc::UnboundedSender<PageEvent>);

impl PageEventSink for BusSink {
    fn dispatch(&self, event: PageEvent) -> Result<(), TransportError> {
        self.0
            .unbounded_send(event)
            .map_err(|e| TransportError::ContextInvalidated(e.to_string()))
    }
}

/// Runtime channel from the content script straight into the controller.
/// `disconnect` simulates an extension reload.
pub struct ControllerLink {
    controller: Controller,
    connected: Cell<bool>,
}

impl ControllerLink {
    pub fn disconnect(&self) {
        self.connected.set(false);
    }
}

#[async_trait(?Send)]
impl BackgroundChannel for ControllerLink {
    async fn send(&self, message: ChannelMessage) -> Result<ResponseEnvelope, TransportError> {
        if !self.connected.get() {
            return Err(TransportError::ContextInvalidated(
                "Extension context invalidated.".to_string(),
            ));
        }
        self.controller
            .handle_message(message)
            .await
            .ok_or(TransportError::NoReceiver)
    }
}

/// All three hops wired together. Must be built inside a `LocalSet`.
pub struct Pipeline {
    pub provider: Provider,
    pub controller: Controller,
    pub link: Rc<ControllerLink>,
    pub windows: Rc<FakeWindows>,
    pub popup: PopupDriver,
}

impl Pipeline {
    pub fn new() -> Self {
        let config = BridgeConfig::default();
        let (windows, inbox) = FakeWindows::new();
        let controller = Controller::new(windows.clone(), Rc::new(TokioTimer), config.popup);

        let (to_relay, mut relay_events) = mpsc::unbounded();
        let (to_page, mut page_events) = mpsc::unbounded();

        let provider = Provider::new(
            Rc::new(BusSink(to_relay)),
            Rc::new(TokioTimer),
            config.provider,
        );
        let link = Rc::new(ControllerLink {
            controller: controller.clone(),
            connected: Cell::new(true),
        });
        let relay = Relay::new(link.clone(), Rc::new(BusSink(to_page)));

        tokio::task::spawn_local(async move {
            while let Some(event) = relay_events.next().await {
                let relay = relay.clone();
                tokio::task::spawn_local(async move { relay.handle_page_event(event).await });
            }
        });

        let listener = provider.clone();
        tokio::task::spawn_local(async move {
            while let Some(event) = page_events.next().await {
                listener.handle_page_event(event);
            }
        });

        Pipeline {
            provider,
            popup: PopupDriver::new(inbox, controller.clone()),
            controller,
            link,
            windows,
        }
    }
}
