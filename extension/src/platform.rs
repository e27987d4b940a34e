// Seams between the relay hops and the browser
// Every hop reaches its environment only through these traits

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PlatformError, TransportError};
use crate::protocol::{ChannelMessage, PageEvent, ResponseEnvelope};

pub type WindowId = i32;

pub trait Timer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Emits page-local events (the window event bus shared by the page script
/// and the content script).
pub trait PageEventSink {
    fn dispatch(&self, event: PageEvent) -> Result<(), TransportError>;
}

/// Cross-context channel from the content script to the background.
#[async_trait(?Send)]
pub trait BackgroundChannel {
    /// Send one message and wait for its single reply.
    async fn send(&self, message: ChannelMessage) -> Result<ResponseEnvelope, TransportError>;
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WindowKind {
    Normal,
    Popup,
    Panel,
    App,
    Devtools,
}

/// Subset of a browser window the controller cares about.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WindowInfo {
    pub id: WindowId,
    #[serde(rename = "type")]
    pub kind: WindowKind,
    #[serde(default)]
    pub left: i32,
    #[serde(default)]
    pub top: i32,
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PopupSpec {
    pub url: String,
    pub bounds: Bounds,
}

#[async_trait(?Send)]
pub trait WindowPlatform {
    async fn all_windows(&self) -> Result<Vec<WindowInfo>, PlatformError>;

    async fn last_focused(&self) -> Result<WindowInfo, PlatformError>;

    async fn create_popup(&self, spec: PopupSpec) -> Result<WindowInfo, PlatformError>;

    async fn focus(&self, id: WindowId) -> Result<(), PlatformError>;

    /// Post a message into the popup's context.
    async fn send_to_popup(&self, message: ChannelMessage) -> Result<(), PlatformError>;
}
