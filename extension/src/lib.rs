// Wallet request bridge for the browser extension
//
// page world ── request event ──▶ content script ── runtime message ──▶ background
//     ▲                                 │                                  │
//     └──────── reply event ◀───────────┘◀──── response ◀── popup decision ┘
//
// The protocol core is runtime-agnostic; `web` binds it to the browser.

pub mod config;
pub mod controller;
pub mod error;
pub mod platform;
pub mod popup;
pub mod protocol;
pub mod provider;
pub mod relay;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use config::BridgeConfig;
pub use controller::{Controller, ControllerSnapshot};
pub use error::{PlatformError, ProviderError, RpcError, TransportError};
pub use popup::ApprovalSession;
pub use provider::{PageProvider, Provider};
pub use relay::Relay;
