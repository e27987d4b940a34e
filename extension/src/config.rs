use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const BUNDLED_CONFIG: &str = include_str!("../bridge.toml");

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub events: EventNames,
    #[serde(default)]
    pub popup: PopupConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProviderConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Names of the page-local events shared by provider and content script.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EventNames {
    #[serde(default = "default_request_event")]
    pub request: String,
    #[serde(default = "default_response_event")]
    pub response: String,
}

impl Default for EventNames {
    fn default() -> Self {
        Self {
            request: default_request_event(),
            response: default_response_event(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PopupConfig {
    #[serde(default = "default_popup_page")]
    pub page: String,
    #[serde(default = "default_popup_width")]
    pub width: i32,
    #[serde(default = "default_popup_height")]
    pub height: i32,
    #[serde(default = "default_offset_x")]
    pub offset_x: i32,
    #[serde(default = "default_offset_y")]
    pub offset_y: i32,
    #[serde(default = "default_refocus_settle_ms")]
    pub refocus_settle_ms: u64,
    #[serde(default = "default_create_settle_ms")]
    pub create_settle_ms: u64,
}

impl PopupConfig {
    /// Wait after focusing an existing popup.
    pub fn refocus_settle(&self) -> Duration {
        Duration::from_millis(self.refocus_settle_ms)
    }

    /// Wait after creating a popup, long enough for its UI to load.
    pub fn create_settle(&self) -> Duration {
        Duration::from_millis(self.create_settle_ms)
    }
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            page: default_popup_page(),
            width: default_popup_width(),
            height: default_popup_height(),
            offset_x: default_offset_x(),
            offset_y: default_offset_y(),
            refocus_settle_ms: default_refocus_settle_ms(),
            create_settle_ms: default_create_settle_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_request_event() -> String {
    "wallet:request".to_string()
}

fn default_response_event() -> String {
    "wallet:response".to_string()
}

fn default_popup_page() -> String {
    "popup.html".to_string()
}

fn default_popup_width() -> i32 {
    360
}

fn default_popup_height() -> i32 {
    620
}

fn default_offset_x() -> i32 {
    20
}

fn default_offset_y() -> i32 {
    80
}

fn default_refocus_settle_ms() -> u64 {
    250
}

fn default_create_settle_ms() -> u64 {
    1000
}

impl BridgeConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: BridgeConfig =
            toml::from_str(content).context("Failed to parse bridge config")?;
        config.validate()?;
        Ok(config)
    }

    /// Config compiled into the extension. Falls back to defaults when the
    /// bundled file does not parse.
    pub fn bundled() -> Self {
        match Self::from_toml(BUNDLED_CONFIG) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("⚠️ Bundled bridge config rejected ({:#}), using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.request_timeout_ms == 0 {
            anyhow::bail!("provider.request_timeout_ms must be greater than zero");
        }
        if self.events.request.is_empty() || self.events.response.is_empty() {
            anyhow::bail!("event names must not be empty");
        }
        if self.events.request == self.events.response {
            anyhow::bail!(
                "request and response events must differ (both '{}')",
                self.events.request
            );
        }
        if self.popup.page.is_empty() {
            anyhow::bail!("popup.page must not be empty");
        }
        if self.popup.width <= 0 || self.popup.height <= 0 {
            anyhow::bail!(
                "popup size must be positive (got {}x{})",
                self.popup.width,
                self.popup.height
            );
        }
        Ok(())
    }
}
