// Content-script relay
// Forwards page requests to the background and posts the answer back

use std::rc::Rc;

use crate::platform::{BackgroundChannel, PageEventSink};
use crate::protocol::{codes, ChannelMessage, PageEvent, PageReply, PageRequest, ResponseEnvelope};

/// Stateless bridge between the page event bus and the runtime channel.
/// No retries and no timeout: the provider owns timing.
#[derive(Clone)]
pub struct Relay {
    channel: Rc<dyn BackgroundChannel>,
    page: Rc<dyn PageEventSink>,
}

impl Relay {
    pub fn new(channel: Rc<dyn BackgroundChannel>, page: Rc<dyn PageEventSink>) -> Self {
        Self { channel, page }
    }

    /// Handle one event heard on the page bus. Replies are the relay's own
    /// output and are ignored.
    pub async fn handle_page_event(&self, event: PageEvent) {
        let PageEvent::Request(request) = event else {
            return;
        };

        let reply = self.forward(request).await;
        let key = reply.key();
        if let Err(e) = self.page.dispatch(PageEvent::Reply(reply)) {
            log::warn!("⚠️ Could not post reply for {} back to the page: {}", key, e);
        }
    }

    /// Forward one request and turn whatever comes back (or the transport
    /// failure) into the page-level reply.
    pub async fn forward(&self, request: PageRequest) -> PageReply {
        let key = request.key();
        log::debug!("🔁 Relaying '{}' ({})", request.envelope.method, key);

        let response = match self.channel.send(ChannelMessage::FromPageWorld(request)).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("⚠️ Background unreachable for {}: {}", key, e);
                ResponseEnvelope::error(codes::DISCONNECTED, "communication failed")
            }
        };

        PageReply {
            context: key.context,
            id: key.id,
            payload: response.into_reply_payload(),
        }
    }
}
