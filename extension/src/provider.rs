// Page-facing wallet provider
// Turns request() calls into page events and waits for the matching reply

use futures::channel::oneshot;
use futures::future::{self, Either};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::platform::{PageEventSink, Timer};
use crate::protocol::{
    codes, PageContextId, PageEvent, PageReply, PageRequest, RequestEnvelope, RequestId,
    ResponseEnvelope,
};

const DEFAULT_REJECTION: &str = "request rejected";

/// The one in-flight call of a page context. Removing it from the table is
/// the settle gate: whoever removes it decides the outcome.
struct PendingCall {
    id: RequestId,
    reply: oneshot::Sender<ResponseEnvelope>,
}

struct ProviderInner {
    sink: Rc<dyn PageEventSink>,
    timer: Rc<dyn Timer>,
    config: ProviderConfig,
    pending: RefCell<HashMap<PageContextId, PendingCall>>,
    next_id: Cell<u64>,
    late_replies: Cell<u64>,
}

/// Shared provider state for every page context it serves.
#[derive(Clone)]
pub struct Provider {
    inner: Rc<ProviderInner>,
}

/// `request` surface bound to one page context.
#[derive(Clone)]
pub struct PageProvider {
    provider: Provider,
    context: PageContextId,
}

impl Provider {
    pub fn new(sink: Rc<dyn PageEventSink>, timer: Rc<dyn Timer>, config: ProviderConfig) -> Self {
        Self {
            inner: Rc::new(ProviderInner {
                sink,
                timer,
                config,
                pending: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
                late_replies: Cell::new(0),
            }),
        }
    }

    pub fn page(&self, context: PageContextId) -> PageProvider {
        PageProvider {
            provider: self.clone(),
            context,
        }
    }

    pub fn is_pending(&self, context: PageContextId) -> bool {
        self.inner.pending.borrow().contains_key(&context)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Replies that matched no pending call (timed out, or never ours).
    pub fn late_replies(&self) -> u64 {
        self.inner.late_replies.get()
    }

    /// Feed a page-local event heard on the window. Request events are the
    /// provider's own and are ignored.
    pub fn handle_page_event(&self, event: PageEvent) {
        if let PageEvent::Reply(reply) = event {
            self.deliver_reply(reply);
        }
    }

    fn deliver_reply(&self, reply: PageReply) {
        let key = reply.key();
        let slot = {
            let mut pending = self.inner.pending.borrow_mut();
            match pending.get(&reply.context) {
                Some(call) if call.id == reply.id => pending.remove(&reply.context),
                _ => None,
            }
        };

        match slot {
            Some(call) => {
                log::debug!("📨 Reply for {}", key);
                let envelope = ResponseEnvelope::from_reply_payload(reply.payload);
                // The waiting call may already be gone; nothing else to do then.
                let _ = call.reply.send(envelope);
            }
            None => {
                self.inner.late_replies.set(self.inner.late_replies.get() + 1);
                log::warn!("⚠️ Discarding reply for {} (no pending call)", key);
            }
        }
    }

    fn allocate_id(&self) -> RequestId {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        RequestId(id)
    }

    fn clear_slot(&self, context: PageContextId, id: RequestId) {
        let mut pending = self.inner.pending.borrow_mut();
        if pending.get(&context).map(|call| call.id) == Some(id) {
            pending.remove(&context);
        }
    }

    async fn request(
        &self,
        context: PageContextId,
        method: String,
        params: Value,
    ) -> Result<Value, ProviderError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.inner.pending.borrow_mut();
            if pending.contains_key(&context) {
                log::debug!("Rejecting '{}' for page {}: call already pending", method, context.0);
                return Err(ProviderError::AlreadyPending);
            }
            let id = self.allocate_id();
            pending.insert(context, PendingCall { id, reply: tx });
            id
        };
        let _slot = SlotGuard {
            provider: self,
            context,
            id,
        };

        let request = PageRequest {
            context,
            id,
            envelope: RequestEnvelope { method, params },
        };
        log::debug!("📤 Dispatching '{}' as {}", request.envelope.method, request.key());

        if let Err(e) = self.inner.sink.dispatch(PageEvent::Request(request)) {
            log::warn!("⚠️ Could not dispatch request event: {}", e);
            return Err(ProviderError::Rejected {
                code: codes::DISCONNECTED,
                message: e.to_string(),
            });
        }

        let timeout = self.inner.timer.sleep(self.inner.config.request_timeout());
        match future::select(rx, timeout).await {
            Either::Left((Ok(envelope), _)) => into_result(envelope),
            Either::Left((Err(oneshot::Canceled), _)) => Err(ProviderError::Rejected {
                code: codes::DISCONNECTED,
                message: "request abandoned".to_string(),
            }),
            Either::Right(((), _)) => {
                log::warn!("⏱️ Request {}#{} timed out", context.0, id.0);
                Err(ProviderError::Timeout)
            }
        }
    }
}

/// Clears the pending slot on every exit path, including a dropped call.
struct SlotGuard<'a> {
    provider: &'a Provider,
    context: PageContextId,
    id: RequestId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.provider.clear_slot(self.context, self.id);
    }
}

fn into_result(envelope: ResponseEnvelope) -> Result<Value, ProviderError> {
    match envelope {
        ResponseEnvelope::Success { result } => Ok(result),
        ResponseEnvelope::Error { error, code } => Err(ProviderError::Rejected {
            code: code.unwrap_or(codes::USER_REJECTED),
            message: if error.is_empty() {
                DEFAULT_REJECTION.to_string()
            } else {
                error
            },
        }),
    }
}

impl PageProvider {
    /// Ask the wallet to run `method`. At most one call per page may be in
    /// flight; a second one fails with `AlreadyPending` without being sent.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.request(self.context, method.into(), params).await
    }

    pub fn is_pending(&self) -> bool {
        self.provider.is_pending(self.context)
    }
}
