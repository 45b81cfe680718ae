//! Inbound dispatch table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::messages::Envelope;

/// Type key that receives every inbound envelope.
pub const WILDCARD: &str = "*";

/// A registered inbound handler.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// One handler per message type plus an optional wildcard.
///
/// Registering a type again replaces the earlier handler.
#[derive(Default, Clone)]
pub struct HandlerTable {
    by_type: HashMap<String, Handler>,
}

impl HandlerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `msg_type`, returning the one it replaced.
    pub fn insert(&mut self, msg_type: impl Into<String>, handler: Handler) -> Option<Handler> {
        self.by_type.insert(msg_type.into(), handler)
    }

    /// Returns the handlers an envelope should be delivered to.
    ///
    /// The type-specific handler comes first, then the wildcard.
    #[must_use]
    pub fn resolve(&self, envelope: &Envelope) -> Vec<Handler> {
        let mut handlers = Vec::with_capacity(2);
        if envelope.msg_type != WILDCARD {
            if let Some(handler) = self.by_type.get(&envelope.msg_type) {
                handlers.push(Arc::clone(handler));
            }
        }
        if let Some(handler) = self.by_type.get(WILDCARD) {
            handlers.push(Arc::clone(handler));
        }
        handlers
    }

    /// Number of registered types, wildcard included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.by_type.keys().collect();
        types.sort();
        f.debug_struct("HandlerTable").field("types", &types).finish()
    }
}
