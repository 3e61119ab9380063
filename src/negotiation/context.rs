use std::{cell::RefCell, rc::Rc};

use local_sync::oneshot;

use super::{
    cache::{ProtocolCache, DEFAULT_CACHE_CAPACITY},
    pending::{Outcome, PendingRegistry},
    NegotiationKey,
};
use crate::{connectors::Alpn, Error};

struct Shared {
    cache: ProtocolCache,
    pending: PendingRegistry,
}

/// A protocol cache paired with its in-flight registry.
///
/// Cloning shares the state. Every transition (reserve, settle) happens
/// inside one borrow, so on a single-threaded runtime it is atomic with
/// respect to other tasks.
///
/// Each runtime thread owns one default context ([`NegotiationContext::global`]),
/// created on first use and kept until the thread exits. Callers that want
/// isolated memory, such as a [`crate::headers::Session`], create their own.
#[derive(Clone)]
pub struct NegotiationContext {
    shared: Rc<RefCell<Shared>>,
}

thread_local! {
    static DEFAULT_CONTEXT: NegotiationContext = NegotiationContext::new(DEFAULT_CACHE_CAPACITY);
}

impl NegotiationContext {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                cache: ProtocolCache::new(capacity),
                pending: PendingRegistry::default(),
            })),
        }
    }

    /// The context shared by everything on this thread.
    #[inline]
    pub fn global() -> Self {
        DEFAULT_CONTEXT.with(Clone::clone)
    }

    /// Cached protocol for `key`; a hit marks it most recently used.
    #[inline]
    pub fn lookup(&self, key: &NegotiationKey) -> Option<Alpn> {
        self.shared.borrow_mut().cache.get(key)
    }

    #[inline]
    pub fn is_pending(&self, key: &NegotiationKey) -> bool {
        self.shared.borrow().pending.contains(key)
    }

    /// Either take ownership of the negotiation for `key` or join the one
    /// already running.
    pub fn reserve(&self, key: &NegotiationKey) -> Reservation {
        let mut shared = self.shared.borrow_mut();
        if let Some(rx) = shared.pending.join(key) {
            return Reservation::Joined(Waiter { rx });
        }
        shared.pending.open(key);
        Reservation::Owner(PendingGuard {
            context: self.clone(),
            key: key.clone(),
            settled: false,
        })
    }

    /// Close the slot for `key` and wake its waiters with `outcome`.
    /// Only successes are remembered.
    pub fn settle(&self, key: &NegotiationKey, outcome: Outcome) {
        let waiters = {
            let mut shared = self.shared.borrow_mut();
            if let Ok(protocol) = &outcome {
                shared.cache.insert(key.clone(), *protocol);
            }
            shared.pending.take(key)
        };
        #[cfg(feature = "logging")]
        tracing::debug!(
            "negotiation {} settled ok={}, waking {} waiters",
            key,
            outcome.is_ok(),
            waiters.len()
        );
        for tx in waiters {
            // a waiter that gave up already dropped its receiver
            let _ = tx.send(outcome.clone());
        }
    }

    #[inline]
    pub fn cached_len(&self) -> usize {
        self.shared.borrow().cache.len()
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.shared.borrow().pending.len()
    }

    /// Forget every cached protocol. In-flight negotiations are untouched.
    pub fn clear(&self) {
        self.shared.borrow_mut().cache.clear();
    }
}

impl Default for NegotiationContext {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for NegotiationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("NegotiationContext")
            .field("cached", &shared.cache.len())
            .field("capacity", &shared.cache.capacity())
            .field("pending", &shared.pending.len())
            .finish()
    }
}

pub enum Reservation {
    /// The caller must probe and settle.
    Owner(PendingGuard),
    /// Someone else is probing; await the waiter.
    Joined(Waiter),
}

impl Reservation {
    #[inline]
    pub fn already_pending(&self) -> bool {
        matches!(self, Reservation::Joined(_))
    }
}

/// Ownership of an open negotiation slot.
///
/// Dropping it unsettled (the probing future was cancelled) settles the slot
/// with [`Error::Cancelled`], so joiners never wait forever.
pub struct PendingGuard {
    context: NegotiationContext,
    key: NegotiationKey,
    settled: bool,
}

impl PendingGuard {
    #[inline]
    pub fn key(&self) -> &NegotiationKey {
        &self.key
    }

    pub fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.context.settle(&self.key, outcome);
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.context.settle(&self.key, Err(Rc::new(Error::Cancelled)));
        }
    }
}

/// A joined negotiation.
pub struct Waiter {
    rx: oneshot::Receiver<Outcome>,
}

impl Waiter {
    pub async fn join(self) -> Outcome {
        self.rx.await.unwrap_or_else(|_| Err(Rc::new(Error::Cancelled)))
    }
}
