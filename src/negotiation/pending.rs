use std::collections::HashMap;

use local_sync::oneshot;

use super::NegotiationKey;
use crate::{connectors::Alpn, SharedError};

/// What every waiter of one negotiation receives.
pub type Outcome = Result<Alpn, SharedError>;

/// Negotiations that are in flight, with the callers waiting on each.
///
/// A key present here has exactly one owner probing it. The slot is removed
/// the moment it is settled.
#[derive(Default)]
pub struct PendingRegistry {
    slots: HashMap<NegotiationKey, Vec<oneshot::Sender<Outcome>>>,
}

impl PendingRegistry {
    #[inline]
    pub fn contains(&self, key: &NegotiationKey) -> bool {
        self.slots.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Open a slot for `key`. Returns `false` if one is already open.
    pub(crate) fn open(&mut self, key: &NegotiationKey) -> bool {
        if self.slots.contains_key(key) {
            return false;
        }
        self.slots.insert(key.clone(), Vec::new());
        true
    }

    /// Register interest in an open slot.
    pub(crate) fn join(&mut self, key: &NegotiationKey) -> Option<oneshot::Receiver<Outcome>> {
        let waiters = self.slots.get_mut(key)?;
        let (tx, rx) = oneshot::channel();
        waiters.push(tx);
        Some(rx)
    }

    /// Close the slot, handing back whoever is still waiting.
    pub(crate) fn take(&mut self, key: &NegotiationKey) -> Vec<oneshot::Sender<Outcome>> {
        self.slots.remove(key).unwrap_or_default()
    }
}
