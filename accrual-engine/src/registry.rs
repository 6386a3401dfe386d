//! Process-wide table of open positions
//!
//! Each user owns one slot behind its own mutex. The map shard lock is only
//! held long enough to clone the slot handle, so a slow operation on one user
//! never blocks another. Withdrawal closes the slot while holding its lock and
//! only then unlinks it from the map: a poll that already grabbed the handle
//! sees `Closed` and a poll that arrives later finds nothing.

use crate::{position::MiningPosition, Error, Result};
use dashmap::DashMap;
use ledger_core::UserId;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
enum Slot {
    Open(MiningPosition),
    Closed,
}

type SlotRef = Arc<Mutex<Slot>>;

/// Registry of one accrual position per user
#[derive(Debug, Default)]
pub struct PositionRegistry {
    slots: DashMap<UserId, SlotRef>,
}

impl PositionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: UserId) -> Option<SlotRef> {
        self.slots.get(&user_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Store a position, replacing and returning any prior one
    pub fn put(&self, position: MiningPosition) -> Option<MiningPosition> {
        let user_id = position.user_id();
        let previous = self
            .slots
            .insert(user_id, Arc::new(Mutex::new(Slot::Open(position))))?;

        let closed = std::mem::replace(&mut *previous.lock(), Slot::Closed);
        match closed {
            Slot::Open(position) => Some(position),
            Slot::Closed => None,
        }
    }

    /// Snapshot of the user's position
    pub fn get(&self, user_id: UserId) -> Option<MiningPosition> {
        let slot = self.slot(user_id)?;
        let guard = slot.lock();
        match &*guard {
            Slot::Open(position) => Some(position.clone()),
            Slot::Closed => None,
        }
    }

    /// Drop the user's position
    pub fn remove(&self, user_id: UserId) -> Option<MiningPosition> {
        let (_, slot) = self.slots.remove(&user_id)?;
        let closed = std::mem::replace(&mut *slot.lock(), Slot::Closed);
        match closed {
            Slot::Open(position) => Some(position),
            Slot::Closed => None,
        }
    }

    /// Run `f` with exclusive access to the user's open position
    pub fn with_position<T>(
        &self,
        user_id: UserId,
        f: impl FnOnce(&mut MiningPosition) -> T,
    ) -> Result<T> {
        let slot = self.slot(user_id).ok_or(Error::NoActivePosition(user_id))?;
        let mut guard = slot.lock();
        match &mut *guard {
            Slot::Open(position) => Ok(f(position)),
            Slot::Closed => Err(Error::NoActivePosition(user_id)),
        }
    }

    /// Run `f` with exclusive access and remove the position if it succeeds.
    ///
    /// A slot closed by a concurrent call yields `AlreadyWithdrawn`, unless a
    /// new position has been put in its place meanwhile. When `f` fails the
    /// position stays registered as `f` left it.
    pub fn take_with<T, E>(
        &self,
        user_id: UserId,
        f: impl FnOnce(&mut MiningPosition) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        let slot = self.slot(user_id).ok_or(Error::NoActivePosition(user_id))?;
        self.take_from(user_id, slot, f)
    }

    fn take_from<T, E>(
        &self,
        user_id: UserId,
        slot: SlotRef,
        f: impl FnOnce(&mut MiningPosition) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        let (slot, outcome) = match Self::close_with(&slot, f) {
            Ok(outcome) => (slot, outcome),
            Err(f) => {
                // `put` may have swapped in a new slot after `slot` was cloned
                let current = match self.slot(user_id) {
                    Some(current) if !Arc::ptr_eq(&current, &slot) => current,
                    _ => return Err(Error::AlreadyWithdrawn(user_id).into()),
                };
                match Self::close_with(&current, f) {
                    Ok(outcome) => (current, outcome),
                    Err(_) => return Err(Error::AlreadyWithdrawn(user_id).into()),
                }
            }
        };
        let value = outcome?;

        self.slots
            .remove_if(&user_id, |_, current| Arc::ptr_eq(current, &slot));
        Ok(value)
    }

    /// Run `f` on an open slot and close it if `f` succeeds. Hands `f` back
    /// when the slot is already closed.
    fn close_with<T, E, F>(slot: &SlotRef, f: F) -> std::result::Result<std::result::Result<T, E>, F>
    where
        F: FnOnce(&mut MiningPosition) -> std::result::Result<T, E>,
    {
        let mut guard = slot.lock();
        let outcome = match &mut *guard {
            Slot::Open(position) => f(position),
            Slot::Closed => return Err(f),
        };
        if outcome.is_ok() {
            *guard = Slot::Closed;
        }
        Ok(outcome)
    }

    /// Number of open positions
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No open positions
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
