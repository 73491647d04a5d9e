//! Process-wide token budget with atomic reservations.
//!
//! The recruiter reserves a task's estimated cost before dispatch, under one
//! lock, so concurrent dispatches can never jointly admit more work than the
//! budget allows. Whenever the capability returns text the reservation is
//! committed with the tokens it reported, even if the text then fails the
//! output contract. A dispatch that never got a response (or a reservation
//! that is simply dropped) is released at zero cost.
//!
//! `remaining()` only tracks committed consumption, so it never increases.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A reservation could not be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("budget exceeded: {required} tokens required, {available} available")]
pub struct BudgetExceeded {
    pub required: u64,
    pub available: u64,
}

#[derive(Debug, Default)]
struct BudgetState {
    consumed: u64,
    reserved: u64,
}

/// Token budget shared by every dispatch in a pipeline run.
#[derive(Debug)]
pub struct TokenBudget {
    ceiling: u64,
    state: Mutex<BudgetState>,
}

impl TokenBudget {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            state: Mutex::new(BudgetState::default()),
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Tokens committed so far.
    pub fn consumed(&self) -> u64 {
        self.lock().consumed
    }

    /// Ceiling minus committed consumption. Monotonically non-increasing.
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.lock().consumed)
    }

    /// What a new reservation may still claim.
    pub fn available(&self) -> u64 {
        let state = self.lock();
        self.ceiling
            .saturating_sub(state.consumed)
            .saturating_sub(state.reserved)
    }

    /// Atomically check and reserve `amount` tokens.
    pub fn try_reserve(self: &Arc<Self>, amount: u64) -> Result<BudgetReservation, BudgetExceeded> {
        let mut state = self.lock();
        let available = self
            .ceiling
            .saturating_sub(state.consumed)
            .saturating_sub(state.reserved);
        if amount > available {
            return Err(BudgetExceeded {
                required: amount,
                available,
            });
        }
        state.reserved += amount;
        Ok(BudgetReservation {
            budget: Arc::clone(self),
            amount,
            settled: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tokens held back for one dispatch. Released on drop unless committed.
#[derive(Debug)]
#[must_use = "dropping a reservation releases it immediately"]
pub struct BudgetReservation {
    budget: Arc<TokenBudget>,
    amount: u64,
    settled: bool,
}

impl BudgetReservation {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Charge `actual` tokens and free the reservation.
    ///
    /// Returns the tokens actually charged, which is capped at what remains
    /// of the ceiling.
    pub fn commit(mut self, actual: u64) -> u64 {
        let budget = Arc::clone(&self.budget);
        let mut state = budget.lock();
        state.reserved = state.reserved.saturating_sub(self.amount);
        let charged = actual.min(budget.ceiling.saturating_sub(state.consumed));
        state.consumed += charged;
        self.settled = true;
        charged
    }

    /// Give the reservation back without charging anything.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.budget.lock();
        state.reserved = state.reserved.saturating_sub(self.amount);
        self.settled = true;
    }
}

impl Drop for BudgetReservation {
    fn drop(&mut self) {
        self.release_inner();
    }
}
