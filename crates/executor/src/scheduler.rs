//! Cooperative scheduler for yieldable statements
//!
//! Single-writer-per-session: each slot pairs a session with its current
//! statement, and the scheduler drives them one step at a time on its own
//! thread. Parked slots are woken when the engine reports that the
//! transaction they wait on released its locks; when nothing is runnable,
//! each parked slot gets one re-attempt so waits past the lock timeout can
//! escalate into deadlock detection.

use crate::session::Session;
use crate::yieldable::Yieldable;
use parking_lot::Mutex;
use std::sync::Arc;
use vellum_common::SessionStatus;
use vellum_common::TxnId;
use vellum_transaction::TransactionEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Runnable,
    Parked,
    Finished,
}

struct Slot<V> {
    session: Session<V>,
    yieldable: Box<dyn Yieldable<V>>,
    state: SlotState,
}

/// Drives submitted statements to completion, handling park and wake-up.
pub struct Scheduler<V> {
    slots: Vec<Slot<V>>,
    /// Transactions that released their locks since the last drain, fed by
    /// the engine's release hook.
    released: Arc<Mutex<Vec<TxnId>>>,
}

impl<V: Send + Sync + 'static> Scheduler<V> {
    pub fn new(engine: &Arc<TransactionEngine<V>>) -> Self {
        let released: Arc<Mutex<Vec<TxnId>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = released.clone();
        engine.set_release_hook(Box::new(move |holder, _waiters| {
            sink.lock().push(holder);
        }));
        Self {
            slots: Vec::new(),
            released,
        }
    }

    /// Add a session with its statement; returns the slot handle.
    pub fn submit(&mut self, session: Session<V>, yieldable: Box<dyn Yieldable<V>>) -> usize {
        self.slots.push(Slot {
            session,
            yieldable,
            state: SlotState::Runnable,
        });
        self.slots.len() - 1
    }

    pub fn session(&self, slot: usize) -> &Session<V> {
        &self.slots[slot].session
    }

    pub fn session_mut(&mut self, slot: usize) -> &mut Session<V> {
        &mut self.slots[slot].session
    }

    pub fn is_finished(&self, slot: usize) -> bool {
        self.slots[slot].state == SlotState::Finished
    }

    pub fn is_parked(&self, slot: usize) -> bool {
        self.slots[slot].state == SlotState::Parked
    }

    /// The finished statement's result, unless a handler consumed it.
    pub fn take_result(&mut self, slot: usize) -> Option<crate::Result<usize>> {
        self.slots[slot].yieldable.take_result()
    }

    fn run_slot(slot: &mut Slot<V>) {
        let suspended = slot.yieldable.run(&mut slot.session);
        slot.state = if !suspended {
            SlotState::Finished
        } else if slot.session.status() == SessionStatus::Waiting {
            SlotState::Parked
        } else {
            SlotState::Runnable
        };
    }

    /// Wake parked slots whose holder released. Returns whether any woke.
    fn drain_released(&mut self) -> bool {
        let released: Vec<TxnId> = std::mem::take(&mut *self.released.lock());
        if released.is_empty() {
            return false;
        }
        let mut woke = false;
        for slot in &mut self.slots {
            if slot.state != SlotState::Parked {
                continue;
            }
            let Some(holder) = slot.session.waiting_for() else {
                continue;
            };
            if released.contains(&holder) {
                slot.yieldable.back(&mut slot.session);
                slot.state = SlotState::Runnable;
                woke = true;
            }
        }
        woke
    }

    /// Run until every slot is finished or parked behind a lock that has
    /// neither been released nor outlived its timeout. Callers re-invoke
    /// after external transactions commit or time passes.
    pub fn run_until_idle(&mut self) {
        loop {
            self.drain_released();

            let runnable: Vec<usize> = self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state == SlotState::Runnable)
                .map(|(i, _)| i)
                .collect();
            if !runnable.is_empty() {
                for i in runnable {
                    Self::run_slot(&mut self.slots[i]);
                }
                continue;
            }

            let parked: Vec<usize> = self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state == SlotState::Parked)
                .map(|(i, _)| i)
                .collect();
            if parked.is_empty() {
                return;
            }

            // Everything is parked: one re-attempt each, which either
            // acquires the lock, parks again, or escalates a timed-out wait.
            let mut progressed = false;
            for i in parked {
                let slot = &mut self.slots[i];
                slot.yieldable.back(&mut slot.session);
                Self::run_slot(slot);
                if slot.state != SlotState::Parked {
                    progressed = true;
                }
            }
            if !progressed && !self.drain_released() {
                return;
            }
        }
    }
}
