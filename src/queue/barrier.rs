use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

struct BarrierState {
    in_flight: usize,
    done: watch::Sender<bool>,
}

/// Completion barrier over an in-flight work counter.
///
/// The counter is authoritative; the signal is bookkeeping. A fresh signal
/// is swapped in whenever the counter leaves zero, and the current signal
/// resolves when it returns to zero — so a waiter who asked for "done"
/// before new work started resolves at the old zero-crossing, and new work
/// requires taking a new waiter.
pub(crate) struct Barrier {
    state: Mutex<BarrierState>,
}

impl Barrier {
    pub fn new() -> Self {
        // Idle: the initial signal is born resolved.
        let (done, _) = watch::channel(true);
        Barrier {
            state: Mutex::new(BarrierState { in_flight: 0, done }),
        }
    }

    /// Track one unit of in-flight work.
    pub fn enqueue(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight += 1;
        if state.in_flight == 1 {
            let (done, _) = watch::channel(false);
            state.done = done;
        }
    }

    /// Mark one unit of work finished.
    pub fn dequeue(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            let _ = state.done.send(true);
        }
    }

    /// A receiver resolving at the current signal's zero-crossing. Resolves
    /// immediately when nothing is in flight.
    pub fn waiter(&self) -> watch::Receiver<bool> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.done.subscribe()
    }

    /// Wait until the signal observed by `waiter` resolves.
    pub async fn wait(mut waiter: watch::Receiver<bool>) {
        // A swapped-out sender is only dropped after its zero-crossing was
        // sent, so a closed channel still carries the resolved value.
        let _ = waiter.wait_for(|done| *done).await;
    }
}
