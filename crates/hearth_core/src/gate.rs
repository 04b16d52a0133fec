//! Accounting of plugin code currently running on behalf of the directories.
//!
//! Every listener invocation and service call holds a [`DispatchPass`] for
//! the plugin whose code it runs. Unloading a plugin first closes the gate
//! for it: new calls into the plugin are refused and the unloader waits until
//! the passes already handed out are dropped. Only then are the plugin's
//! registrations purged and its module closed.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct GateState {
    active: HashMap<String, usize>,
    closed: HashSet<String>,
}

/// Admission control for calls into plugin code, shared by one host's
/// event bus and service registry.
#[derive(Default)]
pub struct DispatchGate {
    state: Mutex<GateState>,
    idle: Condvar,
}

thread_local! {
    // (gate address, owner) of every pass alive on this thread
    static HELD: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

/// Proof that a call into `owner`'s code is in flight. Dropping it ends the call.
///
/// A pass is tied to the thread that entered.
pub struct DispatchPass {
    gate: Arc<DispatchGate>,
    owner: String,
    _thread_bound: PhantomData<*const ()>,
}

impl DispatchGate {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn id(&self) -> usize {
        self as *const DispatchGate as usize
    }

    /// Admits one call into `owner`'s code. Returns `None` while `owner` is
    /// being unloaded.
    pub fn enter(self: &Arc<Self>, owner: &str) -> Option<DispatchPass> {
        {
            let mut state = self.lock();
            if state.closed.contains(owner) {
                return None;
            }
            *state.active.entry(owner.to_string()).or_insert(0) += 1;
        }
        HELD.with(|held| held.borrow_mut().push((self.id(), owner.to_string())));
        Some(DispatchPass {
            gate: self.clone(),
            owner: owner.to_string(),
            _thread_bound: PhantomData,
        })
    }

    /// Whether the calling thread is itself inside `owner`'s code.
    pub fn is_held_by_current_thread(&self, owner: &str) -> bool {
        let id = self.id();
        HELD.with(|held| held.borrow().iter().any(|(gate, o)| *gate == id && o == owner))
    }

    /// Number of calls into `owner` in flight on any thread.
    pub fn active(&self, owner: &str) -> usize {
        self.lock().active.get(owner).copied().unwrap_or(0)
    }

    pub fn is_closed(&self, owner: &str) -> bool {
        self.lock().closed.contains(owner)
    }

    /// Refuses new calls into `owner` and blocks until the calls in flight
    /// have returned.
    ///
    /// Must not be called from inside `owner`'s code; see
    /// [`is_held_by_current_thread`](Self::is_held_by_current_thread).
    pub fn close(&self, owner: &str) {
        let mut state = self.lock();
        state.closed.insert(owner.to_string());
        let mut waited = false;
        while state.active.get(owner).copied().unwrap_or(0) > 0 {
            if !waited {
                debug!(owner, "Waiting for calls in flight");
                waited = true;
            }
            state = self.idle.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Admits calls into `owner` again, for a plugin loaded under the same name.
    pub fn reopen(&self, owner: &str) {
        self.lock().closed.remove(owner);
    }
}

impl Drop for DispatchPass {
    fn drop(&mut self) {
        let id = self.gate.id();
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(index) = held.iter().rposition(|(gate, o)| *gate == id && *o == self.owner) {
                held.remove(index);
            }
        });

        let mut state = self.gate.lock();
        if let Some(count) = state.active.get_mut(&self.owner) {
            *count -= 1;
            if *count == 0 {
                state.active.remove(&self.owner);
                self.gate.idle.notify_all();
            }
        }
    }
}
