// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    runtime::fail::{
        Fail,
        FailKind,
    },
    simulator::{
        CallbackHandle,
        Edge,
        SignalId,
        SimCallback,
        SimFailureHook,
        SimPhase,
        SimulatorBackend,
    },
};
use ::core::cmp::Reverse;
use ::std::{
    cell::RefCell,
    collections::{
        BinaryHeap,
        HashMap,
        VecDeque,
    },
    mem,
    rc::Rc,
};

//==============================================================================
// Structures
//==============================================================================

struct TimedEntry {
    time: u64,
    handle: CallbackHandle,
}

struct ValueChangeEntry {
    handle: CallbackHandle,
    signal: SignalId,
    edge: Edge,
}

struct SignalState {
    name: String,
    value: u64,
}

/// In-process event-driven simulator.
///
/// Each time step runs next-time-step callbacks, then repeatedly fires due timers, value changes and read-write
/// callbacks until the step settles, and finally runs read-only callbacks before advancing to the next timer.
pub struct EventSimulator {
    now: u64,
    precision: i8,
    next_handle: u64,
    callbacks: HashMap<CallbackHandle, SimCallback>,
    // Use a reverse to get a min heap. Handles grow monotonically so they break ties in registration order.
    timed: BinaryHeap<Reverse<TimedEntry>>,
    readwrite: Vec<CallbackHandle>,
    readonly: Vec<CallbackHandle>,
    nexttime: Vec<CallbackHandle>,
    value_change: Vec<ValueChangeEntry>,
    fired_changes: VecDeque<CallbackHandle>,
    signals: Vec<SignalState>,
    phase: SimPhase,
    stopped: bool,
    failure: Option<Fail>,
    failure_hook: Option<Rc<dyn Fn(Fail)>>,
}

#[derive(Clone)]
pub struct SharedEventSimulator(Rc<RefCell<EventSimulator>>);

//==============================================================================
// Associate Functions
//==============================================================================

impl EventSimulator {
    fn alloc_handle(&mut self) -> CallbackHandle {
        let handle: CallbackHandle = CallbackHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn insert_callback(&mut self, callback: SimCallback) -> CallbackHandle {
        let handle: CallbackHandle = self.alloc_handle();
        self.callbacks.insert(handle, callback);
        handle
    }

    fn signal(&self, signal: SignalId) -> Result<&SignalState, Fail> {
        self.signals.get(signal.0).ok_or_else(|| {
            let cause: String = format!("no such signal (signal={:?})", signal);
            Fail::new(FailKind::Usage, &cause)
        })
    }

    /// Pops the next timer that is due at the current time, skipping deregistered ones.
    fn pop_due_timed(&mut self) -> Option<CallbackHandle> {
        while let Some(Reverse(entry)) = self.timed.peek() {
            if entry.time > self.now {
                return None;
            }
            let handle: CallbackHandle = entry.handle;
            self.timed.pop();
            if self.callbacks.contains_key(&handle) {
                return Some(handle);
            }
        }
        None
    }

    fn next_timed(&mut self) -> Option<u64> {
        while let Some(Reverse(entry)) = self.timed.peek() {
            if self.callbacks.contains_key(&entry.handle) {
                return Some(entry.time);
            }
            self.timed.pop();
        }
        None
    }

    fn is_halted(&self) -> bool {
        self.stopped || self.failure.is_some()
    }
}

impl SharedEventSimulator {
    /// Creates a simulator with the given precision (power of ten in seconds).
    pub fn new(precision: i8) -> Self {
        Self(Rc::new(RefCell::new(EventSimulator {
            now: 0,
            precision,
            next_handle: 1,
            callbacks: HashMap::new(),
            timed: BinaryHeap::new(),
            readwrite: Vec::new(),
            readonly: Vec::new(),
            nexttime: Vec::new(),
            value_change: Vec::new(),
            fired_changes: VecDeque::new(),
            signals: Vec::new(),
            phase: SimPhase::Normal,
            stopped: false,
            failure: None,
            failure_hook: None,
        })))
    }

    /// Adds a signal to the design and returns its handle.
    pub fn add_signal(&self, name: &str, initial: u64) -> SignalId {
        let mut sim = self.0.borrow_mut();
        sim.signals.push(SignalState {
            name: name.to_string(),
            value: initial,
        });
        SignalId(sim.signals.len() - 1)
    }

    /// Looks a signal up by name.
    pub fn find_signal(&self, name: &str) -> Option<SignalId> {
        self.0.borrow().signals.iter().position(|s| s.name == name).map(SignalId)
    }

    pub fn now(&self) -> u64 {
        self.0.borrow().now
    }

    pub fn phase(&self) -> SimPhase {
        self.0.borrow().phase
    }

    /// Number of callbacks that are still registered.
    pub fn pending_callbacks(&self) -> usize {
        self.0.borrow().callbacks.len()
    }

    /// Halts [run](Self::run) at the next callback boundary.
    pub fn stop(&self) {
        self.0.borrow_mut().stopped = true;
    }

    /// Terminates the simulation abnormally and notifies the failure hook.
    pub fn fail(&self, cause: &str) {
        let fail: Fail = Fail::new(FailKind::SimFailure, cause);
        let hook: Option<Rc<dyn Fn(Fail)>> = {
            let mut sim = self.0.borrow_mut();
            error!("fail(): simulator failed at step {} ({})", sim.now, cause);
            sim.failure = Some(fail.clone());
            sim.failure_hook.clone()
        };
        if let Some(hook) = hook {
            hook(fail);
        }
    }

    /// Runs the simulation until there are no more events, it is stopped, or time would pass `until`.
    pub fn run(&self, until: Option<u64>) -> Result<(), Fail> {
        debug!("run(): starting at step {} (until={:?})", self.now(), until);
        self.0.borrow_mut().stopped = false;
        loop {
            self.run_timestep();
            if self.0.borrow().is_halted() {
                break;
            }

            let next: Option<u64> = self.0.borrow_mut().next_timed();
            let next: u64 = match next {
                Some(next) => next,
                None => break,
            };
            if let Some(limit) = until {
                if next > limit {
                    let mut sim = self.0.borrow_mut();
                    sim.now = sim.now.max(limit);
                    sim.phase = SimPhase::Normal;
                    break;
                }
            }

            let nexttime: Vec<CallbackHandle> = {
                let mut sim = self.0.borrow_mut();
                trace!("run(): advancing from step {} to step {}", sim.now, next);
                sim.now = next;
                sim.phase = SimPhase::Normal;
                mem::take(&mut sim.nexttime)
            };
            for handle in nexttime {
                self.invoke(handle);
            }
        }
        self.0.borrow_mut().phase = SimPhase::Normal;
        debug!("run(): finished at step {}", self.now());
        match self.0.borrow().failure.clone() {
            Some(fail) => Err(fail),
            None => Ok(()),
        }
    }

    /// Runs all regions of the current time step.
    fn run_timestep(&self) {
        loop {
            if self.0.borrow().is_halted() {
                return;
            }
            let due: Option<CallbackHandle> = {
                let mut sim = self.0.borrow_mut();
                match sim.pop_due_timed() {
                    Some(handle) => Some(handle),
                    None => sim.fired_changes.pop_front(),
                }
            };
            if let Some(handle) = due {
                self.invoke(handle);
                continue;
            }

            let readwrite: Vec<CallbackHandle> = mem::take(&mut self.0.borrow_mut().readwrite);
            if readwrite.is_empty() {
                break;
            }
            self.0.borrow_mut().phase = SimPhase::ReadWrite;
            for handle in readwrite {
                self.invoke(handle);
            }
            self.0.borrow_mut().phase = SimPhase::Normal;
        }

        self.0.borrow_mut().phase = SimPhase::ReadOnly;
        loop {
            let readonly: Vec<CallbackHandle> = mem::take(&mut self.0.borrow_mut().readonly);
            if readonly.is_empty() || self.0.borrow().is_halted() {
                break;
            }
            for handle in readonly {
                self.invoke(handle);
            }
        }
    }

    /// Removes and runs a callback without holding a borrow of the simulator.
    fn invoke(&self, handle: CallbackHandle) {
        let callback: Option<SimCallback> = {
            let mut sim = self.0.borrow_mut();
            if sim.is_halted() {
                None
            } else {
                sim.callbacks.remove(&handle)
            }
        };
        if let Some(callback) = callback {
            trace!("invoke(): handle={:?}", handle);
            callback();
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl SimulatorBackend for SharedEventSimulator {
    fn register_timed(&self, steps: u64, callback: SimCallback) -> Result<CallbackHandle, Fail> {
        let mut sim = self.0.borrow_mut();
        let time: u64 = sim.now.checked_add(steps).ok_or_else(|| {
            let cause: String = format!("timer overflows simulation time (steps={:?})", steps);
            Fail::new(FailKind::Usage, &cause)
        })?;
        let handle: CallbackHandle = sim.insert_callback(callback);
        sim.timed.push(Reverse(TimedEntry { time, handle }));
        Ok(handle)
    }

    fn register_readonly(&self, callback: SimCallback) -> Result<CallbackHandle, Fail> {
        let mut sim = self.0.borrow_mut();
        let handle: CallbackHandle = sim.insert_callback(callback);
        sim.readonly.push(handle);
        Ok(handle)
    }

    fn register_readwrite(&self, callback: SimCallback) -> Result<CallbackHandle, Fail> {
        let mut sim = self.0.borrow_mut();
        if sim.phase == SimPhase::ReadOnly {
            return Err(Fail::new(
                FailKind::Usage,
                "cannot register a read-write callback in the read-only region",
            ));
        }
        let handle: CallbackHandle = sim.insert_callback(callback);
        sim.readwrite.push(handle);
        Ok(handle)
    }

    fn register_nexttime(&self, callback: SimCallback) -> Result<CallbackHandle, Fail> {
        let mut sim = self.0.borrow_mut();
        let handle: CallbackHandle = sim.insert_callback(callback);
        sim.nexttime.push(handle);
        Ok(handle)
    }

    fn register_value_change(
        &self,
        signal: SignalId,
        edge: Edge,
        callback: SimCallback,
    ) -> Result<CallbackHandle, Fail> {
        let mut sim = self.0.borrow_mut();
        sim.signal(signal)?;
        let handle: CallbackHandle = sim.insert_callback(callback);
        sim.value_change.push(ValueChangeEntry { handle, signal, edge });
        Ok(handle)
    }

    fn deregister(&self, handle: CallbackHandle) {
        let mut sim = self.0.borrow_mut();
        if sim.callbacks.remove(&handle).is_some() {
            trace!("deregister(): handle={:?}", handle);
        }
        sim.value_change.retain(|entry| entry.handle != handle);
    }

    fn get_sim_time(&self) -> u64 {
        self.0.borrow().now
    }

    fn get_precision(&self) -> i8 {
        self.0.borrow().precision
    }

    fn get_signal_value(&self, signal: SignalId) -> Result<u64, Fail> {
        Ok(self.0.borrow().signal(signal)?.value)
    }

    fn set_signal_value(&self, signal: SignalId, value: u64) -> Result<(), Fail> {
        let mut sim = self.0.borrow_mut();
        if sim.phase == SimPhase::ReadOnly {
            let cause: String = format!("cannot write {} in the read-only region", sim.signal(signal)?.name);
            return Err(Fail::new(FailKind::Usage, &cause));
        }
        let old: u64 = sim.signal(signal)?.value;
        sim.signals[signal.0].value = value;

        // Value-change callbacks are one-shot: move matching ones to the ready queue.
        let mut fired: Vec<CallbackHandle> = Vec::new();
        sim.value_change.retain(|entry| {
            if entry.signal == signal && entry.edge.matches(old, value) {
                fired.push(entry.handle);
                false
            } else {
                true
            }
        });
        sim.fired_changes.extend(fired);
        Ok(())
    }

    fn signal_name(&self, signal: SignalId) -> Option<String> {
        self.0.borrow().signals.get(signal.0).map(|s| s.name.clone())
    }

    fn set_failure_hook(&self, hook: SimFailureHook) {
        self.0.borrow_mut().failure_hook = Some(Rc::from(hook));
    }
}

impl PartialEq for TimedEntry {
    fn eq(&self, other: &TimedEntry) -> bool {
        self.time == other.time && self.handle == other.handle
    }
}

impl Eq for TimedEntry {}

impl PartialOrd for TimedEntry {
    fn partial_cmp(&self, other: &TimedEntry) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEntry {
    fn cmp(&self, other: &TimedEntry) -> core::cmp::Ordering {
        // Compare timer queue entries by expiration time, then by registration order.
        (self.time, self.handle).cmp(&(other.time, other.handle))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
