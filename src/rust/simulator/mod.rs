// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Boundary between the scheduler and the external event-driven simulator.
//!
//! A simulator back-end only needs to hand out one-shot callbacks for a handful of well-known events and give access to
//! signal values. [EventSimulator] is an in-process implementation of the same contract.

mod event_sim;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::event_sim::{
    EventSimulator,
    SharedEventSimulator,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::fmt;

//======================================================================================================================
// Structures
//======================================================================================================================

/// One-shot callback invoked by the simulator.
pub type SimCallback = Box<dyn FnOnce()>;

/// Hook invoked when the simulator fails or terminates abnormally.
pub type SimFailureHook = Box<dyn Fn(Fail)>;

/// Registration handle for a pending simulator callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(pub u64);

/// Handle to a signal inside the simulated design.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignalId(pub usize);

/// Direction of a signal transition. Edges are evaluated on the least significant bit of the signal value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Edge {
    Rising,
    Falling,
    Any,
}

/// Region of the current time step as observed by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SimPhase {
    /// Ordinary evaluation: timers, value changes and next-time-step callbacks.
    #[default]
    Normal,
    /// Writes are applied in this region.
    ReadWrite,
    /// All values are final for the time step; no writes may be scheduled.
    ReadOnly,
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// External event source that drives the scheduler.
pub trait SimulatorBackend {
    /// Registers `callback` to fire after `steps` simulator steps.
    fn register_timed(&self, steps: u64, callback: SimCallback) -> Result<CallbackHandle, Fail>;

    /// Registers `callback` for the read-only region of the current time step.
    fn register_readonly(&self, callback: SimCallback) -> Result<CallbackHandle, Fail>;

    /// Registers `callback` for the read-write region of the current time step.
    fn register_readwrite(&self, callback: SimCallback) -> Result<CallbackHandle, Fail>;

    /// Registers `callback` for the beginning of the next time step.
    fn register_nexttime(&self, callback: SimCallback) -> Result<CallbackHandle, Fail>;

    /// Registers `callback` for the next transition of `signal` that matches `edge`.
    fn register_value_change(&self, signal: SignalId, edge: Edge, callback: SimCallback)
        -> Result<CallbackHandle, Fail>;

    /// Removes a callback that has not fired yet. Unknown handles are ignored.
    fn deregister(&self, handle: CallbackHandle);

    /// Current simulation time in steps. Never decreases.
    fn get_sim_time(&self) -> u64;

    /// Simulator precision as a power of ten in seconds.
    fn get_precision(&self) -> i8;

    fn get_signal_value(&self, signal: SignalId) -> Result<u64, Fail>;

    fn set_signal_value(&self, signal: SignalId, value: u64) -> Result<(), Fail>;

    fn signal_name(&self, signal: SignalId) -> Option<String>;

    /// Installs the hook called when the simulator fails.
    fn set_failure_hook(&self, hook: SimFailureHook);
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Edge {
    /// Checks whether a transition from `old` to `new` matches this edge.
    pub fn matches(self, old: u64, new: u64) -> bool {
        match self {
            Edge::Rising => old & 1 == 0 && new & 1 == 1,
            Edge::Falling => old & 1 == 1 && new & 1 == 0,
            Edge::Any => old != new,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Rising => f.write_str("RisingEdge"),
            Edge::Falling => f.write_str("FallingEdge"),
            Edge::Any => f.write_str("ValueChange"),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
