// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Triggers are the only things a task can suspend on.
//!
//! A trigger is a shared handle with a small lifecycle: it is created unprimed, primed by the scheduler when a task
//! awaits it (registering with the simulator or with a software primitive), fired when its event happens, and then
//! cleaned up so it can be awaited again. A trigger whose waiters all go away before it fires is unprimed instead.

pub mod clock;
pub mod event;
pub mod lock;

//======================================================================================================================
// Imports
//======================================================================================================================

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
        SimPhase,
        SimulatorBackend,
    },
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    fmt,
    hash::{
        Hash,
        Hasher,
    },
    rc::{
        Rc,
        Weak,
    },
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

//======================================================================================================================
// Static Variables
//======================================================================================================================

static NEXT_TRIGGER_ID: AtomicU64 = AtomicU64::new(1);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Unique identity of a trigger instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(u64);

/// Selects which scheduler entry point reacts to a fired trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionKind {
    /// Fired from a simulator callback; goes through the phase-tracking reaction path.
    Simulator,
    /// Fired synchronously by software; queued and drained inside the current event-loop pass.
    Software,
}

/// Reaction callback installed when a trigger is primed.
pub type TriggerCallback = Rc<dyn Fn(&Trigger)>;

pub(crate) enum TriggerKind {
    Timer {
        steps: u64,
    },
    ReadOnly,
    ReadWrite,
    NextTimeStep,
    Edge {
        signal: SignalId,
        edge: Edge,
    },
    Null,
    Event {
        event: Rc<RefCell<event::EventState>>,
    },
    Lock {
        lock: Rc<RefCell<lock::LockState>>,
        granted: Cell<bool>,
    },
    Join {
        finished: Rc<Cell<bool>>,
        task: String,
    },
}

#[derive(Default)]
struct TriggerState {
    primed: bool,
    callback: Option<TriggerCallback>,
    sim_handle: Option<CallbackHandle>,
}

struct TriggerInner {
    id: TriggerId,
    kind: TriggerKind,
    state: RefCell<TriggerState>,
}

/// Shared handle to an event a task can await.
#[derive(Clone)]
pub struct Trigger(Rc<TriggerInner>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Trigger {
    pub(crate) fn new(kind: TriggerKind) -> Self {
        Self(Rc::new(TriggerInner {
            id: TriggerId(NEXT_TRIGGER_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            state: RefCell::new(TriggerState::default()),
        }))
    }

    /// Fires after `steps` simulator steps.
    pub fn timer_steps(steps: u64) -> Result<Self, Fail> {
        if steps == 0 {
            return Err(Fail::new(FailKind::Usage, "timer must last at least one simulator step"));
        }
        Ok(Self::new(TriggerKind::Timer { steps }))
    }

    pub fn rising_edge(signal: SignalId) -> Self {
        Self::edge(signal, Edge::Rising)
    }

    pub fn falling_edge(signal: SignalId) -> Self {
        Self::edge(signal, Edge::Falling)
    }

    pub fn value_change(signal: SignalId) -> Self {
        Self::edge(signal, Edge::Any)
    }

    pub fn edge(signal: SignalId, edge: Edge) -> Self {
        Self::new(TriggerKind::Edge { signal, edge })
    }

    /// Fires as soon as it is primed. Awaiting it gives other ready tasks a chance to run first.
    pub fn null() -> Self {
        Self::new(TriggerKind::Null)
    }

    pub(crate) fn join(finished: Rc<Cell<bool>>, task: &str) -> Self {
        Self::new(TriggerKind::Join {
            finished,
            task: task.to_string(),
        })
    }

    pub fn id(&self) -> TriggerId {
        self.0.id
    }

    pub fn is_primed(&self) -> bool {
        self.0.state.borrow().primed
    }

    pub fn reaction_kind(&self) -> ReactionKind {
        match self.0.kind {
            TriggerKind::Timer { .. }
            | TriggerKind::ReadOnly
            | TriggerKind::ReadWrite
            | TriggerKind::NextTimeStep
            | TriggerKind::Edge { .. } => ReactionKind::Simulator,
            TriggerKind::Null | TriggerKind::Event { .. } | TriggerKind::Lock { .. } | TriggerKind::Join { .. } => {
                ReactionKind::Software
            },
        }
    }

    /// Event and lock attempts belong to exactly one waiter; everything else fans out.
    pub fn allows_multiple_waiters(&self) -> bool {
        !matches!(self.0.kind, TriggerKind::Event { .. } | TriggerKind::Lock { .. })
    }

    pub(crate) fn is_read_write(&self) -> bool {
        matches!(self.0.kind, TriggerKind::ReadWrite)
    }

    /// Phase the scheduler is in while reacting to this trigger.
    pub(crate) fn phase_on_fire(&self) -> SimPhase {
        match self.0.kind {
            TriggerKind::ReadOnly => SimPhase::ReadOnly,
            TriggerKind::ReadWrite => SimPhase::ReadWrite,
            _ => SimPhase::Normal,
        }
    }

    /// Registers this trigger with its event source. `callback` runs when the trigger fires.
    pub(crate) fn prime(
        &self,
        callback: TriggerCallback,
        sim: &Rc<dyn SimulatorBackend>,
        phase: SimPhase,
    ) -> Result<(), Fail> {
        if self.is_primed() {
            if self.allows_multiple_waiters() {
                return Ok(());
            }
            let cause: String = format!("{} is already primed and accepts a single waiter", self);
            return Err(Fail::new(FailKind::Usage, &cause));
        }

        if phase == SimPhase::ReadOnly && matches!(self.0.kind, TriggerKind::ReadOnly | TriggerKind::ReadWrite) {
            let cause: String = format!("cannot await {} from within the read-only phase", self);
            return Err(Fail::new(FailKind::Usage, &cause));
        }

        {
            let mut state = self.0.state.borrow_mut();
            state.primed = true;
            state.callback = Some(callback);
        }

        let registered: Result<Option<CallbackHandle>, Fail> = match &self.0.kind {
            TriggerKind::Timer { steps } => sim.register_timed(*steps, self.sim_callback()).map(Some),
            TriggerKind::ReadOnly => sim.register_readonly(self.sim_callback()).map(Some),
            TriggerKind::ReadWrite => sim.register_readwrite(self.sim_callback()).map(Some),
            TriggerKind::NextTimeStep => sim.register_nexttime(self.sim_callback()).map(Some),
            TriggerKind::Edge { signal, edge } => sim
                .register_value_change(*signal, *edge, self.sim_callback())
                .map(Some),
            TriggerKind::Null => {
                self.fire();
                Ok(None)
            },
            TriggerKind::Event { event } => {
                event::prime_attempt(event, self);
                Ok(None)
            },
            TriggerKind::Lock { lock, granted } => {
                lock::prime_attempt(lock, granted, self);
                Ok(None)
            },
            TriggerKind::Join { finished, .. } => {
                if finished.get() {
                    self.fire();
                }
                Ok(None)
            },
        };

        match registered {
            Ok(handle) => {
                if handle.is_some() {
                    self.0.state.borrow_mut().sim_handle = handle;
                }
                trace!("prime(): {}", self);
                Ok(())
            },
            Err(e) => {
                self.cleanup();
                Err(e)
            },
        }
    }

    /// Deregisters a primed trigger that lost all of its waiters before firing.
    pub(crate) fn unprime(&self, sim: &Rc<dyn SimulatorBackend>) {
        trace!("unprime(): {}", self);
        let handle: Option<CallbackHandle> = self.0.state.borrow_mut().sim_handle.take();
        if let Some(handle) = handle {
            sim.deregister(handle);
        }
        match &self.0.kind {
            TriggerKind::Event { event } => event::unprime_attempt(event, self),
            TriggerKind::Lock { lock, granted } => lock::unprime_attempt(lock, granted, self),
            _ => {},
        }
        self.cleanup();
    }

    /// Invokes the reaction callback. Firing an unprimed trigger does nothing.
    pub(crate) fn fire(&self) {
        let callback: Option<TriggerCallback> = self.0.state.borrow().callback.clone();
        match callback {
            Some(callback) => callback(self),
            None => trace!("fire(): {} is not primed", self),
        }
    }

    /// Resets the trigger after it fired so it can be primed again.
    pub(crate) fn cleanup(&self) {
        *self.0.state.borrow_mut() = TriggerState::default();
    }

    /// Marks a lock attempt as the new owner of its lock.
    pub(crate) fn grant(&self) {
        if let TriggerKind::Lock { granted, .. } = &self.0.kind {
            granted.set(true);
        }
    }

    /// Gives up whatever this trigger handed to a waiter that will never resume on it.
    pub(crate) fn abandon(&self) {
        if let TriggerKind::Lock { lock, granted } = &self.0.kind {
            lock::abandon_grant(lock, granted);
        }
    }

    /// The simulator only holds a weak reference; waiting tasks keep the trigger alive.
    fn sim_callback(&self) -> SimCallback {
        let weak: Weak<TriggerInner> = Rc::downgrade(&self.0);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Trigger(inner).fire();
            }
        })
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl PartialEq for Trigger {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Trigger {}

impl Hash for Trigger {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            TriggerKind::Timer { steps } => write!(f, "Timer({} steps)", steps),
            TriggerKind::ReadOnly => write!(f, "ReadOnly()"),
            TriggerKind::ReadWrite => write!(f, "ReadWrite()"),
            TriggerKind::NextTimeStep => write!(f, "NextTimeStep()"),
            TriggerKind::Edge { signal, edge } => write!(f, "{}(signal {})", edge, signal.0),
            TriggerKind::Null => write!(f, "NullTrigger()"),
            TriggerKind::Event { event } => write!(f, "Event({}).wait()", event.borrow().name),
            TriggerKind::Lock { lock, .. } => write!(f, "Lock({}).acquire()", lock.borrow().name),
            TriggerKind::Join { task, .. } => write!(f, "Join({})", task),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self, self.0.id.0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
