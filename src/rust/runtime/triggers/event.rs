// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::triggers::{
    Trigger,
    TriggerKind,
};
use ::std::{
    cell::RefCell,
    mem,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

pub(crate) struct EventState {
    pub(crate) name: String,
    fired: bool,
    /// Primed attempt triggers, in the order they started waiting.
    waiters: Vec<Trigger>,
}

/// Broadcast flag that tasks can wait on. Once set, every current waiter is woken in the order it started waiting and
/// later waits complete immediately until the event is cleared.
#[derive(Clone)]
pub struct Event(Rc<RefCell<EventState>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Event {
    pub fn new(name: &str) -> Self {
        Self(Rc::new(RefCell::new(EventState {
            name: name.to_string(),
            fired: false,
            waiters: Vec::new(),
        })))
    }

    /// Sets the event and wakes all waiters.
    pub fn set(&self) {
        let waiters: Vec<Trigger> = {
            let mut state = self.0.borrow_mut();
            state.fired = true;
            mem::take(&mut state.waiters)
        };
        trace!("set(): event={} waiters={}", self.name(), waiters.len());
        for waiter in waiters {
            waiter.fire();
        }
    }

    /// Returns a trigger that fires when the event is set. Each call produces a fresh single-waiter trigger.
    pub fn wait(&self) -> Trigger {
        if self.is_set() {
            return Trigger::null();
        }
        Trigger::new(TriggerKind::Event { event: self.0.clone() })
    }

    /// Un-sets the event. Tasks already woken stay woken.
    pub fn clear(&self) {
        self.0.borrow_mut().fired = false;
    }

    pub fn is_set(&self) -> bool {
        self.0.borrow().fired
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn num_waiters(&self) -> usize {
        self.0.borrow().waiters.len()
    }
}

pub(crate) fn prime_attempt(event: &Rc<RefCell<EventState>>, trigger: &Trigger) {
    let fired: bool = {
        let mut state = event.borrow_mut();
        if !state.fired {
            state.waiters.push(trigger.clone());
        }
        state.fired
    };
    if fired {
        trigger.fire();
    }
}

pub(crate) fn unprime_attempt(event: &Rc<RefCell<EventState>>, trigger: &Trigger) {
    event.borrow_mut().waiters.retain(|waiter| waiter != trigger);
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
