// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        Fail,
        FailKind,
    },
    triggers::{
        Trigger,
        TriggerKind,
    },
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::VecDeque,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

pub(crate) struct LockState {
    pub(crate) name: String,
    locked: bool,
    /// Primed acquisition attempts waiting for the lock.
    queue: VecDeque<Trigger>,
}

/// Mutual exclusion between tasks. Waiters are granted the lock in the order they started waiting.
#[derive(Clone)]
pub struct Lock(Rc<RefCell<LockState>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Lock {
    pub fn new(name: &str) -> Self {
        Self(Rc::new(RefCell::new(LockState {
            name: name.to_string(),
            locked: false,
            queue: VecDeque::new(),
        })))
    }

    /// Returns a trigger that fires once the awaiting task owns the lock.
    pub fn acquire(&self) -> Trigger {
        Trigger::new(TriggerKind::Lock {
            lock: self.0.clone(),
            granted: Cell::new(false),
        })
    }

    /// Try to acquire this lock without waiting. Return [true] if successful.
    pub fn try_lock(&self) -> bool {
        let mut state = self.0.borrow_mut();
        match state.locked {
            true => false,
            false => {
                state.locked = true;
                true
            },
        }
    }

    /// Releases this lock, handing it to the oldest waiter if there is one.
    pub fn release(&self) -> Result<(), Fail> {
        hand_off(&self.0)
    }

    pub fn locked(&self) -> bool {
        self.0.borrow().locked
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }
}

fn hand_off(lock: &Rc<RefCell<LockState>>) -> Result<(), Fail> {
    let next: Option<Trigger> = {
        let mut state = lock.borrow_mut();
        if !state.locked {
            let cause: String = format!("lock {} is not locked", state.name);
            error!("release(): {}", cause);
            return Err(Fail::new(FailKind::Usage, &cause));
        }
        let next: Option<Trigger> = state.queue.pop_front();
        if next.is_none() {
            state.locked = false;
        }
        next
    };

    // Ownership moves directly to the next waiter, so the lock stays locked.
    if let Some(next) = next {
        next.grant();
        next.fire();
    }
    Ok(())
}

pub(crate) fn prime_attempt(lock: &Rc<RefCell<LockState>>, granted: &Cell<bool>, trigger: &Trigger) {
    let acquired: bool = {
        let mut state = lock.borrow_mut();
        if state.locked {
            state.queue.push_back(trigger.clone());
            false
        } else {
            state.locked = true;
            true
        }
    };
    if acquired {
        granted.set(true);
        trigger.fire();
    }
}

pub(crate) fn unprime_attempt(lock: &Rc<RefCell<LockState>>, granted: &Cell<bool>, trigger: &Trigger) {
    if !abandon_grant(lock, granted) {
        lock.borrow_mut().queue.retain(|waiter| waiter != trigger);
    }
}

/// An attempt that was granted the lock but lost its waiter passes the lock on. Returns [true] if it held the grant.
pub(crate) fn abandon_grant(lock: &Rc<RefCell<LockState>>, granted: &Cell<bool>) -> bool {
    if !granted.replace(false) {
        return false;
    }
    if let Err(e) = hand_off(lock) {
        warn!("abandon_grant(): {}", e);
    }
    true
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
