// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Suspension point between a task's coroutine and the scheduler.
//!
//! While the scheduler polls a task it installs a yield slot for the current thread. Awaiting a [Trigger] publishes the
//! trigger into that slot and returns [Poll::Pending]; the scheduler then reads the slot to learn what the task is
//! waiting on. On the next step the scheduler puts the outcome to resume with into the slot and the suspended future
//! takes it.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        Fail,
        FailKind,
    },
    outcome::Outcome,
    triggers::Trigger,
};
use ::std::{
    cell::RefCell,
    future::{
        Future,
        IntoFuture,
    },
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Thread Locals
//======================================================================================================================

thread_local! {
    static CURRENT: RefCell<Option<YieldSlot>> = RefCell::new(None);
}

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Eq, PartialEq)]
/// The state of the coroutine awaiting a trigger.
enum YieldState {
    Running,
    Yielded,
}

struct YieldSlot {
    /// Outcome the suspended coroutine is resumed with.
    inbox: Option<Result<(), Fail>>,
    /// Trigger published during this step.
    yielded: Option<Trigger>,
    /// Triggers published after the first one during this step.
    extra_yields: usize,
}

/// Future returned by awaiting a [Trigger].
pub struct TriggerFuture {
    trigger: Trigger,
    state: YieldState,
}

/// Installs the yield slot for one step of a task. The slot is removed when this is dropped.
pub(crate) struct Yielder;

/// What a task did with its yield slot during one step.
pub(crate) struct YieldReport {
    pub trigger: Option<Trigger>,
    pub undelivered: Option<Result<(), Fail>>,
    pub extra_yields: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Yielder {
    pub(crate) fn install(outcome: Outcome<()>) -> Self {
        CURRENT.with(|current| {
            *current.borrow_mut() = Some(YieldSlot {
                inbox: Some(outcome.get()),
                yielded: None,
                extra_yields: 0,
            })
        });
        Yielder
    }

    pub(crate) fn finish(self) -> YieldReport {
        let slot: Option<YieldSlot> = CURRENT.with(|current| current.borrow_mut().take());
        match slot {
            Some(slot) => YieldReport {
                trigger: slot.yielded,
                undelivered: slot.inbox,
                extra_yields: slot.extra_yields,
            },
            None => YieldReport {
                trigger: None,
                undelivered: None,
                extra_yields: 0,
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for Yielder {
    fn drop(&mut self) {
        CURRENT.with(|current| current.borrow_mut().take());
    }
}

impl Future for TriggerFuture {
    type Output = Result<(), Fail>;

    /// Polls the underlying trigger.
    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            let slot: &mut YieldSlot = match current.as_mut() {
                Some(slot) => slot,
                None => {
                    let cause: String = format!("{} awaited outside of a scheduled task", self_.trigger);
                    return Poll::Ready(Err(Fail::new(FailKind::Usage, &cause)));
                },
            };

            // First check if we've been woken.
            if self_.state == YieldState::Yielded {
                if let Some(result) = slot.inbox.take() {
                    return Poll::Ready(result);
                }
            }

            match slot.yielded {
                Some(_) => slot.extra_yields += 1,
                None => slot.yielded = Some(self_.trigger.clone()),
            }
            self_.state = YieldState::Yielded;
            Poll::Pending
        })
    }
}

impl IntoFuture for Trigger {
    type IntoFuture = TriggerFuture;
    type Output = Result<(), Fail>;

    fn into_future(self) -> Self::IntoFuture {
        TriggerFuture {
            trigger: self,
            state: YieldState::Running,
        }
    }
}

impl IntoFuture for &Trigger {
    type IntoFuture = TriggerFuture;
    type Output = Result<(), Fail>;

    fn into_future(self) -> Self::IntoFuture {
        self.clone().into_future()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
