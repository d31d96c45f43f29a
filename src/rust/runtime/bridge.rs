// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Running blocking code from a task.
//!
//! [bridge] runs a blocking function on its own OS thread while the awaiting task is suspended. The function may call
//! back into the scheduler with [BridgeContext::resume], which runs a coroutine as a task and blocks the thread until
//! that task finishes. The scheduler thread and the bridged thread hand control back and forth over rendezvous
//! channels, so at most one of them executes at any time.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        Fail,
        FailKind,
    },
    outcome::Outcome,
    scheduler::SharedScheduler,
    triggers::event::Event,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::futures::future::LocalBoxFuture;
use ::std::{
    any::Any,
    cell::RefCell,
    future::Future,
    io,
    panic::{
        self,
        AssertUnwindSafe,
    },
    rc::Rc,
    sync::{
        Arc,
        Mutex,
    },
    thread::{
        self,
        JoinHandle,
        ThreadId,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

type CallResult = Result<Box<dyn Any + Send>, Fail>;

type CallRequest = Box<dyn FnOnce(SharedScheduler) -> LocalBoxFuture<'static, CallResult> + Send>;

type SpawnThread = Box<dyn FnOnce() -> io::Result<JoinHandle<()>>>;

/// Messages from a bridged thread to the scheduler thread.
enum ToScheduler {
    /// Run a coroutine and send back its result.
    Call(CallRequest),
    /// The bridged function returned.
    Exited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BridgeState {
    Init,
    Running,
    Paused,
    Exited,
}

/// Scheduler-side state of a bridged thread.
pub(crate) struct ThreadWaiter {
    name: String,
    state: BridgeState,
    spawn: Option<SpawnThread>,
    thread: Option<JoinHandle<()>>,
    to_thread: Sender<CallResult>,
    from_thread: Receiver<ToScheduler>,
    /// Result of the last coroutine the thread asked for.
    resume_with: Option<CallResult>,
    done: Event,
}

pub(crate) type SharedThreadWaiter = Rc<RefCell<ThreadWaiter>>;

/// Handle a bridged function uses to run coroutines on the scheduler.
pub struct BridgeContext {
    to_scheduler: Sender<ToScheduler>,
    from_scheduler: Receiver<CallResult>,
    scheduler_thread: ThreadId,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl BridgeContext {
    /// Runs the coroutine built by `factory` as a task on the scheduler and blocks until it finishes.
    pub fn resume<F, Fut, V>(&self, factory: F) -> Result<V, Fail>
    where
        F: FnOnce(SharedScheduler) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, Fail>> + 'static,
        V: Send + 'static,
    {
        if thread::current().id() == self.scheduler_thread {
            return Err(Fail::new(
                FailKind::Usage,
                "resume() must be called from a bridged thread, not from the scheduler thread",
            ));
        }

        let request: CallRequest = Box::new(move |sched: SharedScheduler| -> LocalBoxFuture<'static, CallResult> {
            Box::pin(async move {
                let value: V = factory(sched).await?;
                Ok::<Box<dyn Any + Send>, Fail>(Box::new(value))
            })
        });
        if self.to_scheduler.send(ToScheduler::Call(request)).is_err() {
            return Err(Fail::new(FailKind::Internal, "scheduler thread is gone"));
        }
        let result: CallResult = match self.from_scheduler.recv() {
            Ok(result) => result,
            Err(_) => return Err(Fail::new(FailKind::Internal, "scheduler thread is gone")),
        };
        match result?.downcast::<V>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(Fail::new(FailKind::Internal, "resumed coroutine returned an unexpected type")),
        }
    }
}

/// Runs the blocking function `f` on a new thread and returns its result. The calling task is suspended meanwhile and
/// the simulation does not advance until `f` returns or calls [BridgeContext::resume].
pub async fn bridge<F, R>(sched: &SharedScheduler, name: &str, f: F) -> Result<R, Fail>
where
    F: FnOnce(&BridgeContext) -> Result<R, Fail> + Send + 'static,
    R: Send + 'static,
{
    let (to_thread, from_scheduler): (Sender<CallResult>, Receiver<CallResult>) = crossbeam_channel::bounded(0);
    let (to_scheduler, from_thread): (Sender<ToScheduler>, Receiver<ToScheduler>) = crossbeam_channel::bounded(0);
    let result: Arc<Mutex<Option<Outcome<R>>>> = Arc::new(Mutex::new(None));
    let done: Event = Event::new(&format!("{} exited", name));

    let ctx: BridgeContext = BridgeContext {
        to_scheduler,
        from_scheduler,
        scheduler_thread: thread::current().id(),
    };
    let slot: Arc<Mutex<Option<Outcome<R>>>> = result.clone();
    let thread_name: String = name.to_string();
    let spawn: SpawnThread = Box::new(move || {
        thread::Builder::new().name(thread_name).spawn(move || {
            let outcome: Outcome<R> = match panic::catch_unwind(AssertUnwindSafe(|| f(&ctx))) {
                Ok(result) => Outcome::capture(result),
                Err(payload) => Outcome::Error(Fail::from_panic("bridged function", &*payload)),
            };
            if let Ok(mut slot) = slot.lock() {
                *slot = Some(outcome);
            }
            let _ = ctx.to_scheduler.send(ToScheduler::Exited);
        })
    });

    sched.push_bridge_waiter(Rc::new(RefCell::new(ThreadWaiter {
        name: name.to_string(),
        state: BridgeState::Init,
        spawn: Some(spawn),
        thread: None,
        to_thread,
        from_thread,
        resume_with: None,
        done: done.clone(),
    })));

    done.wait().await?;
    let outcome: Option<Outcome<R>> = match result.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => return Err(Fail::new(FailKind::Internal, "bridged thread poisoned its result")),
    };
    match outcome {
        Some(outcome) => outcome.get(),
        None => {
            let cause: String = format!("bridged thread {} exited without a result", name);
            Err(Fail::new(FailKind::Internal, &cause))
        },
    }
}

/// Starts or resumes a bridged thread and blocks until it either asks for a coroutine or exits.
pub(crate) fn run_until_blocked(sched: &SharedScheduler, waiter: &SharedThreadWaiter) {
    let (state, name): (BridgeState, String) = {
        let w = waiter.borrow();
        (w.state, w.name.clone())
    };

    match state {
        BridgeState::Init => {
            let spawn: Option<SpawnThread> = waiter.borrow_mut().spawn.take();
            let spawned: io::Result<JoinHandle<()>> = match spawn {
                Some(spawn) => spawn(),
                None => return,
            };
            match spawned {
                Ok(handle) => {
                    let mut w = waiter.borrow_mut();
                    w.thread = Some(handle);
                    w.state = BridgeState::Running;
                },
                Err(e) => {
                    error!("run_until_blocked(): failed to spawn thread {}: {}", name, e);
                    exited(waiter);
                    return;
                },
            }
        },
        BridgeState::Paused => {
            let (result, to_thread): (Option<CallResult>, Sender<CallResult>) = {
                let mut w = waiter.borrow_mut();
                (w.resume_with.take(), w.to_thread.clone())
            };
            let result: CallResult = match result {
                Some(result) => result,
                None => {
                    warn!("run_until_blocked(): thread {} has nothing to resume with", name);
                    return;
                },
            };
            waiter.borrow_mut().state = BridgeState::Running;
            trace!("run_until_blocked(): resuming thread {}", name);
            if to_thread.send(result).is_err() {
                exited(waiter);
                return;
            }
        },
        BridgeState::Running | BridgeState::Exited => return,
    }

    let from_thread: Receiver<ToScheduler> = waiter.borrow().from_thread.clone();
    match from_thread.recv() {
        Ok(ToScheduler::Call(request)) => {
            trace!("run_until_blocked(): thread {} paused", name);
            waiter.borrow_mut().state = BridgeState::Paused;
            let coroutine: LocalBoxFuture<'static, CallResult> = request(sched.clone());
            let resumer: SharedScheduler = sched.clone();
            let waiter: SharedThreadWaiter = waiter.clone();
            sched.start_soon(&format!("{} (resumed)", name), async move {
                let result: CallResult = coroutine.await;
                let cancelled: Option<Fail> = result.as_ref().err().filter(|e| e.is_cancelled()).cloned();
                waiter.borrow_mut().resume_with = Some(result);
                resumer.push_bridge_waiter(waiter);
                match cancelled {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            });
        },
        Ok(ToScheduler::Exited) | Err(_) => exited(waiter),
    }
}

fn exited(waiter: &SharedThreadWaiter) {
    let (thread, done, name) = {
        let mut w = waiter.borrow_mut();
        w.state = BridgeState::Exited;
        (w.thread.take(), w.done.clone(), w.name.clone())
    };
    if let Some(thread) = thread {
        if thread.join().is_err() {
            warn!("exited(): thread {} panicked after reporting its result", name);
        }
    }
    trace!("exited(): thread {}", name);
    done.set();
}
