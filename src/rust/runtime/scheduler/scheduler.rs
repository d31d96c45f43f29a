// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our single-threaded trampoline scheduler.
//!
//! Tasks are polled directly by the scheduler rather than woken through wakers. When a task suspends, it tells the
//! scheduler which [Trigger] it is waiting on; the scheduler primes that trigger and records the association. When a
//! trigger fires, every task waiting on it is queued and the event loop resumes queued tasks one at a time, in FIFO
//! order, until nothing is runnable.
//!
//! No borrow of the scheduler state is held while a task is polled, a trigger is primed, unprimed or fired, the
//! simulator is called, or a user callback runs. Any of those may re-enter the scheduler.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        bridge::{
            self,
            SharedThreadWaiter,
        },
        fail::{
            Fail,
            FailKind,
        },
        logging,
        outcome::Outcome,
        scheduler::task::{
            Coroutine,
            RawTask,
            Step,
            Task,
            TaskId,
        },
        time::{
            self,
            RoundMode,
            TimeUnit,
        },
        triggers::{
            ReactionKind,
            Trigger,
            TriggerCallback,
            TriggerId,
            TriggerKind,
        },
    },
    simulator::{
        SignalId,
        SimPhase,
        SimulatorBackend,
    },
};
use ::slab::Slab;
use ::std::{
    cell::RefCell,
    collections::{
        HashMap,
        VecDeque,
    },
    future::Future,
    mem,
    rc::{
        Rc,
        Weak,
    },
    thread::{
        self,
        ThreadId,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Tasks waiting on a primed trigger.
struct TriggerWaiters {
    trigger: Trigger,
    tasks: Vec<Rc<dyn RawTask>>,
}

/// Task Scheduler
pub struct Scheduler {
    sim: Rc<dyn SimulatorBackend>,
    round_mode: RoundMode,
    // Live tasks. A task leaves this table when it finishes.
    tasks: Slab<Rc<dyn RawTask>>,
    next_task_id: u64,
    // Primed triggers and the tasks waiting on each.
    trigger_to_tasks: HashMap<TriggerId, TriggerWaiters>,
    // Tasks ready to run, with the outcome to resume each one with and the trigger that woke it, if any.
    scheduled_tasks: VecDeque<(Rc<dyn RawTask>, Outcome<()>, Option<Trigger>)>,
    // Software triggers fired since the last reaction pass.
    pending_triggers: VecDeque<Trigger>,
    current_task: Option<TaskId>,
    in_event_loop: bool,
    phase: SimPhase,
    // Signal writes deferred to the next read-write phase.
    pending_writes: Vec<(SignalId, u64)>,
    pending_bridge_threads: VecDeque<SharedThreadWaiter>,
    home_thread: ThreadId,
    read_only: Trigger,
    read_write: Trigger,
    next_time_step: Trigger,
}

#[derive(Clone)]
pub struct SharedScheduler(Rc<RefCell<Scheduler>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedScheduler {
    pub fn new(sim: Rc<dyn SimulatorBackend>) -> Self {
        Self::with_round_mode(sim, RoundMode::default())
    }

    /// Creates a scheduler whose timers round durations with `round_mode`.
    pub fn with_round_mode(sim: Rc<dyn SimulatorBackend>, round_mode: RoundMode) -> Self {
        Self(Rc::new(RefCell::new(Scheduler {
            sim,
            round_mode,
            tasks: Slab::new(),
            next_task_id: 0,
            trigger_to_tasks: HashMap::new(),
            scheduled_tasks: VecDeque::new(),
            pending_triggers: VecDeque::new(),
            current_task: None,
            in_event_loop: false,
            phase: SimPhase::Normal,
            pending_writes: Vec::new(),
            pending_bridge_threads: VecDeque::new(),
            home_thread: thread::current().id(),
            read_only: Trigger::new(TriggerKind::ReadOnly),
            read_write: Trigger::new(TriggerKind::ReadWrite),
            next_time_step: Trigger::new(TriggerKind::NextTimeStep),
        })))
    }

    pub(crate) fn from_weak(weak: &Weak<RefCell<Scheduler>>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    fn downgrade(&self) -> Weak<RefCell<Scheduler>> {
        Rc::downgrade(&self.0)
    }

    pub fn sim(&self) -> Rc<dyn SimulatorBackend> {
        self.0.borrow().sim.clone()
    }

    //==================================================================================================================
    // Tasks
    //==================================================================================================================

    /// Wraps `coroutine` into a task without scheduling it.
    pub fn create_task<T, F>(&self, name: &str, coroutine: F) -> Task<T>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T, Fail>> + 'static,
    {
        let coroutine: Coroutine<T> = Box::pin(coroutine);
        let id: TaskId = {
            let mut s = self.0.borrow_mut();
            s.next_task_id += 1;
            TaskId(s.next_task_id)
        };
        let task: Task<T> = Task::new(id, name, coroutine, self.downgrade());
        let raw: Rc<dyn RawTask> = task.raw();
        let slot: usize = self.0.borrow_mut().tasks.insert(raw.clone());
        raw.set_slot(Some(slot));
        trace!("create_task(): name={} id={:?}", name, id);
        task
    }

    /// Creates a task and queues it to run in the current event-loop pass.
    pub fn start_soon<T, F>(&self, name: &str, coroutine: F) -> Task<T>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T, Fail>> + 'static,
    {
        let task: Task<T> = self.create_task(name, coroutine);
        self.schedule(&task);
        task
    }

    /// Creates a task, queues it, and yields once so it gets to run before the caller continues.
    pub async fn start<T, F>(&self, name: &str, coroutine: F) -> Result<Task<T>, Fail>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T, Fail>> + 'static,
    {
        let task: Task<T> = self.start_soon(name, coroutine);
        Trigger::null().await?;
        Ok(task)
    }

    /// Queues a task to be resumed with a plain continuation.
    pub fn schedule<T: Clone + 'static>(&self, task: &Task<T>) {
        self.schedule_raw(task.raw(), Outcome::Value(()));
    }

    /// Runs one step of `task` with `outcome`, then registers it on whatever it suspends on.
    pub fn resume<T: Clone + 'static>(&self, task: &Task<T>, outcome: Outcome<()>) -> Result<(), Fail> {
        self.resume_raw(task.raw(), outcome)
    }

    pub fn current_task_id(&self) -> Option<TaskId> {
        self.0.borrow().current_task
    }

    /// Number of live tasks.
    pub fn num_tasks(&self) -> usize {
        self.0.borrow().tasks.len()
    }

    /// Cancels every live task. Tasks that never started are dropped without a warning. Returns the number of tasks
    /// that were sent a cancellation.
    pub fn cancel_all_tasks(&self) -> usize {
        let tasks: Vec<Rc<dyn RawTask>> = self.0.borrow().tasks.iter().map(|(_, task)| task.clone()).collect();
        let mut cancelled: usize = 0;
        for task in tasks {
            if self.cancel_task_with(task, Some("test teardown"), false) {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub(crate) fn schedule_raw(&self, task: Rc<dyn RawTask>, outcome: Outcome<()>) {
        if task.is_done() {
            debug!("schedule(): task {} is already done", task.name());
            return;
        }
        let mut s = self.0.borrow_mut();
        if task.trigger().is_some() || s.scheduled_tasks.iter().any(|(queued, ..)| queued.id() == task.id()) {
            debug!("schedule(): task {} is already scheduled", task.name());
            return;
        }
        s.scheduled_tasks.push_back((task, outcome, None));
    }

    pub(crate) fn resume_raw(&self, task: Rc<dyn RawTask>, outcome: Outcome<()>) -> Result<(), Fail> {
        if task.is_done() {
            debug!("resume(): task {} is already done", task.name());
            return Ok(());
        }
        {
            let mut s = self.0.borrow_mut();
            if let Some(current) = s.current_task {
                let cause: String = format!("cannot resume task {} while task {:?} is running", task.name(), current);
                error!("resume(): {}", cause);
                return Err(Fail::new(FailKind::Internal, &cause));
            }
            s.current_task = Some(task.id());
        }

        let mut outcome: Outcome<()> = outcome;
        let mut finished: bool = false;
        while !finished {
            if let Outcome::Error(e) = &outcome {
                if e.is_cancelled() && task.cancel_requested().is_some() {
                    task.mark_cancel_delivered();
                }
            }

            trace!("resume(): task={}", task.name());
            let injected: Outcome<()> = mem::replace(&mut outcome, Outcome::Value(()));
            let suspended_on: Result<Trigger, Fail> = match task.advance(injected) {
                Step::Finished => {
                    finished = true;
                    continue;
                },
                Step::Invalid(e) => Err(e),
                Step::Yielded(trigger) => Ok(trigger),
            };

            // Cancellation takes precedence over whatever the task suspended on.
            if let Some(cancel) = task.cancel_requested() {
                if task.cancel_delivered() {
                    let cause: String = format!("task {} was cancelled but continued running", task.name());
                    task.abort(Fail::wrap(FailKind::CancellationProtocol, &cause, cancel));
                    finished = true;
                    continue;
                }
                outcome = Outcome::Error(cancel);
                continue;
            }

            match suspended_on {
                Ok(trigger) => match self.schedule_task_upon(&task, &trigger) {
                    Ok(()) => break,
                    Err(e) => {
                        debug!("resume(): task {} cannot wait on {}: {}", task.name(), trigger, e);
                        outcome = Outcome::Error(e);
                    },
                },
                Err(e) => {
                    warn!("resume(): {}", e);
                    outcome = Outcome::Error(e);
                },
            }
        }

        self.0.borrow_mut().current_task = None;
        if finished {
            self.finish_task(&task);
        }
        self.drain_bridge_threads();
        Ok(())
    }

    pub(crate) fn cancel_task(&self, task: Rc<dyn RawTask>, msg: Option<&str>) -> bool {
        self.cancel_task_with(task, msg, true)
    }

    fn cancel_task_with(&self, task: Rc<dyn RawTask>, msg: Option<&str>, warn_unstarted: bool) -> bool {
        if task.is_done() {
            return false;
        }

        if !task.is_started() {
            if warn_unstarted {
                warn!(
                    "cancel(): task {} was cancelled before it started; it is marked done without a result",
                    task.name()
                );
            }
            task.abandon();
            self.finish_task(&task);
            return true;
        }

        let cause: String = match msg {
            Some(msg) => format!("task {} was cancelled: {}", task.name(), msg),
            None => format!("task {} was cancelled", task.name()),
        };
        let cancel: Fail = Fail::new(FailKind::Cancelled, &cause);
        if !task.request_cancel(cancel.clone()) {
            trace!("cancel(): task {} already has a pending cancellation", task.name());
            return true;
        }

        // The running task sees its cancellation at its next suspension point.
        if self.0.borrow().current_task == Some(task.id()) {
            return true;
        }

        self.unschedule_from_trigger(&task);
        let woken_by: Option<Trigger> = {
            let mut s = self.0.borrow_mut();
            match s.scheduled_tasks.iter_mut().find(|(queued, ..)| queued.id() == task.id()) {
                Some(entry) => {
                    entry.1 = Outcome::Error(cancel);
                    entry.2.take()
                },
                None => {
                    s.scheduled_tasks.push_back((task, Outcome::Error(cancel), None));
                    None
                },
            }
        };
        // The task will never see what woke it.
        if let Some(trigger) = woken_by {
            trigger.abandon();
        }
        true
    }

    fn finish_task(&self, task: &Rc<dyn RawTask>) {
        debug!("finish_task(): task {} finished", task.name());
        self.unschedule(task);
        task.mark_finished();
        let join: Trigger = task.join_trigger();
        if join.is_primed() {
            join.fire();
        }
        for callback in task.take_done_callbacks() {
            callback();
        }
    }

    /// Forgets every piece of bookkeeping that refers to `task`.
    fn unschedule(&self, task: &Rc<dyn RawTask>) {
        self.unschedule_from_trigger(task);
        let removed: Option<Rc<dyn RawTask>> = {
            let mut s = self.0.borrow_mut();
            s.scheduled_tasks.retain(|(queued, ..)| queued.id() != task.id());
            match task.slot() {
                Some(slot) if s.tasks.contains(slot) => Some(s.tasks.remove(slot)),
                _ => None,
            }
        };
        task.set_slot(None);
        drop(removed);
    }

    //==================================================================================================================
    // Triggers
    //==================================================================================================================

    /// Registers `task` as a waiter of `trigger`, priming the trigger if it is not already.
    fn schedule_task_upon(&self, task: &Rc<dyn RawTask>, trigger: &Trigger) -> Result<(), Fail> {
        let (needs_prime, sim, phase): (bool, Rc<dyn SimulatorBackend>, SimPhase) = {
            let mut s = self.0.borrow_mut();
            let sim: Rc<dyn SimulatorBackend> = s.sim.clone();
            let phase: SimPhase = s.phase;
            match s.trigger_to_tasks.get_mut(&trigger.id()) {
                Some(waiters) => {
                    if !trigger.allows_multiple_waiters() {
                        let owner: String = waiters.tasks.first().map(|t| t.name().to_string()).unwrap_or_default();
                        let cause: String = format!("{} is already awaited by task {}", trigger, owner);
                        return Err(Fail::new(FailKind::Usage, &cause));
                    }
                    waiters.tasks.push(task.clone());
                    (false, sim, phase)
                },
                None => {
                    s.trigger_to_tasks.insert(
                        trigger.id(),
                        TriggerWaiters {
                            trigger: trigger.clone(),
                            tasks: vec![task.clone()],
                        },
                    );
                    (true, sim, phase)
                },
            }
        };
        task.set_trigger(Some(trigger.clone()));

        if needs_prime {
            let callback: TriggerCallback = match trigger.reaction_kind() {
                ReactionKind::Simulator => self.sim_callback(),
                ReactionKind::Software => self.software_callback(),
            };
            if let Err(e) = trigger.prime(callback, &sim, phase) {
                self.0.borrow_mut().trigger_to_tasks.remove(&trigger.id());
                task.set_trigger(None);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Removes `task` from the waiters of its trigger, unpriming the trigger once nobody waits on it.
    fn unschedule_from_trigger(&self, task: &Rc<dyn RawTask>) {
        let trigger: Trigger = match task.trigger() {
            Some(trigger) => trigger,
            None => return,
        };
        task.set_trigger(None);

        let (unprime, sim): (bool, Rc<dyn SimulatorBackend>) = {
            let mut s = self.0.borrow_mut();
            let mut now_empty: bool = false;
            if let Some(waiters) = s.trigger_to_tasks.get_mut(&trigger.id()) {
                waiters.tasks.retain(|waiter| waiter.id() != task.id());
                now_empty = waiters.tasks.is_empty();
            }
            if now_empty {
                s.trigger_to_tasks.remove(&trigger.id());
            }
            // The read-write callback still has writes to apply.
            let held_for_writes: bool = trigger.is_read_write() && !s.pending_writes.is_empty();
            (now_empty && !held_for_writes, s.sim.clone())
        };
        if unprime {
            trigger.unprime(&sim);
        }
    }

    fn sim_callback(&self) -> TriggerCallback {
        let scheduler: Weak<RefCell<Scheduler>> = self.downgrade();
        Rc::new(move |trigger: &Trigger| {
            if let Some(scheduler) = SharedScheduler::from_weak(&scheduler) {
                scheduler.sim_react(trigger);
            }
        })
    }

    fn software_callback(&self) -> TriggerCallback {
        let scheduler: Weak<RefCell<Scheduler>> = self.downgrade();
        Rc::new(move |trigger: &Trigger| {
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.borrow_mut().pending_triggers.push_back(trigger.clone());
            }
        })
    }

    /// Queues every task waiting on `trigger` and resets the trigger.
    pub fn react(&self, trigger: &Trigger) {
        let waiters: Option<TriggerWaiters> = self.0.borrow_mut().trigger_to_tasks.remove(&trigger.id());
        match waiters {
            Some(waiters) => {
                trace!("react(): {} woke {} task(s)", waiters.trigger, waiters.tasks.len());
                let mut s = self.0.borrow_mut();
                for task in waiters.tasks {
                    task.set_trigger(None);
                    s.scheduled_tasks.push_back((task, Outcome::Value(()), Some(trigger.clone())));
                }
            },
            None if trigger.reaction_kind() == ReactionKind::Simulator && !trigger.is_read_write() => {
                error!("react(): no task is waiting on {}", trigger);
            },
            None => trace!("react(): no task is waiting on {}", trigger),
        }
        trigger.cleanup();
    }

    /// Resumes queued tasks until nothing is runnable. Calls made while the loop is already running return right away.
    pub fn event_loop(&self) -> Result<(), Fail> {
        {
            let mut s = self.0.borrow_mut();
            if s.in_event_loop {
                trace!("event_loop(): already running");
                return Ok(());
            }
            s.in_event_loop = true;
        }
        let result: Result<(), Fail> = self.run_ready_tasks();
        self.0.borrow_mut().in_event_loop = false;
        result
    }

    fn run_ready_tasks(&self) -> Result<(), Fail> {
        self.react_pending();
        loop {
            let next: Option<(Rc<dyn RawTask>, Outcome<()>, Option<Trigger>)> =
                self.0.borrow_mut().scheduled_tasks.pop_front();
            let (task, outcome, _) = match next {
                Some(next) => next,
                None => return Ok(()),
            };
            self.resume_raw(task, outcome)?;
            self.react_pending();
        }
    }

    fn react_pending(&self) {
        loop {
            let next: Option<Trigger> = self.0.borrow_mut().pending_triggers.pop_front();
            match next {
                Some(trigger) => self.react(&trigger),
                None => return,
            }
        }
    }

    /// Entry point for simulator callbacks.
    ///
    /// # Panics
    ///
    /// Panics if the event loop reports an internal error, since the scheduler state can no longer be trusted.
    pub fn sim_react(&self, trigger: &Trigger) {
        let apply_writes: bool = {
            let mut s = self.0.borrow_mut();
            s.phase = trigger.phase_on_fire();
            trigger.is_read_write()
        };
        logging::set_sim_time(self.sim_steps());
        if apply_writes {
            self.apply_writes();
        }
        self.react(trigger);
        if let Err(e) = self.event_loop() {
            error!("sim_react(): {}", e);
            panic!("scheduler state is corrupt: {}", e);
        }
    }

    //==================================================================================================================
    // Simulator Access
    //==================================================================================================================

    /// Writes `value` to `signal`. Outside of the read-write phase the write is deferred to the next one.
    pub fn write(&self, signal: SignalId, value: u64) -> Result<(), Fail> {
        let (phase, sim): (SimPhase, Rc<dyn SimulatorBackend>) = {
            let s = self.0.borrow();
            (s.phase, s.sim.clone())
        };
        match phase {
            SimPhase::ReadOnly => {
                let cause: String = format!("cannot write signal {} in the read-only phase", signal.0);
                Err(Fail::new(FailKind::Usage, &cause))
            },
            SimPhase::ReadWrite => sim.set_signal_value(signal, value),
            SimPhase::Normal => {
                let read_write: Trigger = {
                    let mut s = self.0.borrow_mut();
                    s.pending_writes.push((signal, value));
                    s.read_write.clone()
                };
                if !read_write.is_primed() {
                    read_write.prime(self.sim_callback(), &sim, phase)?;
                }
                Ok(())
            },
        }
    }

    pub fn read(&self, signal: SignalId) -> Result<u64, Fail> {
        self.sim().get_signal_value(signal)
    }

    fn apply_writes(&self) {
        let (writes, sim) = {
            let mut s = self.0.borrow_mut();
            (mem::take(&mut s.pending_writes), s.sim.clone())
        };
        for (signal, value) in writes {
            if let Err(e) = sim.set_signal_value(signal, value) {
                error!("apply_writes(): {}", e);
            }
        }
    }

    pub fn phase(&self) -> SimPhase {
        self.0.borrow().phase
    }

    pub fn sim_steps(&self) -> u64 {
        self.sim().get_sim_time()
    }

    pub fn sim_time(&self, unit: TimeUnit) -> f64 {
        let sim: Rc<dyn SimulatorBackend> = self.sim();
        time::get_time_from_sim_steps(sim.get_sim_time(), unit, sim.get_precision())
    }

    /// Trigger that fires after `time` in `unit`, rounded with the scheduler's rounding mode.
    pub fn timer(&self, time: f64, unit: TimeUnit) -> Result<Trigger, Fail> {
        let round_mode: RoundMode = self.0.borrow().round_mode;
        self.timer_with_round_mode(time, unit, round_mode)
    }

    pub fn timer_with_round_mode(&self, time: f64, unit: TimeUnit, round_mode: RoundMode) -> Result<Trigger, Fail> {
        let precision: i8 = self.sim().get_precision();
        Trigger::timer_steps(time::get_sim_steps(time, unit, precision, round_mode)?)
    }

    pub fn read_only(&self) -> Trigger {
        self.0.borrow().read_only.clone()
    }

    pub fn read_write(&self) -> Trigger {
        self.0.borrow().read_write.clone()
    }

    pub fn next_time_step(&self) -> Trigger {
        self.0.borrow().next_time_step.clone()
    }

    //==================================================================================================================
    // Bridged Threads
    //==================================================================================================================

    pub(crate) fn push_bridge_waiter(&self, waiter: SharedThreadWaiter) {
        self.0.borrow_mut().pending_bridge_threads.push_back(waiter);
    }

    /// Runs bridged threads that are ready to make progress. Only the scheduler's own thread does this.
    fn drain_bridge_threads(&self) {
        if thread::current().id() != self.0.borrow().home_thread {
            return;
        }
        loop {
            let next: Option<SharedThreadWaiter> = self.0.borrow_mut().pending_bridge_threads.pop_front();
            match next {
                Some(waiter) => bridge::run_until_blocked(self, &waiter),
                None => return,
            }
        }
    }
}
