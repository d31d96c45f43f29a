// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::cosim::{
    runtime::logging,
    SharedEventSimulator,
    SharedScheduler,
    TimeUnit,
};
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//==============================================================================
// Constants
//==============================================================================

/// Picosecond precision.
pub const PRECISION: i8 = -12;

//==============================================================================
// Structures
//==============================================================================

/// A scheduler attached to the reference simulator.
pub struct Bench {
    pub sim: SharedEventSimulator,
    pub sched: SharedScheduler,
}

/// Shared record of what tasks did, in order.
pub type Trace<T> = Rc<RefCell<Vec<T>>>;

//==============================================================================
// Associate Functions
//==============================================================================

impl Bench {
    pub fn new() -> Self {
        logging::initialize("warn");
        let sim: SharedEventSimulator = SharedEventSimulator::new(PRECISION);
        let sched: SharedScheduler = SharedScheduler::new(Rc::new(sim.clone()));
        Self { sim, sched }
    }

    /// Runs tasks that are ready now, then lets the simulator run out of events.
    pub fn run(&self) -> Result<()> {
        self.sched.event_loop()?;
        self.sim.run(None)?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn now_ns(&self) -> f64 {
        self.sched.sim_time(TimeUnit::Ns)
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

#[allow(dead_code)]
pub fn trace<T>() -> Trace<T> {
    Rc::new(RefCell::new(Vec::new()))
}
