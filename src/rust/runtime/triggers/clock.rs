// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::{
            Fail,
            FailKind,
        },
        scheduler::{
            SharedScheduler,
            Task,
        },
        time::{
            self,
            TimeUnit,
        },
        triggers::Trigger,
    },
    simulator::{
        Edge,
        SignalId,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Free-running clock that toggles a signal with a fixed period.
pub struct Clock {
    signal: SignalId,
    high_steps: u64,
    low_steps: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Clock {
    /// Creates a clock with a 50% duty cycle. The period must span at least two simulator steps.
    pub fn new(sched: &SharedScheduler, signal: SignalId, period: f64, unit: TimeUnit) -> Result<Self, Fail> {
        let precision: i8 = sched.sim().get_precision();
        let period_steps: u64 = time::get_sim_steps(period, unit, precision, Default::default())?;
        if period_steps < 2 {
            let cause: String = format!("clock period of {} {} is shorter than two simulator steps", period, unit);
            return Err(Fail::new(FailKind::Usage, &cause));
        }
        let high_steps: u64 = period_steps / 2;
        Ok(Self {
            signal,
            high_steps,
            low_steps: period_steps - high_steps,
        })
    }

    pub fn period_steps(&self) -> u64 {
        self.high_steps + self.low_steps
    }

    /// Starts driving the clock. Cancel the returned task to stop it.
    pub fn start(&self, sched: &SharedScheduler) -> Task<()> {
        let name: String = format!("clock(signal {})", self.signal.0);
        sched.start_soon(
            &name,
            drive(sched.clone(), self.signal, self.high_steps, self.low_steps),
        )
    }
}

async fn drive(sched: SharedScheduler, signal: SignalId, high_steps: u64, low_steps: u64) -> Result<(), Fail> {
    let high: Trigger = Trigger::timer_steps(high_steps)?;
    let low: Trigger = Trigger::timer_steps(low_steps)?;
    loop {
        sched.write(signal, 1)?;
        high.clone().await?;
        sched.write(signal, 0)?;
        low.clone().await?;
    }
}

/// Waits for `num_cycles` transitions of `signal` matching `edge`.
pub async fn clock_cycles(signal: SignalId, num_cycles: u32, edge: Edge) -> Result<(), Fail> {
    let trigger: Trigger = Trigger::edge(signal, edge);
    for _ in 0..num_cycles {
        trigger.clone().await?;
    }
    Ok(())
}
