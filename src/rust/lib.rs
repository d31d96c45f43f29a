// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

//! Cooperative cosimulation testbench framework.
//!
//! Test code is written as ordinary Rust futures and runs as [Task]s on a single-threaded [SharedScheduler]. Tasks
//! suspend on [Trigger]s (timers, simulation phases, signal edges, events, locks, joins) that the scheduler primes
//! against an external event-driven simulator described by [SimulatorBackend]. When the simulator fires a callback,
//! the scheduler wakes every task waiting on that trigger and runs them until none is runnable, then hands control
//! back to the simulator.

#[macro_use]
extern crate log;

pub mod regression;
pub mod runtime;
pub mod simulator;

pub use self::{
    regression::{
        RegressionManager,
        TestCase,
        TestContext,
        TestOutcome,
        TestResult,
    },
    runtime::{
        bridge::{
            bridge,
            BridgeContext,
        },
        config::Config,
        fail::{
            Fail,
            FailKind,
        },
        outcome::Outcome,
        scheduler::{
            SharedScheduler,
            Task,
            TaskId,
        },
        time::{
            RoundMode,
            TimeUnit,
        },
        triggers::{
            clock::Clock,
            event::Event,
            lock::Lock,
            Trigger,
        },
        waiters::{
            Awaitable,
            Combine,
            First,
            ReturnWhen,
        },
    },
    simulator::{
        Edge,
        SharedEventSimulator,
        SignalId,
        SimulatorBackend,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the enclosing `anyhow` function otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}` at {}:{}",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the enclosing `anyhow` function otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}` at {}:{}",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}
