// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Conversions between physical time and simulator steps.
//!
//! The simulator reports its precision as a power of ten in seconds (e.g. `-12` for picoseconds). One simulator step
//! is one unit of that precision.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::{
    Fail,
    FailKind,
};
use ::std::{
    fmt,
    str::FromStr,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Relative tolerance under which a converted time is considered an exact number of steps.
const EXACT_TOLERANCE: f64 = 1e-9;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    /// Raw simulator steps.
    Step,
    Fs,
    Ps,
    Ns,
    Us,
    Ms,
    Sec,
}

/// What to do with a duration that is not an exact multiple of the simulator precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RoundMode {
    #[default]
    Error,
    Round,
    Ceil,
    Floor,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TimeUnit {
    /// Power of ten in seconds, or `None` for raw steps.
    pub fn exponent(self) -> Option<i32> {
        match self {
            TimeUnit::Step => None,
            TimeUnit::Fs => Some(-15),
            TimeUnit::Ps => Some(-12),
            TimeUnit::Ns => Some(-9),
            TimeUnit::Us => Some(-6),
            TimeUnit::Ms => Some(-3),
            TimeUnit::Sec => Some(0),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Converts `time` expressed in `unit` into a number of simulator steps.
pub fn get_sim_steps(time: f64, unit: TimeUnit, precision: i8, round_mode: RoundMode) -> Result<u64, Fail> {
    if !time.is_finite() || time <= 0.0 {
        let cause: String = format!("time must be a positive number (time={:?}, unit={})", time, unit);
        return Err(Fail::new(FailKind::Usage, &cause));
    }

    let raw: f64 = match unit.exponent() {
        None => time,
        Some(exponent) => time * 10f64.powi(exponent - i32::from(precision)),
    };

    let nearest: f64 = raw.round();
    let steps: f64 = if (raw - nearest).abs() <= EXACT_TOLERANCE * nearest.abs().max(1.0) {
        nearest
    } else {
        match round_mode {
            RoundMode::Error => {
                let cause: String = format!(
                    "unable to accurately represent {} {} with the simulator precision of 1e{}",
                    time, unit, precision
                );
                return Err(Fail::new(FailKind::Usage, &cause));
            },
            RoundMode::Round => nearest,
            RoundMode::Ceil => raw.ceil(),
            RoundMode::Floor => raw.floor(),
        }
    };

    if steps < 1.0 {
        let cause: String = format!("{} {} rounds to zero simulator steps", time, unit);
        return Err(Fail::new(FailKind::Usage, &cause));
    }
    if steps >= u64::MAX as f64 {
        let cause: String = format!("{} {} does not fit in the simulator time range", time, unit);
        return Err(Fail::new(FailKind::Usage, &cause));
    }
    Ok(steps as u64)
}

/// Converts a number of simulator steps into `unit`.
pub fn get_time_from_sim_steps(steps: u64, unit: TimeUnit, precision: i8) -> f64 {
    match unit.exponent() {
        None => steps as f64,
        // Whole units convert exactly.
        Some(exponent) => match i32::from(precision) - exponent {
            shift if shift < 0 => steps as f64 / 10f64.powi(-shift),
            shift => steps as f64 * 10f64.powi(shift),
        },
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = match self {
            TimeUnit::Step => "step",
            TimeUnit::Fs => "fs",
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::Sec => "sec",
        };
        f.write_str(name)
    }
}

impl FromStr for TimeUnit {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "step" | "steps" => Ok(TimeUnit::Step),
            "fs" => Ok(TimeUnit::Fs),
            "ps" => Ok(TimeUnit::Ps),
            "ns" => Ok(TimeUnit::Ns),
            "us" => Ok(TimeUnit::Us),
            "ms" => Ok(TimeUnit::Ms),
            "s" | "sec" => Ok(TimeUnit::Sec),
            other => Err(Fail::new(FailKind::Usage, &format!("unknown time unit {:?}", other))),
        }
    }
}

impl FromStr for RoundMode {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(RoundMode::Error),
            "round" => Ok(RoundMode::Round),
            "ceil" => Ok(RoundMode::Ceil),
            "floor" => Ok(RoundMode::Floor),
            other => Err(Fail::new(FailKind::Usage, &format!("unknown rounding mode {:?}", other))),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
