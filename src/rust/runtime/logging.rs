// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    DeferredNow,
    Logger,
    LoggerHandle,
};
use ::log::Record;
use ::std::{
    io,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Once,
        OnceLock,
    },
};

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Keeps the logger alive for the lifetime of the process.
static LOGGER: OnceLock<LoggerHandle> = OnceLock::new();

/// Simulation time, in simulator steps, stamped on every log line.
static SIM_TIME: AtomicU64 = AtomicU64::new(0);

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The `RUST_LOG` environment variable takes precedence over `spec`.
pub fn initialize(spec: &str) {
    INIT_LOG.call_once(|| match Logger::try_with_env_or_str(spec) {
        Ok(logger) => match logger.format(sim_time_format).start() {
            Ok(handle) => {
                let _ = LOGGER.set(handle);
            },
            Err(e) => eprintln!("initialize(): failed to start logger: {}", e),
        },
        Err(e) => eprintln!("initialize(): invalid log specification {:?}: {}", spec, e),
    });
}

/// Updates the simulation time shown in log lines.
pub fn set_sim_time(steps: u64) {
    SIM_TIME.store(steps, Ordering::Relaxed);
}

fn sim_time_format(w: &mut dyn io::Write, _now: &mut DeferredNow, record: &Record) -> Result<(), io::Error> {
    write!(
        w,
        "{:>12} {:<5} {:<36} {}",
        SIM_TIME.load(Ordering::Relaxed),
        record.level(),
        record.module_path().unwrap_or("<unnamed>"),
        record.args()
    )
}
