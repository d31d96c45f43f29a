// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::cosim::{
    ensure_eq,
    Fail,
    SharedEventSimulator,
    SharedScheduler,
    Task,
};
use ::flexi_logger::{
    writers::LogWriter,
    DeferredNow,
    Logger,
    LoggerHandle,
};
use ::log::{
    Level,
    Record,
};
use ::std::{
    io,
    rc::Rc,
    sync::{
        Arc,
        Mutex,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Keeps every log line in memory.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<(Level, String)>>>);

//==============================================================================
// Associate Functions
//==============================================================================

impl CapturedLog {
    fn warnings(&self) -> Result<Vec<String>> {
        let lines = self.0.lock().map_err(|_| anyhow::anyhow!("log capture is poisoned"))?;
        Ok(lines
            .iter()
            .filter(|(level, _)| *level == Level::Warn)
            .map(|(_, line)| line.clone())
            .collect())
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl LogWriter for CapturedLog {
    fn write(&self, _now: &mut DeferredNow, record: &Record) -> io::Result<()> {
        if let Ok(mut lines) = self.0.lock() {
            lines.push((record.level(), record.args().to_string()));
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[test]
fn cancelling_an_unstarted_task_is_reported() -> Result<()> {
    let log: CapturedLog = CapturedLog::default();
    let _logger: LoggerHandle = Logger::try_with_str("warn")?
        .log_to_writer(Box::new(log.clone()))
        .start()?;

    let sim: SharedEventSimulator = SharedEventSimulator::new(-12);
    let sched: SharedScheduler = SharedScheduler::new(Rc::new(sim));
    let task: Task<u32> = sched.start_soon("never", async { Ok::<u32, Fail>(1) });
    ensure_eq!(task.cancel(None), true);

    let warnings: Vec<String> = log.warnings()?;
    ensure_eq!(warnings.len(), 1);
    ensure_eq!(warnings[0].contains("never"), true);
    ensure_eq!(warnings[0].contains("before it started"), true);

    // Teardown of tasks that never ran stays quiet.
    let idle: Task<u32> = sched.start_soon("idle", async { Ok::<u32, Fail>(2) });
    ensure_eq!(sched.cancel_all_tasks(), 1);
    ensure_eq!(idle.done(), true);
    ensure_eq!(log.warnings()?.len(), 1);
    Ok(())
}
