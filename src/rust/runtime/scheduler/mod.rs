// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod scheduler;
mod task;
mod yielder;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    scheduler::SharedScheduler,
    task::{
        Coroutine,
        DoneCallback,
        Task,
        TaskId,
    },
    yielder::TriggerFuture,
};

pub(crate) use self::task::RawTask;
