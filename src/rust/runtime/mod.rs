// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod bridge;
pub mod config;
pub mod fail;
pub mod logging;
pub mod outcome;
pub mod scheduler;
pub mod time;
pub mod triggers;
pub mod waiters;
