// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::Fail;

//==============================================================================
// Structures
//==============================================================================

/// Captured result of a coroutine step: a value or the failure it raised. Used to resume suspended coroutines without
/// unwinding through the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Value(T),
    Error(Fail),
}

//==============================================================================
// Associate Functions
//==============================================================================

impl<T> Outcome<T> {
    /// Captures a result.
    pub fn capture(result: Result<T, Fail>) -> Self {
        match result {
            Ok(value) => Outcome::Value(value),
            Err(e) => Outcome::Error(e),
        }
    }

    /// Consumes the outcome, returning the value or the captured failure.
    pub fn get(self) -> Result<T, Fail> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Error(e) => Err(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn error(&self) -> Option<&Fail> {
        match self {
            Outcome::Value(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Value(value) => Outcome::Value(f(value)),
            Outcome::Error(e) => Outcome::Error(e),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<T> From<Result<T, Fail>> for Outcome<T> {
    fn from(result: Result<T, Fail>) -> Self {
        Self::capture(result)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
