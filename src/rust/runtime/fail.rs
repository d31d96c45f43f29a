// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::{
    any::Any,
    error,
    fmt,
    io,
};

//==============================================================================
// Structures
//==============================================================================

/// Failure category. Tasks and the regression manager route on this rather than on the cause string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailKind {
    /// Error raised by user test code.
    User,
    /// Programmer misuse of the scheduler or a trigger.
    Usage,
    /// Cancellation signal injected into a task.
    Cancelled,
    /// A cancelled task did not unwind with its cancellation signal.
    CancellationProtocol,
    /// A timed race was lost to its timer.
    Timeout,
    /// A task was queried for a result it does not have yet.
    InvalidState,
    /// Broken scheduler invariant.
    Internal,
    /// The simulator failed or terminated.
    SimFailure,
}

/// Failure
#[derive(Clone, PartialEq)]
pub struct Fail {
    /// Category.
    pub kind: FailKind,
    /// Cause.
    pub cause: String,
    /// Failure this one wraps, if any.
    source: Option<Box<Fail>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(kind: FailKind, cause: &str) -> Self {
        Self {
            kind,
            cause: cause.to_string(),
            source: None,
        }
    }

    /// Creates a new Failure that wraps `source`.
    pub fn wrap(kind: FailKind, cause: &str, source: Fail) -> Self {
        Self {
            kind,
            cause: cause.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand for a failure raised by test code.
    pub fn user(cause: &str) -> Self {
        Self::new(FailKind::User, cause)
    }

    /// Returns the wrapped failure, if any.
    pub fn inner(&self) -> Option<&Fail> {
        self.source.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailKind::Cancelled
    }

    /// Converts a caught panic payload into a user failure.
    pub fn from_panic(context: &str, payload: &(dyn Any + Send)) -> Self {
        let message: &str = if let Some(s) = payload.downcast_ref::<&str>() {
            s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "non-string panic payload"
        };
        Self::new(FailKind::User, &format!("{} panicked: {}", context, message))
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Display for FailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = match self {
            FailKind::User => "user error",
            FailKind::Usage => "usage error",
            FailKind::Cancelled => "cancelled",
            FailKind::CancellationProtocol => "cancellation protocol error",
            FailKind::Timeout => "timeout",
            FailKind::InvalidState => "invalid state",
            FailKind::Internal => "internal error",
            FailKind::SimFailure => "simulator failure",
        };
        f.write_str(name)
    }
}

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.cause)?;
        if let Some(source) = &self.source {
            write!(f, " (caused by {})", source)?;
        }
        Ok(())
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.kind, self.cause)?;
        if let Some(source) = &self.source {
            write!(f, " <- {:?}", source)?;
        }
        Ok(())
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source.as_deref().map(|fail| fail as &(dyn error::Error + 'static))
    }
}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Self::new(FailKind::User, &format!("I/O error: {}", e))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
