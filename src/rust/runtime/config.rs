// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        Fail,
        FailKind,
    },
    time::{
        RoundMode,
        TimeUnit,
    },
};
use ::std::{
    fs,
    str::FromStr,
};
use ::yaml_rust::{
    yaml::Hash,
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Global options.
mod cosim_config {
    pub const SECTION_NAME: &str = "cosim";
    // Log specification, e.g. "info" or "cosim::runtime::scheduler=trace".
    pub const LOG_LEVEL: &str = "log_level";
    pub const RANDOM_SEED: &str = "random_seed";
}

// Scheduler options.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    pub const TIMER_ROUND_MODE: &str = "timer_round_mode";
    // Precision used when no simulator is attached, as a power of ten in seconds.
    pub const TIME_PRECISION: &str = "time_precision";
}

// Regression options.
mod regression_config {
    pub const SECTION_NAME: &str = "regression";
    // Comma-separated in the environment, a list in the file.
    pub const TESTCASE: &str = "testcase";
    pub const DEFAULT_TIMEOUT: &str = "default_timeout";
    pub const TIME: &str = "time";
    pub const UNIT: &str = "unit";
}

const DEFAULT_TIME_PRECISION: i8 = -12;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Testbench configuration. Every option may be overridden by an environment variable named after the option in
/// upper case.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let config_s: String = fs::read_to_string(config_path)?;
        config_s.parse()
    }

    fn get_cosim_config(&self) -> Option<&Yaml> {
        Self::get_option(&self.0, cosim_config::SECTION_NAME)
    }

    fn get_scheduler_config(&self) -> Option<&Yaml> {
        Self::get_option(&self.0, scheduler_config::SECTION_NAME)
    }

    fn get_regression_config(&self) -> Option<&Yaml> {
        Self::get_option(&self.0, regression_config::SECTION_NAME)
    }

    /// Log specification for the logger, if one is configured.
    pub fn log_level(&self) -> Result<Option<String>, Fail> {
        if let Some(level) = Self::get_typed_env_option(cosim_config::LOG_LEVEL)? {
            return Ok(Some(level));
        }
        match self.get_cosim_config() {
            Some(section) => Self::get_optional(section, cosim_config::LOG_LEVEL, |yaml: &Yaml| {
                yaml.as_str().map(str::to_string)
            }),
            None => Ok(None),
        }
    }

    /// Seed for test randomization, if one is configured.
    pub fn random_seed(&self) -> Result<Option<u64>, Fail> {
        if let Some(seed) = Self::get_typed_env_option(cosim_config::RANDOM_SEED)? {
            return Ok(Some(seed));
        }
        match self.get_cosim_config() {
            Some(section) => Self::get_optional(section, cosim_config::RANDOM_SEED, |yaml: &Yaml| {
                yaml.as_i64().and_then(|seed| u64::try_from(seed).ok())
            }),
            None => Ok(None),
        }
    }

    pub fn timer_round_mode(&self) -> Result<RoundMode, Fail> {
        if let Some(mode) = Self::get_typed_env_option(scheduler_config::TIMER_ROUND_MODE)? {
            return Ok(mode);
        }
        let mode: Option<RoundMode> = match self.get_scheduler_config() {
            Some(section) => Self::get_optional(section, scheduler_config::TIMER_ROUND_MODE, |yaml: &Yaml| {
                yaml.as_str().and_then(|s| s.parse().ok())
            })?,
            None => None,
        };
        Ok(mode.unwrap_or_default())
    }

    pub fn time_precision(&self) -> Result<i8, Fail> {
        if let Some(precision) = Self::get_typed_env_option(scheduler_config::TIME_PRECISION)? {
            return Ok(precision);
        }
        let precision: Option<i8> = match self.get_scheduler_config() {
            Some(section) => Self::get_optional(section, scheduler_config::TIME_PRECISION, |yaml: &Yaml| {
                yaml.as_i64().and_then(|p| i8::try_from(p).ok())
            })?,
            None => None,
        };
        Ok(precision.unwrap_or(DEFAULT_TIME_PRECISION))
    }

    /// Names of the tests to run. Empty means all of them.
    pub fn testcases(&self) -> Result<Vec<String>, Fail> {
        if let Ok(var) = ::std::env::var(regression_config::TESTCASE.to_uppercase()) {
            return Ok(var
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect());
        }
        let section: &Yaml = match self.get_regression_config() {
            Some(section) => section,
            None => return Ok(Vec::new()),
        };
        let names: Option<Vec<String>> = Self::get_optional(section, regression_config::TESTCASE, |yaml: &Yaml| {
            match yaml {
                Yaml::String(name) => Some(vec![name.clone()]),
                Yaml::Array(names) => names.iter().map(|name| name.as_str().map(str::to_string)).collect(),
                _ => None,
            }
        })?;
        Ok(names.unwrap_or_default())
    }

    /// Timeout applied to tests that do not set their own.
    pub fn default_timeout(&self) -> Result<Option<(f64, TimeUnit)>, Fail> {
        let section: &Yaml = match self.get_regression_config() {
            Some(section) => match Self::get_option(section, regression_config::DEFAULT_TIMEOUT) {
                Some(section) => section,
                None => return Ok(None),
            },
            None => return Ok(None),
        };
        let time: f64 = Self::get_typed_option(section, regression_config::TIME, |yaml: &Yaml| {
            yaml.as_f64().or_else(|| yaml.as_i64().map(|time| time as f64))
        })?;
        let unit: TimeUnit = match Self::get_option(section, regression_config::UNIT) {
            Some(Yaml::String(unit)) => unit.parse()?,
            Some(_) => return Err(Self::unexpected_type(regression_config::UNIT)),
            None => TimeUnit::Ns,
        };
        Ok(Some((time, unit)))
    }

    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Option<&'a Yaml> {
        let option: &'a Yaml = &yaml[index];
        match option {
            Yaml::BadValue | Yaml::Null => None,
            _ => Some(option),
        }
    }

    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        match Self::get_optional(yaml, index, receiver)? {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("missing parameter {}", index);
                Err(Fail::new(FailKind::Usage, message.as_str()))
            },
        }
    }

    /// Reads an option that may be absent. An option that is present with the wrong type is an error.
    fn get_optional<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<Option<T>, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        match Self::get_option(yaml, index) {
            Some(option) => match receiver(option) {
                Some(value) => Ok(Some(value)),
                None => Err(Self::unexpected_type(index)),
            },
            None => Ok(None),
        }
    }

    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        // Check for the environment variable.
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                return Err(Self::unexpected_type(index));
            }
        }
        Ok(None)
    }

    fn unexpected_type(index: &str) -> Fail {
        let message: String = format!("parameter {} has unexpected type", index);
        error!("config: {}", message);
        Fail::new(FailKind::Usage, message.as_str())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Config {
    fn default() -> Self {
        Self(Yaml::Hash(Hash::new()))
    }
}

impl FromStr for Config {
    type Err = Fail;

    fn from_str(config_s: &str) -> Result<Self, Self::Err> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration: {}", e);
                return Err(Fail::new(FailKind::Usage, &cause));
            },
        };
        match &config[..] {
            [] => Ok(Self::default()),
            [c] => Ok(Self(c.clone())),
            _ => Err(Fail::new(FailKind::Usage, "Wrong number of config objects")),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
