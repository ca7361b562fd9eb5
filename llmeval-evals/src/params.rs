// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Typed reader over the free-form parameter map a metric is configured with.

use llmeval_core::MetricParams;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Error raised by a metric factory while building an instance
#[derive(Debug, Error)]
pub enum MetricBuildError {
    #[error("Invalid value for parameter '{param}': {reason}")]
    InvalidParam { param: String, reason: String },

    #[error("Missing required parameter '{0}'")]
    MissingParam(String),

    #[error("Unknown {kind} backend '{name}'")]
    UnknownBackend { kind: &'static str, name: String },
}

impl MetricBuildError {
    fn invalid(param: &str, reason: impl Into<String>) -> Self {
        MetricBuildError::InvalidParam {
            param: param.to_string(),
            reason: reason.into(),
        }
    }
}

/// Read-only view over [`MetricParams`] with typed accessors.
///
/// Absent keys fall back to the caller's default. Present keys of the wrong
/// type are an error. Keys no accessor asked for are ignored and reported at
/// debug level by [`Params::finish`].
pub struct Params<'a> {
    metric: &'a str,
    raw: &'a MetricParams,
    seen: BTreeSet<&'a str>,
}

impl<'a> Params<'a> {
    pub fn new(metric: &'a str, raw: &'a MetricParams) -> Self {
        Self {
            metric,
            raw,
            seen: BTreeSet::new(),
        }
    }

    fn lookup(&mut self, key: &'a str) -> Option<&'a Value> {
        self.seen.insert(key);
        self.raw.get(key).filter(|v| !v.is_null())
    }

    pub fn f64_or(&mut self, key: &'a str, default: f64) -> Result<f64, MetricBuildError> {
        match self.lookup(key) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    MetricBuildError::invalid(key, format!("expected a number, got {value}"))
                }),
        }
    }

    pub fn u64_or(&mut self, key: &'a str, default: u64) -> Result<u64, MetricBuildError> {
        match self.lookup(key) {
            None => Ok(default),
            Some(value) => value.as_u64().ok_or_else(|| {
                MetricBuildError::invalid(
                    key,
                    format!("expected a non-negative integer, got {value}"),
                )
            }),
        }
    }

    pub fn u32_or(&mut self, key: &'a str, default: u32) -> Result<u32, MetricBuildError> {
        let value = self.u64_or(key, u64::from(default))?;
        u32::try_from(value)
            .map_err(|_| MetricBuildError::invalid(key, format!("{value} is out of range")))
    }

    pub fn usize_or(&mut self, key: &'a str, default: usize) -> Result<usize, MetricBuildError> {
        let value = self.u64_or(key, default as u64)?;
        usize::try_from(value)
            .map_err(|_| MetricBuildError::invalid(key, format!("{value} is out of range")))
    }

    pub fn optional_str(&mut self, key: &'a str) -> Result<Option<&'a str>, MetricBuildError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(value) => Err(MetricBuildError::invalid(
                key,
                format!("expected a string, got {value}"),
            )),
        }
    }

    pub fn str_or(&mut self, key: &'a str, default: &'a str) -> Result<&'a str, MetricBuildError> {
        Ok(self.optional_str(key)?.unwrap_or(default))
    }

    pub fn required_str(&mut self, key: &'a str) -> Result<&'a str, MetricBuildError> {
        match self.optional_str(key)? {
            Some(s) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(MetricBuildError::invalid(key, "must not be empty")),
            None => Err(MetricBuildError::MissingParam(key.to_string())),
        }
    }

    /// Log keys that no accessor consumed
    pub fn finish(self) {
        for key in self.raw.keys() {
            if !self.seen.contains(key.as_str()) {
                debug!(metric = self.metric, param = %key, "Ignoring unknown metric parameter");
            }
        }
    }
}
