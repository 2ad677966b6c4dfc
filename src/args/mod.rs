// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Stage arguments
//!
//! A stage records its arguments structurally, as groups of positional
//! values and named options, and only turns them into argv tokens when it
//! is launched. [`ArgumentSpec`] is the per-program policy that drives that
//! conversion.

mod encoder;
mod tokenize;

pub use encoder::{encode, encode_groups, POSITIONAL_MARKER};
pub use tokenize::tokenize;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::ConfigError;

/// How a multi-valued option is emitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// `--opt 1 --opt 2`
    #[default]
    Repeat,
    /// `--opt 1,2` (joined with the given separator)
    Join(String),
    /// `--opt 1 2`
    Trailing,
}

/// Encoding policy for a program's arguments
///
/// Built through [`ArgumentSpec::builder`] (or deserialized), both of which
/// validate the configuration so an invalid policy never reaches the encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ArgumentSpecConfig", into = "ArgumentSpecConfig")]
pub struct ArgumentSpec {
    short_prefix: String,
    long_prefix: String,
    hyphenate: bool,
    value_separator: Option<String>,
    repeat_policy: RepeatPolicy,
    args_separator: Option<String>,
    default_ok_statuses: BTreeSet<i32>,
}

impl Default for ArgumentSpec {
    fn default() -> Self {
        Self {
            short_prefix: "-".into(),
            long_prefix: "--".into(),
            hyphenate: true,
            value_separator: None,
            repeat_policy: RepeatPolicy::Repeat,
            args_separator: None,
            default_ok_statuses: BTreeSet::from([0]),
        }
    }
}

impl ArgumentSpec {
    /// Start building a spec from the defaults
    pub fn builder() -> ArgumentSpecBuilder {
        ArgumentSpecBuilder::default()
    }

    pub fn short_prefix(&self) -> &str {
        &self.short_prefix
    }

    pub fn long_prefix(&self) -> &str {
        &self.long_prefix
    }

    pub fn hyphenate(&self) -> bool {
        self.hyphenate
    }

    pub fn value_separator(&self) -> Option<&str> {
        self.value_separator.as_deref()
    }

    pub fn repeat_policy(&self) -> &RepeatPolicy {
        &self.repeat_policy
    }

    pub fn args_separator(&self) -> Option<&str> {
        self.args_separator.as_deref()
    }

    /// Exit codes the program reports on success
    pub fn default_ok_statuses(&self) -> &BTreeSet<i32> {
        &self.default_ok_statuses
    }

    /// Whether a token would be read as an option by the program
    pub fn looks_like_option(&self, token: &str) -> bool {
        token.starts_with(&self.short_prefix) || token.starts_with(&self.long_prefix)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.short_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix { which: "short" });
        }
        if self.long_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix { which: "long" });
        }
        if matches!(&self.repeat_policy, RepeatPolicy::Join(sep) if sep.is_empty()) {
            return Err(ConfigError::EmptyJoinSeparator);
        }
        if self.value_separator.as_deref() == Some("") {
            return Err(ConfigError::EmptyValueSeparator);
        }
        if self.args_separator.as_deref() == Some("") {
            return Err(ConfigError::EmptyArgsSeparator);
        }
        Ok(self)
    }
}

/// Builder for [`ArgumentSpec`]
#[derive(Debug, Clone, Default)]
pub struct ArgumentSpecBuilder {
    spec: ArgumentSpec,
}

impl ArgumentSpecBuilder {
    pub fn short_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.spec.short_prefix = prefix.into();
        self
    }

    pub fn long_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.spec.long_prefix = prefix.into();
        self
    }

    pub fn hyphenate(mut self, hyphenate: bool) -> Self {
        self.spec.hyphenate = hyphenate;
        self
    }

    /// Glue values to their option (`--opt=value`) instead of a separate token
    pub fn value_separator(mut self, separator: impl Into<String>) -> Self {
        self.spec.value_separator = Some(separator.into());
        self
    }

    pub fn repeat_policy(mut self, policy: RepeatPolicy) -> Self {
        self.spec.repeat_policy = policy;
        self
    }

    /// Sentinel placed before positional arguments that look like options
    pub fn args_separator(mut self, separator: impl Into<String>) -> Self {
        self.spec.args_separator = Some(separator.into());
        self
    }

    pub fn ok_statuses(mut self, statuses: impl IntoIterator<Item = i32>) -> Self {
        self.spec.default_ok_statuses = statuses.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<ArgumentSpec, ConfigError> {
        self.spec.validate()
    }
}

/// Serialized form of [`ArgumentSpec`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ArgumentSpecConfig {
    short_prefix: String,
    long_prefix: String,
    hyphenate: bool,
    value_separator: Option<String>,
    /// `repeat: trailing` or `repeat: { join: "," }`
    #[serde(with = "serde_yaml::with::singleton_map")]
    repeat: RepeatPolicy,
    args_separator: Option<String>,
    ok_statuses: BTreeSet<i32>,
}

impl Default for ArgumentSpecConfig {
    fn default() -> Self {
        ArgumentSpec::default().into()
    }
}

impl From<ArgumentSpec> for ArgumentSpecConfig {
    fn from(spec: ArgumentSpec) -> Self {
        Self {
            short_prefix: spec.short_prefix,
            long_prefix: spec.long_prefix,
            hyphenate: spec.hyphenate,
            value_separator: spec.value_separator,
            repeat: spec.repeat_policy,
            args_separator: spec.args_separator,
            ok_statuses: spec.default_ok_statuses,
        }
    }
}

impl TryFrom<ArgumentSpecConfig> for ArgumentSpec {
    type Error = ConfigError;

    fn try_from(config: ArgumentSpecConfig) -> Result<Self, Self::Error> {
        Self {
            short_prefix: config.short_prefix,
            long_prefix: config.long_prefix,
            hyphenate: config.hyphenate,
            value_separator: config.value_separator,
            repeat_policy: config.repeat,
            args_separator: config.args_separator,
            default_ok_statuses: config.ok_statuses,
        }
        .validate()
    }
}

/// A single argument value, positional or attached to an option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Not set: the option is omitted entirely
    Unset,
    /// `true` emits the bare option, `false` omits it
    Flag(bool),
    One(String),
    Many(Vec<String>),
}

impl ArgValue {
    /// Tokens contributed when used as a positional argument
    pub fn positional_tokens(&self) -> Vec<String> {
        match self {
            Self::Unset => vec![],
            Self::Flag(flag) => vec![flag.to_string()],
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }
}

impl From<bool> for ArgValue {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<&String> for ArgValue {
    fn from(value: &String) -> Self {
        Self::One(value.clone())
    }
}

impl From<&std::path::Path> for ArgValue {
    fn from(value: &std::path::Path) -> Self {
        Self::One(value.to_string_lossy().into_owned())
    }
}

impl From<std::path::PathBuf> for ArgValue {
    fn from(value: std::path::PathBuf) -> Self {
        Self::One(value.to_string_lossy().into_owned())
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ArgValue {
                fn from(value: $ty) -> Self {
                    Self::One(value.to_string())
                }
            }
        )*
    };
}

impl_from_number!(i32, i64, u8, u16, u32, u64, usize, f64);

impl<T: ToString> From<Vec<T>> for ArgValue {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: ToString, const N: usize> From<[T; N]> for ArgValue {
    fn from(values: [T; N]) -> Self {
        Self::Many(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unset, Into::into)
    }
}

/// One call's worth of arguments: positional values plus named options
///
/// Named options keep their insertion order. Setting an option twice
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgGroup {
    positional: Vec<ArgValue>,
    named: Vec<(String, ArgValue)>,
}

impl ArgGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append several positional arguments
    pub fn args<I, T>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ArgValue>,
    {
        self.positional.extend(values.into_iter().map(Into::into));
        self
    }

    /// Set a named option
    pub fn opt(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.named.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.named.push((name, value)),
        }
        self
    }

    pub fn positional(&self) -> &[ArgValue] {
        &self.positional
    }

    pub fn named(&self) -> &[(String, ArgValue)] {
        &self.named
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}
