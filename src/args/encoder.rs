// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Argument encoder
//!
//! Turns structured arguments into argv tokens:
//!
//! - options come before positional arguments, in insertion order
//! - single char names get the short prefix, longer names the long prefix
//! - names already carrying a prefix are passed through verbatim
//! - names starting with `_` hold positional arguments
//! - `an_option` becomes `an-option` when hyphenation is on
//! - `false` and unset values don't produce an option
//! - multi-valued options follow the [`RepeatPolicy`]
//! - the args separator is inserted once, only when a positional
//!   argument would otherwise be read as an option

use super::{ArgGroup, ArgValue, ArgumentSpec, RepeatPolicy};

/// Option names starting with this character carry positional arguments
pub const POSITIONAL_MARKER: char = '_';

/// Encode a single group of arguments
pub fn encode(spec: &ArgumentSpec, positional: &[ArgValue], named: &[(String, ArgValue)]) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut trailing_positional = Vec::new();

    for (name, value) in named {
        if name.starts_with(POSITIONAL_MARKER) {
            trailing_positional.push(value);
            continue;
        }
        tokens.extend(encode_option(spec, name, value));
    }

    let run_start = tokens.len();
    for value in positional.iter().chain(trailing_positional) {
        tokens.extend(value.positional_tokens());
    }

    if let Some(separator) = spec.args_separator() {
        let already_present = tokens.iter().any(|t| t == separator);
        let needed = tokens[run_start..].iter().any(|t| spec.looks_like_option(t));
        if needed && !already_present {
            tokens.insert(run_start, separator.to_string());
        }
    }

    tokens
}

/// Encode every group of a stage, emitting the args separator at most once
pub fn encode_groups<'a, I>(spec: &ArgumentSpec, groups: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a ArgGroup>,
{
    let mut args: Vec<String> = Vec::new();

    for group in groups {
        let mut tokens = encode(spec, group.positional(), group.named());

        if let Some(separator) = spec.args_separator() {
            if args.iter().any(|t| t == separator) {
                tokens.retain(|t| t != separator);
            }
        }

        args.extend(tokens);
    }

    args
}

fn encode_option(spec: &ArgumentSpec, name: &str, value: &ArgValue) -> Vec<String> {
    let option = option_token(spec, name);

    match value {
        ArgValue::Unset | ArgValue::Flag(false) => vec![],
        ArgValue::Flag(true) => vec![option],
        ArgValue::One(value) => with_policy(spec, option, std::slice::from_ref(value)),
        ArgValue::Many(values) => with_policy(spec, option, values),
    }
}

/// Trailing values never take the value separator, single ones included
fn with_policy(spec: &ArgumentSpec, option: String, values: &[String]) -> Vec<String> {
    match spec.repeat_policy() {
        RepeatPolicy::Repeat => with_values(spec, &option, values),
        RepeatPolicy::Join(separator) => with_values(spec, &option, &[values.join(separator)]),
        RepeatPolicy::Trailing => std::iter::once(option).chain(values.iter().cloned()).collect(),
    }
}

fn option_token(spec: &ArgumentSpec, name: &str) -> String {
    let name = if spec.hyphenate() {
        name.replace('_', "-")
    } else {
        name.to_string()
    };

    if spec.looks_like_option(&name) {
        return name;
    }

    let prefix = if name.chars().count() == 1 {
        spec.short_prefix()
    } else {
        spec.long_prefix()
    };

    format!("{}{}", prefix, name)
}

fn with_values(spec: &ArgumentSpec, option: &str, values: &[String]) -> Vec<String> {
    match spec.value_separator() {
        Some(separator) => values
            .iter()
            .map(|v| format!("{}{}{}", option, separator, v))
            .collect(),
        None => values
            .iter()
            .flat_map(|v| [option.to_string(), v.clone()])
            .collect(),
    }
}
