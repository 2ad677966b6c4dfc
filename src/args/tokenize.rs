// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Literal argument tokenizer

/// Split literal argument text on whitespace
///
/// A backslash before a whitespace character keeps it as part of the token
/// (`foo\ bar` is one argument). Other backslashes are left untouched.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next_if(|next| next.is_whitespace()) {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
