//! Line → `ParsedCommand`.

use crate::command::{FlagValue, ParsedCommand};
use crate::spec::FlagSpec;
use crate::tokenizer::{split_pipeline, tokenize};
use indexmap::IndexMap;

/// Parse a line using the default flag rule.
pub fn parse(line: &str) -> ParsedCommand {
    parse_with(line, &FlagSpec::default())
}

/// Parse a line with a command's flag declarations.
///
/// Total: every input yields a value. Blank input yields
/// [`ParsedCommand::empty`].
pub fn parse_with(line: &str, spec: &FlagSpec) -> ParsedCommand {
    let (segments, piped) = split_pipeline(line);
    let Some(first) = segments.first() else {
        return ParsedCommand::empty(line);
    };

    let mut tokens = tokenize(first).into_iter();
    let base = match tokens.next() {
        Some(base) => base,
        // Only quotes and whitespace, e.g. `""`.
        None => first.clone(),
    };
    let rest: Vec<String> = tokens.collect();
    let (args, flags) = parse_arguments(&rest, spec);

    ParsedCommand {
        raw: line.to_string(),
        base,
        args,
        flags,
        pipeline: if piped { segments } else { Vec::new() },
    }
}

/// Base command of a line without parsing its arguments.
///
/// Used to pick the right `FlagSpec` before the full parse.
pub fn peek_base(line: &str) -> Option<String> {
    let (segments, _) = split_pipeline(line);
    segments
        .first()
        .and_then(|s| tokenize(s).into_iter().next())
}

fn parse_arguments(tokens: &[String], spec: &FlagSpec) -> (Vec<String>, IndexMap<String, FlagValue>) {
    let mut args = Vec::new();
    let mut flags = IndexMap::new();
    let mut i = 0;
    let mut options_done = false;

    while i < tokens.len() {
        let tok = &tokens[i];
        i += 1;

        if options_done || !looks_like_flag(tok) {
            args.push(tok.clone());
            continue;
        }

        if tok == "--" {
            options_done = true;
            continue;
        }

        if let Some(long) = tok.strip_prefix("--") {
            if let Some((name, value)) = long.split_once('=') {
                flags.insert(name.to_string(), FlagValue::Value(value.to_string()));
            } else if spec.is_switch(long) {
                flags.insert(long.to_string(), FlagValue::Present);
            } else {
                let value = take_value(tokens, &mut i);
                flags.insert(long.to_string(), value);
            }
            continue;
        }

        // Single dash, at least one character after it, not a negative number.
        let body = &tok[1..];
        if let Some((name, value)) = body.split_once('=') {
            flags.insert(name.to_string(), FlagValue::Value(value.to_string()));
            continue;
        }
        if spec.is_switch(body) {
            flags.insert(body.to_string(), FlagValue::Present);
            continue;
        }
        if spec.takes_value(body) || body.chars().count() == 1 {
            let value = take_value(tokens, &mut i);
            flags.insert(body.to_string(), value);
            continue;
        }

        let mut chars = body.chars();
        let first = chars.next().map(String::from).unwrap_or_default();
        if spec.takes_value(&first) {
            flags.insert(first, FlagValue::Value(chars.as_str().to_string()));
        } else {
            for c in body.chars() {
                flags.insert(c.to_string(), FlagValue::Present);
            }
        }
    }

    (args, flags)
}

/// Consume the next token as a value unless it looks like a flag.
fn take_value(tokens: &[String], i: &mut usize) -> FlagValue {
    match tokens.get(*i) {
        Some(next) if !looks_like_flag(next) => {
            *i += 1;
            FlagValue::Value(next.clone())
        }
        _ => FlagValue::Present,
    }
}

/// Whether a token is a flag: `-` followed by something that is not a number.
pub fn looks_like_flag(tok: &str) -> bool {
    tok.len() > 1 && tok.starts_with('-') && !is_negative_number(tok)
}

fn is_negative_number(tok: &str) -> bool {
    let Some(digits) = tok.strip_prefix('-') else {
        return false;
    };
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    seen_digit
}
