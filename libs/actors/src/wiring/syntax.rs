//! Wiring string grammar
//!
//! ```text
//! input   := ("->" | "=>") pin
//! output  := pin ("->" | "=>") targets
//! scope   := selector ":" targets
//! targets := ref | "[" ref ("," ref)* "]"
//! ref     := [key "="] pin "@" actor ["(" uid ")"]
//! ```

use crate::error::{Result, RuntimeError};

/// Parsed input pin declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDecl {
    pub pin: String,
    pub channel: bool,
}

/// Parsed output pin declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDecl {
    pub pin: String,
    pub channel: bool,
    pub targets: Vec<TargetRef>,
}

/// Parsed filter scope declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDecl {
    pub name: String,
    pub targets: Vec<TargetRef>,
}

/// Symbolic reference to a destination pin or scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    /// Explicit scope key
    pub key: Option<String>,
    pub pin: String,
    pub actor: String,
    pub uid: Option<String>,
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(key) = &self.key {
            write!(f, "{key} = ")?;
        }
        write!(f, "{} @ {}", self.pin, self.actor)?;
        if let Some(uid) = &self.uid {
            write!(f, " ({uid})")?;
        }
        Ok(())
    }
}

fn non_empty<'a>(input: &str, part: &'a str, what: &str) -> Result<&'a str> {
    let part = part.trim();
    if part.is_empty() {
        Err(RuntimeError::syntax(input, format!("missing {what}")))
    } else {
        Ok(part)
    }
}

/// Earliest arrow in `text`: (position, request-capable)
fn find_arrow(text: &str) -> Option<(usize, bool)> {
    match (text.find("->"), text.find("=>")) {
        (Some(plain), Some(channel)) if plain < channel => Some((plain, false)),
        (_, Some(channel)) => Some((channel, true)),
        (Some(plain), None) => Some((plain, false)),
        (None, None) => None,
    }
}

pub fn parse_input(decl: &str) -> Result<InputDecl> {
    let text = decl.trim();
    let channel = if text.starts_with("=>") {
        true
    } else if text.starts_with("->") {
        false
    } else {
        return Err(RuntimeError::syntax(decl, "input must start with '->' or '=>'"));
    };

    Ok(InputDecl {
        pin: non_empty(decl, &text[2..], "pin name")?.to_string(),
        channel,
    })
}

pub fn parse_output(decl: &str) -> Result<OutputDecl> {
    let Some((at, channel)) = find_arrow(decl) else {
        return Err(RuntimeError::syntax(decl, "output needs '->' or '=>'"));
    };

    Ok(OutputDecl {
        pin: non_empty(decl, &decl[..at], "pin name")?.to_string(),
        channel,
        targets: parse_targets(&decl[at + 2..])?,
    })
}

pub fn parse_scope(decl: &str) -> Result<ScopeDecl> {
    let Some((name, targets)) = decl.split_once(':') else {
        return Err(RuntimeError::syntax(decl, "scope needs 'selector : [targets]'"));
    };

    Ok(ScopeDecl {
        name: non_empty(decl, name, "selector")?.to_string(),
        targets: parse_targets(targets)?,
    })
}

/// Single reference or bracketed list; `[]` is an empty list
pub fn parse_targets(text: &str) -> Result<Vec<TargetRef>> {
    let text = text.trim();

    if let Some(inner) = text.strip_prefix('[') {
        let Some(inner) = inner.strip_suffix(']') else {
            return Err(RuntimeError::syntax(text, "unterminated target list"));
        };
        return inner
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(parse_target_ref)
            .collect();
    }

    Ok(vec![parse_target_ref(non_empty(text, text, "target")?)?])
}

pub fn parse_target_ref(text: &str) -> Result<TargetRef> {
    let Some((left, right)) = text.split_once('@') else {
        return Err(RuntimeError::syntax(text, "target needs 'pin @ actor'"));
    };

    let (key, pin) = match left.split_once('=') {
        Some((key, pin)) => (Some(non_empty(text, key, "scope key")?.to_string()), pin),
        None => (None, left),
    };
    let pin = non_empty(text, pin, "pin name")?.to_string();

    let right = right.trim();
    let (actor, uid) = match (right.rfind('('), right.strip_suffix(')')) {
        (Some(open), Some(body)) => (
            &right[..open],
            Some(non_empty(text, &body[open + 1..], "uid")?.to_string()),
        ),
        _ => (right, None),
    };

    Ok(TargetRef {
        key,
        pin,
        actor: non_empty(text, actor, "actor name")?.to_string(),
        uid,
    })
}
