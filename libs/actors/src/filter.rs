//! Filter/Router Wrapper
//!
//! A filter has no pins. It declares named scopes, each mapping logical keys to
//! resolved targets; its behavior's selector picks which keys receive a message.

use crate::behavior::Selection;
use crate::descriptor::DebugFlags;
use crate::envelope::Payload;
use crate::node::Target;
use std::fmt;
use tracing::warn;

/// Named selection scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    members: Vec<(String, Target)>,
}

impl Scope {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, key: String, target: Target) {
        self.members.push((key, target));
    }

    /// Distinct logical keys in first-declaration order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::with_capacity(self.members.len());
        for (key, _) in &self.members {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Every target registered under `key`
    pub fn targets_for<'s>(&'s self, key: &'s str) -> impl Iterator<Item = &'s Target> + 's {
        self.members
            .iter()
            .filter(move |(member, _)| member == key)
            .map(|(_, target)| target)
    }

    pub fn members(&self) -> &[(String, Target)] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Resolve a selection into the targets to forward to, in scope order
    pub fn select(&self, selection: &Selection) -> Vec<&Target> {
        let wanted: Vec<&str> = match selection {
            Selection::All => return self.members.iter().map(|(_, target)| target).collect(),
            Selection::One(key) => vec![key.as_str()],
            Selection::Many(keys) => keys.iter().map(String::as_str).collect(),
        };

        for key in &wanted {
            if !self.members.iter().any(|(member, _)| member == key) {
                warn!(scope = %self.name, key = %key, "Selector returned unknown key");
            }
        }

        self.members
            .iter()
            .filter(|(member, _)| wanted.contains(&member.as_str()))
            .map(|(_, target)| target)
            .collect()
    }

    /// Channel-capable members among `targets`; a nested router counts once
    pub fn channel_fan_out(targets: &[&Target]) -> usize {
        targets.iter().filter(|target| target.channel).count()
    }
}

/// Router actor wrapper
pub struct Filter {
    pub uid: String,
    pub name: String,
    pub behavior_key: Option<String>,
    pub settings: Payload,
    pub debug: DebugFlags,
    pub(crate) scopes: Vec<Scope>,
}

impl Filter {
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn scope_index(&self, name: &str) -> Option<usize> {
        self.scopes.iter().position(|scope| scope.name == name)
    }

    pub fn scope(&self, index: usize) -> Option<&Scope> {
        self.scopes.get(index)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("scopes", &self.scopes)
            .finish()
    }
}
