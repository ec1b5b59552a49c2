//! Behavior Capability Interface
//!
//! A behavior is what a factory hands the runtime for one actor: an ordered list
//! of named handler bindings plus, for filters, an optional selector. Binding
//! names are matched against declared input pins when the runtime starts.

use crate::envelope::Payload;
use crate::error::{Result, RuntimeError};
use crate::node::{Context, Facade};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Input handler invoked once per delivered envelope
pub type Handler = Box<dyn FnMut(&mut Context<'_>, &Payload) + Send>;

/// Filter selection callback: (known keys, pin, payload) -> selection
pub type Selector = Box<dyn FnMut(&[String], &str, &Payload) -> Selection + Send>;

/// Which scope members a filter forwards to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// Broadcast to every key in the scope
    #[default]
    All,
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Selection {
    fn from(key: &str) -> Self {
        Selection::One(key.to_string())
    }
}

impl From<String> for Selection {
    fn from(key: String) -> Self {
        Selection::One(key)
    }
}

impl From<Vec<String>> for Selection {
    fn from(keys: Vec<String>) -> Self {
        Selection::Many(keys)
    }
}

impl From<Option<String>> for Selection {
    fn from(key: Option<String>) -> Self {
        key.map(Selection::One).unwrap_or_default()
    }
}

/// Per-actor behavior instance
#[derive(Default)]
pub struct Behavior {
    bindings: Vec<(String, Handler)>,
    selector: Option<Selector>,
}

impl Behavior {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler under `name` (a pin name, `"-> pin"`, `"=> pin"` or `onPin`)
    pub fn on<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&mut Context<'_>, &Payload) + Send + 'static,
    {
        self.bindings.push((name.into(), Box::new(handler)));
        self
    }

    /// Install the filter selection function
    pub fn with_selector<F, S>(mut self, mut selector: F) -> Self
    where
        F: FnMut(&[String], &str, &Payload) -> S + Send + 'static,
        S: Into<Selection>,
    {
        let boxed: Selector = Box::new(move |keys: &[String], pin: &str, payload: &Payload| -> Selection {
            selector(keys, pin, payload).into()
        });
        self.selector = Some(boxed);
        self
    }

    /// Binding names in declaration order
    pub fn binding_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(name, _)| name.as_str())
    }

    /// Index of the first binding whose name is one of `candidates`
    pub(crate) fn position(&self, candidates: &[String]) -> Option<usize> {
        self.bindings
            .iter()
            .position(|(name, _)| candidates.iter().any(|candidate| candidate == name))
    }

    pub(crate) fn handler_mut(&mut self, index: usize) -> Option<&mut Handler> {
        self.bindings.get_mut(index).map(|(_, handler)| handler)
    }

    pub(crate) fn selector_mut(&mut self) -> Option<&mut Selector> {
        self.selector.as_mut()
    }

    pub fn has_selector(&self) -> bool {
        self.selector.is_some()
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("bindings", &self.binding_names().collect::<Vec<_>>())
            .field("selector", &self.selector.is_some())
            .finish()
    }
}

/// Canonical handler name for a pin: `"new message"` -> `"onNewMessage"`
pub fn canonical_handler_name(pin: &str) -> String {
    let mut name = String::from("on");
    for word in pin.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name
}

/// Everything a factory receives when building an instance
#[derive(Clone)]
pub struct BehaviorInit {
    pub name: String,
    pub uid: String,
    pub facade: Facade,
    pub settings: Payload,
}

/// Produces behavior instances for one kind of actor
pub trait BehaviorFactory: Send + Sync {
    fn create(&self, init: BehaviorInit) -> Result<Behavior>;

    /// Alternate calling convention, tried once when `create` fails
    fn create_positional(&self, facade: Facade, _settings: &Payload) -> Result<Behavior> {
        Err(RuntimeError::construction(
            facade.name(),
            "positional construction not supported",
        ))
    }
}

impl<F> BehaviorFactory for F
where
    F: Fn(BehaviorInit) -> Result<Behavior> + Send + Sync,
{
    fn create(&self, init: BehaviorInit) -> Result<Behavior> {
        self(init)
    }
}

/// Build an instance, falling back to the positional convention once
pub(crate) fn construct(factory: &dyn BehaviorFactory, init: BehaviorInit) -> Result<Behavior> {
    let facade = init.facade.clone();
    let settings = init.settings.clone();

    factory.create(init).or_else(|first| {
        debug!(
            actor = %facade.name(),
            error = %first,
            "Primary construction failed, retrying positional convention"
        );
        factory
            .create_positional(facade, &settings)
            .map_err(|_| first)
    })
}

/// Behavior factories addressable by descriptor key
#[derive(Default, Clone)]
pub struct BehaviorRegistry {
    factories: HashMap<String, Arc<dyn BehaviorFactory>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure factory
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(BehaviorInit) -> Result<Behavior> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    /// Register a factory type that implements both calling conventions
    pub fn register_factory(&mut self, key: impl Into<String>, factory: Arc<dyn BehaviorFactory>) -> &mut Self {
        self.factories.insert(key.into(), factory);
        self
    }

    /// Builder-style variant of [`register`](Self::register)
    pub fn with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(BehaviorInit) -> Result<Behavior> + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn BehaviorFactory>> {
        self.factories.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_handler_name() {
        assert_eq!(canonical_handler_name("ping"), "onPing");
        assert_eq!(canonical_handler_name("new message"), "onNewMessage");
        assert_eq!(canonical_handler_name("data.in"), "onDataIn");
        assert_eq!(canonical_handler_name("fooBar"), "onFooBar");
    }

    #[test]
    fn test_position_matches_any_candidate() {
        let behavior = Behavior::new()
            .on("onPing", |_, _| {})
            .on("=> pong", |_, _| {});

        assert_eq!(behavior.position(&["ping".into(), "onPing".into()]), Some(0));
        assert_eq!(behavior.position(&["pong".into(), "=> pong".into()]), Some(1));
        assert_eq!(behavior.position(&["other".into()]), None);
    }

    #[test]
    fn test_selector_conversions() {
        let mut behavior = Behavior::new().with_selector(|_keys: &[String], _pin: &str, payload: &Payload| {
            payload.get("to").and_then(|v| v.as_str()).map(str::to_string)
        });

        let selector = behavior.selector_mut().expect("selector installed");
        assert_eq!(selector(&[], "in", &json!({"to": "B"})), Selection::One("B".into()));
        assert_eq!(selector(&[], "in", &json!({})), Selection::All);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = BehaviorRegistry::new().with("echo", |_init: BehaviorInit| Ok(Behavior::new()));
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());
    }
}
