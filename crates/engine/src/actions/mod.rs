//! Action abstraction and the name → action registry.
//!
//! An action is the only thing a step ultimately runs. The engine never looks
//! inside one: it substitutes variables into the arguments and options, calls
//! [`Action::execute`], and interprets the returned [`ActionResult`].

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde_json::Value;
use testflow_types::{ActionResult, MessageTemplates};

use crate::variables::VariableStore;

pub mod builtins;

/// Executes one step's action.
///
/// Implementations receive arguments and option values with variables already
/// substituted, and may read or write the run's variables (for example to
/// publish a value under a name of their choosing).
pub trait Action: Send + Sync {
    fn execute(&self, args: &[Value], options: &IndexMap<String, Value>, variables: &mut VariableStore) -> ActionResult;
}

impl<F> Action for F
where
    F: Fn(&[Value], &IndexMap<String, Value>, &mut VariableStore) -> ActionResult + Send + Sync,
{
    fn execute(&self, args: &[Value], options: &IndexMap<String, Value>, variables: &mut VariableStore) -> ActionResult {
        self(args, options, variables)
    }
}

/// Registry of actions addressable by name.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: IndexMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the framework actions from [`builtins`].
    pub fn with_builtins() -> Self {
        Self::with_builtins_using(Arc::new(MessageTemplates::default()))
    }

    /// Same as [`ActionRegistry::with_builtins`] with a caller-provided template table.
    pub fn with_builtins_using(templates: Arc<MessageTemplates>) -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry, templates);
        registry
    }

    /// Registers `action` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, action: impl Action + 'static) {
        self.actions.insert(name.into(), Arc::new(action));
    }

    /// Closure flavor of [`ActionRegistry::register`] that pins the closure signature.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: Fn(&[Value], &IndexMap<String, Value>, &mut VariableStore) -> ActionResult + Send + Sync + 'static,
    {
        self.register(name, action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
