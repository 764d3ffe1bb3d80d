//! Scoped evaluation context.
//!
//! A [`Scope`] is one link in a chain of lexical scopes. Each scope owns its own
//! variables and callables (Tera functions and filters); lookups walk from the current
//! scope towards the root and child bindings shadow parent bindings of the same name.
//!
//! Scopes are cheap handles (`Arc` inside) so a generation can hand them to callables
//! that need to evaluate further expressions. Callables that point back at their own
//! scope should hold a [`WeakScope`] to avoid reference cycles.
//!
//! ```rust,no_run
//! use feedgen::templating::{Scope, evaluate};
//! use serde_json::json;
//!
//! let root = Scope::root();
//! root.set("name", json!("bar"));
//!
//! let child = root.child();
//! child.set("name", json!("foo"));
//!
//! assert_eq!(evaluate("{{ name }}", &child).unwrap(), "foo");
//! assert_eq!(evaluate("{{ name }}", &root.child()).unwrap(), "bar");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::{Map, Value};

use crate::core::{FeedgenError, Result};

/// A function or filter that can be called from expressions.
#[derive(Clone)]
pub enum Callable {
    /// Called as `{{ name(arg=value) }}`
    Function(Arc<dyn tera::Function>),
    /// Called as `{{ value | name(arg=value) }}`
    Filter(Arc<dyn tera::Filter>),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::Filter(_) => f.write_str("Filter"),
        }
    }
}

/// The flattened view of a scope chain used for one evaluation.
#[derive(Debug, Default)]
pub struct Resolved {
    /// Variables, innermost binding wins
    pub variables: Map<String, Value>,
    /// Functions and filters, innermost binding wins
    pub callables: BTreeMap<String, Callable>,
}

struct ScopeInner {
    parent: Option<Scope>,
    variables: RwLock<Map<String, Value>>,
    callables: RwLock<BTreeMap<String, Callable>>,
}

/// Handle to one scope in the chain.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

/// Non-owning handle to a [`Scope`].
#[derive(Clone)]
pub struct WeakScope {
    inner: Weak<ScopeInner>,
}

impl WeakScope {
    /// The scope, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Scope> {
        self.inner.upgrade().map(|inner| Scope {
            inner,
        })
    }
}

impl Scope {
    /// A scope without parent.
    #[must_use]
    pub fn root() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Scope>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                parent,
                variables: RwLock::new(Map::new()),
                callables: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// A new scope whose parent is `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// The parent scope, `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Bind `name` in this scope, replacing an earlier binding in the same scope.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.inner
            .variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    /// Look a variable up through the chain.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        let local =
            self.inner.variables.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned();
        match local {
            Some(value) => Some(value),
            None => self.parent().and_then(|parent| parent.get(name)),
        }
    }

    /// `true` if `name` is bound as a callable anywhere in the chain.
    #[must_use]
    pub fn has_callable(&self, name: &str) -> bool {
        let local = self
            .inner
            .callables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name);
        local || self.parent().is_some_and(|parent| parent.has_callable(name))
    }

    /// Register a function under `name`.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::DuplicateFunction`] when `name` is already bound in this scope or
    /// any ancestor.
    pub fn add_function<F>(&self, name: &str, function: F) -> Result<()>
    where
        F: tera::Function + 'static,
    {
        self.add_callable(name, Callable::Function(Arc::new(function)))
    }

    /// Register a filter under `name`.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::DuplicateFunction`] when `name` is already bound in this scope or
    /// any ancestor.
    pub fn add_filter<F>(&self, name: &str, filter: F) -> Result<()>
    where
        F: tera::Filter + 'static,
    {
        self.add_callable(name, Callable::Filter(Arc::new(filter)))
    }

    fn add_callable(&self, name: &str, callable: Callable) -> Result<()> {
        if self.has_callable(name) {
            return Err(FeedgenError::DuplicateFunction {
                name: name.to_string(),
            });
        }
        self.inner
            .callables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), callable);
        Ok(())
    }

    /// Flatten the chain into one variable map and one callable map, parent bindings
    /// overridden by child bindings.
    #[must_use]
    pub fn resolve(&self) -> Resolved {
        let mut resolved = match self.parent() {
            Some(parent) => parent.resolve(),
            None => Resolved::default(),
        };
        for (name, value) in
            self.inner.variables.read().unwrap_or_else(PoisonError::into_inner).iter()
        {
            resolved.variables.insert(name.clone(), value.clone());
        }
        for (name, callable) in
            self.inner.callables.read().unwrap_or_else(PoisonError::into_inner).iter()
        {
            resolved.callables.insert(name.clone(), callable.clone());
        }
        resolved
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = self.resolve();
        f.debug_struct("Scope")
            .field("variables", &resolved.variables.keys().collect::<Vec<_>>())
            .field("callables", &resolved.callables.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Read a string argument of a callable, `None` when absent or not a string.
pub(crate) fn string_arg<'a>(args: &'a HashMap<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Read a required string argument of a callable.
pub(crate) fn required_string_arg<'a>(
    callable: &str,
    args: &'a HashMap<String, Value>,
    name: &str,
) -> tera::Result<&'a str> {
    string_arg(args, name).ok_or_else(|| {
        tera::Error::msg(format!("`{callable}` requires a string argument `{name}`"))
    })
}
