//! Proxies translate "call method X with args" into the right operation on an underlying stub.
//!
//! Methods are resolved against declared prototypes rather than by reflection. A
//! [MethodTable] is built once per declaration and each call resolves through it to a
//! [Resolution], which the proxy then matches on.

mod activity;
mod child_workflow;
mod continue_as_new;
mod external_workflow;

pub use activity::ActivityProxy;
pub use child_workflow::ChildWorkflowProxy;
pub use continue_as_new::ContinueAsNewProxy;
pub use external_workflow::ExternalWorkflowProxy;

use crate::{
    errors::{PayloadConversionError, WorkflowError},
    payloads::EncodedValues,
};
use once_cell::unsync::OnceCell;
use serde::de::DeserializeOwned;
use std::{collections::HashMap, rc::Rc};

/// The declared return type of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnType {
    pub name: String,
    /// If false, a null result is an error rather than a value
    pub nullable: bool,
}

impl ReturnType {
    pub fn of(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn void() -> Self {
        Self::of("void").nullable()
    }
}

/// A declared method: the name it is invoked by on the wire (`id`), the name a proxy is called
/// with (`handler`) and what it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prototype {
    pub id: String,
    pub handler: String,
    pub return_type: Option<ReturnType>,
}

impl Prototype {
    pub fn new(id: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handler: handler.into(),
            return_type: None,
        }
    }

    pub fn returning(mut self, return_type: ReturnType) -> Self {
        self.return_type = Some(return_type);
        self
    }
}

/// Linear scan for the prototype declared with the given handler name
pub fn find_prototype_by_handler_name<'a>(
    table: &'a [Prototype],
    handler: &str,
) -> Option<&'a Prototype> {
    table.iter().find(|p| p.handler == handler)
}

/// What kind of operation a declared method performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Run,
    Signal,
    Query,
    Update,
    Activity,
}

/// The outcome of resolving a method name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Found(MethodKind, &'a Prototype),
    NotFound,
}

/// Method name to operation, built once per declaration. When several declarations share a
/// handler name the first one wins, in the order run, signals, queries, updates.
#[derive(Debug, Default)]
pub struct MethodTable {
    methods: HashMap<String, (MethodKind, Prototype)>,
}

impl MethodTable {
    fn build<'a>(entries: impl IntoIterator<Item = (MethodKind, &'a Prototype)>) -> Self {
        let mut methods = HashMap::new();
        for (kind, proto) in entries {
            methods
                .entry(proto.handler.clone())
                .or_insert_with(|| (kind, proto.clone()));
        }
        Self { methods }
    }

    pub fn resolve(&self, method: &str) -> Resolution<'_> {
        match self.methods.get(method) {
            Some((kind, proto)) => Resolution::Found(*kind, proto),
            None => Resolution::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// The declared methods of an activity class
#[derive(Debug, Clone, Default)]
pub struct ActivityInterface {
    pub class: String,
    pub methods: Vec<Prototype>,
    table: OnceCell<Rc<MethodTable>>,
}

impl ActivityInterface {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Default::default()
        }
    }

    /// Declare a method invoked on the wire as `<class>.<handler>`
    pub fn method(self, handler: &str, return_type: ReturnType) -> Self {
        let id = format!("{}.{}", self.class, handler);
        self.prototype(Prototype::new(id, handler).returning(return_type))
    }

    pub fn prototype(mut self, prototype: Prototype) -> Self {
        self.methods.push(prototype);
        self.table = OnceCell::new();
        self
    }

    pub fn find(&self, handler: &str) -> Option<&Prototype> {
        find_prototype_by_handler_name(&self.methods, handler)
    }

    pub fn method_table(&self) -> Rc<MethodTable> {
        self.table
            .get_or_init(|| {
                Rc::new(MethodTable::build(
                    self.methods.iter().map(|p| (MethodKind::Activity, p)),
                ))
            })
            .clone()
    }
}

/// The declared shape of a workflow: its type name, its entry point and its handlers
#[derive(Debug, Clone, Default)]
pub struct WorkflowPrototype {
    /// Workflow type name used to start it
    pub name: String,
    pub class: String,
    pub run: Option<Prototype>,
    pub signals: Vec<Prototype>,
    pub queries: Vec<Prototype>,
    pub updates: Vec<Prototype>,
    table: OnceCell<Rc<MethodTable>>,
}

impl WorkflowPrototype {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            ..Default::default()
        }
    }

    pub fn with_run(mut self, handler: &str, return_type: ReturnType) -> Self {
        self.run = Some(Prototype::new(self.name.clone(), handler).returning(return_type));
        self.table = OnceCell::new();
        self
    }

    pub fn with_signal(mut self, name: &str, handler: &str) -> Self {
        self.signals
            .push(Prototype::new(name, handler).returning(ReturnType::void()));
        self.table = OnceCell::new();
        self
    }

    pub fn with_query(mut self, name: &str, handler: &str, return_type: ReturnType) -> Self {
        self.queries
            .push(Prototype::new(name, handler).returning(return_type));
        self.table = OnceCell::new();
        self
    }

    pub fn with_update(mut self, name: &str, handler: &str, return_type: ReturnType) -> Self {
        self.updates
            .push(Prototype::new(name, handler).returning(return_type));
        self.table = OnceCell::new();
        self
    }

    pub fn find_signal(&self, handler: &str) -> Option<&Prototype> {
        find_prototype_by_handler_name(&self.signals, handler)
    }

    pub fn find_query(&self, handler: &str) -> Option<&Prototype> {
        find_prototype_by_handler_name(&self.queries, handler)
    }

    pub fn method_table(&self) -> Rc<MethodTable> {
        self.table
            .get_or_init(|| {
                let entries = self
                    .run
                    .iter()
                    .map(|p| (MethodKind::Run, p))
                    .chain(self.signals.iter().map(|p| (MethodKind::Signal, p)))
                    .chain(self.queries.iter().map(|p| (MethodKind::Query, p)))
                    .chain(self.updates.iter().map(|p| (MethodKind::Update, p)));
                Rc::new(MethodTable::build(entries))
            })
            .clone()
    }
}

/// Decode the first value of a method's result, honoring its declared return type
pub(crate) fn decode_returning<T: DeserializeOwned>(
    vals: &EncodedValues,
    return_type: Option<&ReturnType>,
) -> Result<T, WorkflowError> {
    if let Some(rt) = return_type {
        if !rt.nullable && vals.is_null_at(0) {
            return Err(PayloadConversionError::MissingValue(rt.name.clone()).into());
        }
    }
    Ok(vals.get_value(0)?)
}
