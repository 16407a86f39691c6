use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, info};

use super::{ActiveEventArgs, ApplicationContext, ContextTicket, Handler, HandlerResult};
use crate::{config::RuntimeConfig, node::Node, InternalResult};

/// Configuration errors found while loading modules. The runtime must not
/// start dispatching when loading fails.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoaderError {
    #[error("Module name must not be empty")]
    EmptyModuleName,
    #[error("Invalid event name '{name}' in module '{module}'")]
    InvalidEventName { module: String, name: String },
    #[error("Module '{0}' is not loaded")]
    ModuleNotLoaded(String),
}

pub type LoaderResult<T> = Result<T, LoaderError>;

/// A type whose instances handle events with access to their own state.
///
/// Declaring the type on a module (see [`ModuleBuilder::listener`]) makes
/// its events known; they only fire on a context after an instance calls
/// [`ApplicationContext::register_listener`].
pub trait Listener: Send + Sync + 'static {
    fn active_events() -> Vec<ListenerEvent<Self>>
    where
        Self: Sized;
}

pub type ListenerMethod<T> = fn(&T, &ApplicationContext, &mut ActiveEventArgs<'_>) -> HandlerResult;

pub struct ListenerEvent<T> {
    pub name: String,
    pub method: ListenerMethod<T>,
}

impl<T> ListenerEvent<T> {
    pub fn new(name: impl Into<String>, method: ListenerMethod<T>) -> Self {
        Self {
            name: name.into(),
            method,
        }
    }
}

pub(crate) type InstanceHandler = Arc<
    dyn Fn(&(dyn Any + Send + Sync), &ApplicationContext, &mut ActiveEventArgs<'_>) -> HandlerResult
        + Send
        + Sync,
>;

pub(crate) struct ListenerType {
    pub(crate) type_name: &'static str,
    pub(crate) events: Vec<(String, InstanceHandler)>,
}

/// The explicit registration table of one module.
pub struct Module {
    name: String,
    events: Vec<(String, Handler)>,
    catch_all: Vec<Handler>,
    listeners: Vec<(TypeId, Arc<ListenerType>)>,
}

impl Module {
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            module: Module {
                name: name.into(),
                events: Vec::new(),
                catch_all: Vec::new(),
                listeners: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|(name, _)| name.as_str())
    }

    fn validate(&self) -> LoaderResult<()> {
        if self.name.trim().is_empty() {
            return Err(LoaderError::EmptyModuleName);
        }
        let listener_names = self
            .listeners
            .iter()
            .flat_map(|(_, l)| l.events.iter().map(|(name, _)| name));
        for name in self.events.iter().map(|(name, _)| name).chain(listener_names) {
            if !is_valid_event_name(name) {
                return Err(LoaderError::InvalidEventName {
                    module: self.name.clone(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn is_valid_event_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/')
}

pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn event<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ApplicationContext, &mut ActiveEventArgs<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.module.events.push((name.into(), Arc::new(handler)));
        self
    }

    /// Registers one handler under several names.
    pub fn events<F>(mut self, names: &[&str], handler: F) -> Self
    where
        F: Fn(&ApplicationContext, &mut ActiveEventArgs<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        for name in names {
            self.module.events.push((name.to_string(), handler.clone()));
        }
        self
    }

    /// Runs after the named handlers of every raised event, known or not.
    pub fn catch_all<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ApplicationContext, &mut ActiveEventArgs<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.module.catch_all.push(Arc::new(handler));
        self
    }

    pub fn listener<T: Listener>(mut self) -> Self {
        let events = T::active_events()
            .into_iter()
            .map(|event| {
                let method = event.method;
                let name = event.name.clone();
                let handler: InstanceHandler = Arc::new(
                    move |receiver: &(dyn Any + Send + Sync),
                          context: &ApplicationContext,
                          args: &mut ActiveEventArgs<'_>| match receiver.downcast_ref::<T>() {
                        Some(receiver) => method(receiver, context, args),
                        None => Err(super::EventError::ReceiverMismatch {
                            event: name.clone(),
                            type_name: std::any::type_name::<T>(),
                        }
                        .into()),
                    },
                );
                (event.name, handler)
            })
            .collect();
        self.module.listeners.push((
            TypeId::of::<T>(),
            Arc::new(ListenerType {
                type_name: std::any::type_name::<T>(),
                events,
            }),
        ));
        self
    }

    pub fn build(self) -> Module {
        self.module
    }
}

/// Immutable dispatch table shared by every context created from one
/// loader state.
#[derive(Default)]
pub(crate) struct EventTable {
    pub(crate) statics: HashMap<String, Vec<Handler>>,
    pub(crate) catch_all: Vec<Handler>,
    pub(crate) listener_types: HashMap<TypeId, Arc<ListenerType>>,
}

impl EventTable {
    fn build(modules: &[Module]) -> Self {
        let mut table = EventTable::default();
        for module in modules {
            for (name, handler) in &module.events {
                table
                    .statics
                    .entry(name.clone())
                    .or_default()
                    .push(handler.clone());
            }
            table.catch_all.extend(module.catch_all.iter().cloned());
            for (type_id, listener) in &module.listeners {
                table.listener_types.insert(*type_id, listener.clone());
            }
        }
        table
    }
}

/// Catalog of loaded modules. Contexts created from it see the static
/// handlers of every module loaded at creation time.
pub struct Loader {
    config: Arc<RuntimeConfig>,
    modules: Vec<Module>,
    table: Arc<EventTable>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Loader {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config: Arc::new(config),
            modules: Vec::new(),
            table: Arc::new(EventTable::default()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Loads a module. Loading a module whose name is already loaded is a
    /// no-op.
    pub fn load(&mut self, module: Module) -> LoaderResult<()> {
        if self.is_loaded(module.name()) {
            debug!("module '{}' already loaded", module.name());
            return Ok(());
        }
        module.validate()?;
        info!(
            "loading module '{}' with {} events",
            module.name(),
            module.events.len()
        );
        self.modules.push(module);
        self.rebuild();
        Ok(())
    }

    pub fn unload(&mut self, name: &str) -> LoaderResult<Module> {
        let index = self
            .modules
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| LoaderError::ModuleNotLoaded(name.to_string()))?;
        let module = self.modules.remove(index);
        info!("unloaded module '{}'", name);
        self.rebuild();
        Ok(module)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name == name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.name.as_str())
    }

    pub fn create_context(&self) -> InternalResult<ApplicationContext> {
        self.create_context_with_ticket(ContextTicket::default())
    }

    /// Creates a context over the current static table, then raises the
    /// configured initialize event on it.
    pub fn create_context_with_ticket(&self, ticket: ContextTicket) -> InternalResult<ApplicationContext> {
        let context = ApplicationContext::new(self.table.clone(), ticket, self.config.clone());
        debug!("created context {}", context.id());
        let settings = &self.config.context;
        if settings.raise_initialize_event {
            let mut args = Node::new(settings.initialize_event.as_str());
            context.raise(&settings.initialize_event, &mut args)?;
        }
        Ok(context)
    }

    fn rebuild(&mut self) {
        self.table = Arc::new(EventTable::build(&self.modules));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &ApplicationContext, _: &mut ActiveEventArgs<'_>) -> HandlerResult {
        Ok(())
    }

    #[test]
    fn test_invalid_event_name_is_fatal() {
        let mut loader = Loader::default();
        let module = Module::builder("bad").event("has space", noop).build();
        assert_eq!(
            loader.load(module),
            Err(LoaderError::InvalidEventName {
                module: "bad".to_string(),
                name: "has space".to_string(),
            })
        );
        assert!(!loader.is_loaded("bad"));
        assert!(loader.load(Module::builder("slash").event("a/b", noop).build()).is_err());
        assert_eq!(
            loader.load(Module::builder("x").event("", noop).build()),
            Err(LoaderError::InvalidEventName {
                module: "x".to_string(),
                name: String::new(),
            })
        );
        assert_eq!(loader.load(Module::builder(" ").build()), Err(LoaderError::EmptyModuleName));
    }

    #[test]
    fn test_load_is_idempotent_and_unload() {
        let mut loader = Loader::default();
        loader.load(Module::builder("m").event("m.a", noop).build()).unwrap();
        loader.load(Module::builder("m").event("m.b", noop).build()).unwrap();
        assert_eq!(loader.modules().collect::<Vec<_>>(), vec!["m"]);
        assert_eq!(loader.table.statics.len(), 1);

        loader.unload("m").unwrap();
        assert!(loader.table.statics.is_empty());
        assert_eq!(loader.unload("m").err(), Some(LoaderError::ModuleNotLoaded("m".to_string())));
    }
}
