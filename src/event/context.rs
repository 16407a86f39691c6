use std::{
    any::{Any, TypeId},
    collections::BTreeSet,
    sync::Arc,
};

use dashmap::DashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    loader::{EventTable, InstanceHandler},
    ActiveEventArgs, EventError, EventResult, HandlerResult, Listener,
};
use crate::{
    config::RuntimeConfig,
    node::{Node, NodePath},
    InternalResult,
};

/// Who a context runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTicket {
    pub username: String,
    pub role: String,
    pub is_default: bool,
}

impl ContextTicket {
    pub fn new(username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: role.into(),
            is_default: false,
        }
    }
}

impl Default for ContextTicket {
    fn default() -> Self {
        Self {
            username: String::new(),
            role: String::new(),
            is_default: true,
        }
    }
}

#[derive(Clone)]
struct InstanceEntry {
    receiver: Arc<dyn Any + Send + Sync>,
    handler: InstanceHandler,
}

impl InstanceEntry {
    fn is_receiver(&self, address: *const ()) -> bool {
        Arc::as_ptr(&self.receiver) as *const () == address
    }
}

/// Per-context dispatch facade.
///
/// Static handlers come from the loader snapshot and never change for the
/// lifetime of the context. Instance handlers are added and removed through
/// [`register_listener`](Self::register_listener) and
/// [`unregister_listener`](Self::unregister_listener); that table is
/// internally synchronized, so a cloned context can be shared across threads.
#[derive(Clone)]
pub struct ApplicationContext {
    id: Uuid,
    ticket: Arc<ContextTicket>,
    config: Arc<RuntimeConfig>,
    table: Arc<EventTable>,
    instances: Arc<DashMap<String, Vec<InstanceEntry>>>,
}

impl ApplicationContext {
    pub(crate) fn new(table: Arc<EventTable>, ticket: ContextTicket, config: Arc<RuntimeConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket: Arc::new(ticket),
            config,
            table,
            instances: Arc::new(DashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ticket(&self) -> &ContextTicket {
        &self.ticket
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Activates the events `T` declared for this one instance.
    ///
    /// Fails with [`EventError::UnknownListenerType`] when no loaded module
    /// declared `T`, or `T` declares no events. Registering an instance that is
    /// already registered changes nothing.
    pub fn register_listener<T: Listener>(&self, instance: &Arc<T>) -> EventResult<()> {
        let type_name = std::any::type_name::<T>();
        let listener = self
            .table
            .listener_types
            .get(&TypeId::of::<T>())
            .filter(|l| !l.events.is_empty())
            .ok_or(EventError::UnknownListenerType { type_name })?;
        let address = Arc::as_ptr(instance) as *const ();
        let receiver: Arc<dyn Any + Send + Sync> = instance.clone();
        let mut added = 0;
        for (name, handler) in &listener.events {
            let mut entries = self.instances.entry(name.clone()).or_default();
            let duplicate = entries
                .iter()
                .any(|e| e.is_receiver(address) && Arc::ptr_eq(&e.handler, handler));
            if !duplicate {
                entries.push(InstanceEntry {
                    receiver: receiver.clone(),
                    handler: handler.clone(),
                });
                added += 1;
            }
        }
        debug!(
            "context {}: registered {} ({} handlers added)",
            self.id, listener.type_name, added
        );
        Ok(())
    }

    /// Removes every handler bound to this exact instance.
    pub fn unregister_listener<T: Listener>(&self, instance: &Arc<T>) -> EventResult<()> {
        let type_name = std::any::type_name::<T>();
        let address = Arc::as_ptr(instance) as *const ();
        let mut removed = 0;
        for mut entries in self.instances.iter_mut() {
            let before = entries.len();
            entries.retain(|e| !e.is_receiver(address));
            removed += before - entries.len();
        }
        self.instances.retain(|_, entries| !entries.is_empty());
        if removed == 0 {
            return Err(EventError::UnregisteredInstance { type_name });
        }
        debug!(
            "context {}: unregistered {} ({} handlers removed)",
            self.id, type_name, removed
        );
        Ok(())
    }

    /// Raises `name` with `args` as both input and output.
    pub fn raise(&self, name: &str, args: &mut Node) -> HandlerResult {
        self.raise_at(name, args, &NodePath::root())
    }

    /// Raises `name` with an empty argument node and hands it back.
    pub fn raise_new(&self, name: &str) -> InternalResult<Node> {
        let mut args = Node::new(name);
        self.raise(name, &mut args)?;
        Ok(args)
    }

    /// Raises `name` for the node at `path` inside `tree`.
    ///
    /// Static handlers run first, then instance handlers in the order they
    /// were registered, then catch-all handlers. The handler lists are
    /// snapshotted before the first handler runs, so handlers are free to
    /// raise events and (un)register listeners themselves.
    #[tracing::instrument(level = "trace", skip(self, tree), fields(context = %self.id))]
    pub fn raise_at(&self, name: &str, tree: &mut Node, path: &NodePath) -> HandlerResult {
        if tree.get(path).is_none() {
            return Err(EventError::ArgsNotFound {
                event: name.to_string(),
                path: path.clone(),
            }
            .into());
        }
        let statics = self.table.statics.get(name);
        let instances: Vec<InstanceEntry> = self
            .instances
            .get(name)
            .map(|entries| entries.value().clone())
            .unwrap_or_default();
        let catch_all = &self.table.catch_all;

        if statics.is_none() && instances.is_empty() && catch_all.is_empty() {
            trace!("'{}' has no handlers", name);
            return Ok(());
        }
        trace!(
            "raising '{}' ({} static, {} instance, {} catch-all)",
            name,
            statics.map_or(0, |s| s.len()),
            instances.len(),
            catch_all.len()
        );

        let mut args = ActiveEventArgs::new(name, tree, path.clone());
        for handler in statics.into_iter().flatten() {
            handler(self, &mut args)?;
        }
        for entry in &instances {
            (entry.handler)(entry.receiver.as_ref(), self, &mut args)?;
        }
        for handler in catch_all {
            handler(self, &mut args)?;
        }
        Ok(())
    }

    /// Whether `name` has a static or instance handler of its own. Catch-all
    /// handlers run for every name and are not counted.
    pub fn has_handlers(&self, name: &str) -> bool {
        self.table.statics.contains_key(name)
            || self.instances.get(name).is_some_and(|e| !e.is_empty())
    }

    /// Every event name that currently has at least one handler, sorted.
    pub fn active_events(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.table.statics.keys().cloned().collect();
        names.extend(self.instances.iter().map(|entry| entry.key().clone()));
        names.into_iter().collect()
    }
}

impl std::fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("id", &self.id)
            .field("ticket", &self.ticket)
            .field("static_events", &self.table.statics.len())
            .field("instance_events", &self.instances.len())
            .finish()
    }
}
