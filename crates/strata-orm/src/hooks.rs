//! Lifecycle hooks.
//!
//! Hooks are async callbacks keyed by model type and event. A callback that
//! returns `false` during a "before" event (`Saving`, `Creating`,
//! `Updating`, `Deleting`, `Restoring`) aborts the operation before the
//! storage call. Results of "after" events are ignored.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use strata_sql_core::BoxFuture;
use tracing::debug;

use crate::model::Model;
use crate::record::Record;

/// A lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Before any insert or update.
    Saving,
    /// After any insert or update.
    Saved,
    /// Before an insert.
    Creating,
    /// After an insert.
    Created,
    /// Before an update.
    Updating,
    /// After an update.
    Updated,
    /// Before a delete.
    Deleting,
    /// After a delete.
    Deleted,
    /// Before a restore.
    Restoring,
    /// After a restore.
    Restored,
}

/// A registered hook callback.
pub type HookFn = Arc<dyn for<'a> Fn(&'a mut Record) -> BoxFuture<'a, bool> + Send + Sync>;

/// Hook callbacks keyed by (model type, event), kept in registration order.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<(TypeId, HookEvent), Vec<HookFn>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("registered", &self.hooks.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async callback for `M` and `event`.
    ///
    /// ```ignore
    /// hooks.register::<User, _>(HookEvent::Creating, |user| {
    ///     Box::pin(async move {
    ///         user.set("slug", slugify(&user.get("name")?)).is_ok()
    ///     })
    /// });
    /// ```
    pub fn register<M, F>(&mut self, event: HookEvent, callback: F)
    where
        M: Model,
        F: for<'a> Fn(&'a mut Record) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        self.hooks
            .entry((TypeId::of::<M>(), event))
            .or_default()
            .push(Arc::new(callback));
    }

    /// Registers a synchronous callback for `M` and `event`.
    pub fn register_sync<M, F>(&mut self, event: HookEvent, callback: F)
    where
        M: Model,
        F: Fn(&mut Record) -> bool + Send + Sync + 'static,
    {
        self.register::<M, _>(event, move |record| {
            let keep_going = callback(record);
            Box::pin(async move { keep_going })
        });
    }

    /// Returns how many callbacks are registered for `M` and `event`.
    #[must_use]
    pub fn count<M: Model>(&self, event: HookEvent) -> usize {
        self.hooks
            .get(&(TypeId::of::<M>(), event))
            .map_or(0, Vec::len)
    }

    /// Runs the callbacks for the record's model in registration order.
    ///
    /// Returns `false` as soon as one callback returns `false`.
    pub async fn run(&self, event: HookEvent, record: &mut Record) -> bool {
        let Some(callbacks) = self.hooks.get(&(record.model().id(), event)) else {
            return true;
        };
        for callback in callbacks {
            if !callback(record).await {
                debug!(model = record.model().name, event = ?event, "hook aborted operation");
                return false;
            }
        }
        true
    }
}
