//! Scheduled task registry.
//!
//! Task definitions are collected during the `tasks:loadtasks` phase and
//! spawned by the [`Scheduler`](crate::tasks::Scheduler) when `tasks:start`
//! fires. The registry tracks both the definitions and the running join
//! handles so unload can cancel a task's loop together with its entry.
//! An owner index keeps eviction proportional to the evicted owner's
//! entries.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{owner_conflict, ActionFn, ActionInput, Owner, RegistryError, RegistryResult};
use crate::event::Value;
use crate::tasks::Schedule;

/// A named task definition with its cadence and owning contributor.
#[derive(Clone)]
pub struct TaskEntry {
    pub name: String,
    pub owner: Owner,
    pub schedule: Schedule,
    pub action: ActionFn,
}

impl TaskEntry {
    pub fn new(name: &str, owner: Owner, schedule: Schedule, action: ActionFn) -> Self {
        Self {
            name: name.to_string(),
            owner,
            schedule,
            action,
        }
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, TaskEntry>,
    owners: DashMap<Owner, HashSet<String>>,
    running: DashMap<String, JoinHandle<()>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task definition. Returns false when the name is held by
    /// a different module; any other collision overwrites.
    pub fn register(&self, entry: TaskEntry) -> bool {
        if let Some(existing) = self.tasks.get(&entry.name) {
            if owner_conflict(&existing.owner, &entry.owner) {
                warn!(
                    "Task {} already registered by {}, rejecting {}",
                    entry.name, existing.owner, entry.owner
                );
                return false;
            }
        }
        debug!(
            "Registering task {} ({}, {})",
            entry.name, entry.owner, entry.schedule
        );
        let name = entry.name.clone();
        let owner = entry.owner.clone();
        if let Some(previous) = self.tasks.insert(name.clone(), entry) {
            if previous.owner != owner {
                self.detach(&previous.owner, &previous.name);
            }
        }
        self.owners.entry(owner).or_default().insert(name);
        true
    }

    pub fn get(&self, name: &str) -> Option<TaskEntry> {
        self.tasks.get(name).map(|entry| entry.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Invokes a task's action once, outside its schedule.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` for unknown names, otherwise whatever the action
    /// returns.
    pub async fn run(&self, name: &str, input: ActionInput) -> RegistryResult<Value> {
        let action: ActionFn = self
            .tasks
            .get(name)
            .map(|entry| entry.action.clone())
            .ok_or_else(|| RegistryError::TaskNotFound(name.to_string()))?;
        action(input).await
    }

    /// Removes a definition, cancelling its running loop if any.
    pub fn remove(&self, name: &str) -> bool {
        self.stop(name);
        match self.tasks.remove(name) {
            Some((_, entry)) => {
                self.detach(&entry.owner, &entry.name);
                true
            }
            None => false,
        }
    }

    /// Records the join handle of a spawned task loop. A handle already
    /// held under the name is aborted first.
    pub fn mark_running(&self, name: &str, handle: JoinHandle<()>) {
        if let Some((_, previous)) = self.running.remove(name) {
            previous.abort();
        }
        self.running.insert(name.to_string(), handle);
    }

    /// Aborts one running task loop. The definition stays registered.
    pub fn stop(&self, name: &str) -> bool {
        match self.running.remove(name) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Aborts every running task loop.
    pub fn stop_all(&self) -> usize {
        let names: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0;
        for name in names {
            if self.stop(&name) {
                stopped += 1;
            }
        }
        stopped
    }

    /// Removes application-owned tasks and cancels their loops.
    pub fn remove_app_entries(&self) -> usize {
        self.remove_owned(&Owner::App)
    }

    /// Removes module-owned tasks, owner by owner, cancelling their loops.
    pub fn remove_module_entries(&self) -> usize {
        self.module_owners()
            .iter()
            .map(|owner| self.remove_owned(owner))
            .sum()
    }

    /// Removes the tasks owned by one contributor, O(owned entries).
    pub fn remove_owned(&self, owner: &Owner) -> usize {
        let names: Vec<String> = match self.owners.remove(owner) {
            Some((_, set)) => set.into_iter().collect(),
            None => return 0,
        };
        let mut removed = 0;
        for name in names {
            self.stop(&name);
            if self.tasks.remove(&name).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Module owners currently holding at least one task.
    pub fn module_owners(&self) -> Vec<Owner> {
        self.owners
            .iter()
            .filter(|entry| entry.key().is_module())
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn detach(&self, owner: &Owner, name: &str) {
        if let Some(mut set) = self.owners.get_mut(owner) {
            set.remove(name);
        }
        self.owners.remove_if(owner, |_, set| set.is_empty());
    }

    /// Definition snapshots, for the scheduler and for listings.
    pub fn entries(&self) -> Vec<TaskEntry> {
        let mut entries: Vec<TaskEntry> = self.tasks.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
