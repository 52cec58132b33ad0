//! Console command registry.
//!
//! Commands are invoked by name from the console front (or any other
//! caller holding the registry). Builtins register here during the
//! `cli:loadbuiltin` phase, modules and the application during
//! `cli:loadcommands`. An owner index keeps eviction proportional to the
//! evicted owner's entries.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::{owner_conflict, ActionFn, ActionInput, Owner, RegistryError, RegistryResult};
use crate::event::Value;

/// A named console command with its owning contributor.
#[derive(Clone)]
pub struct CommandEntry {
    pub name: String,
    pub description: Option<String>,
    pub usage: Option<String>,
    pub owner: Owner,
    pub action: ActionFn,
}

impl CommandEntry {
    pub fn new(name: &str, owner: Owner, action: ActionFn) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            usage: None,
            owner,
            action,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_usage(mut self, usage: &str) -> Self {
        self.usage = Some(usage.to_string());
        self
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: DashMap<String, CommandEntry>,
    owners: DashMap<Owner, HashSet<String>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command. Returns false when the name is held by a
    /// different module; any other collision overwrites.
    pub fn register(&self, entry: CommandEntry) -> bool {
        if let Some(existing) = self.commands.get(&entry.name) {
            if owner_conflict(&existing.owner, &entry.owner) {
                warn!(
                    "Command {} already registered by {}, rejecting {}",
                    entry.name, existing.owner, entry.owner
                );
                return false;
            }
        }
        debug!("Registering command {} ({})", entry.name, entry.owner);
        let name = entry.name.clone();
        let owner = entry.owner.clone();
        if let Some(previous) = self.commands.insert(name.clone(), entry) {
            if previous.owner != owner {
                self.detach(&previous.owner, &previous.name);
            }
        }
        self.owners.entry(owner).or_default().insert(name);
        true
    }

    /// Looks up and invokes a command.
    ///
    /// # Errors
    ///
    /// `CommandNotFound` for unknown names, otherwise whatever the action
    /// returns.
    pub async fn run(&self, name: &str, input: ActionInput) -> RegistryResult<Value> {
        let action: ActionFn = self
            .commands
            .get(name)
            .map(|entry| entry.action.clone())
            .ok_or_else(|| RegistryError::CommandNotFound(name.to_string()))?;
        action(input).await
    }

    pub fn get(&self, name: &str) -> Option<CommandEntry> {
        self.commands.get(name).map(|entry| entry.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        match self.commands.remove(name) {
            Some((_, entry)) => {
                self.detach(&entry.owner, &entry.name);
                true
            }
            None => false,
        }
    }

    /// Removes every application-owned command.
    pub fn remove_app_entries(&self) -> usize {
        self.remove_owned(&Owner::App)
    }

    /// Removes every module-owned command, owner by owner.
    pub fn remove_module_entries(&self) -> usize {
        self.module_owners()
            .iter()
            .map(|owner| self.remove_owned(owner))
            .sum()
    }

    /// Removes the commands owned by one contributor, O(owned entries).
    pub fn remove_owned(&self, owner: &Owner) -> usize {
        let names: Vec<String> = match self.owners.remove(owner) {
            Some((_, set)) => set.into_iter().collect(),
            None => return 0,
        };
        let mut removed = 0;
        for name in names {
            if self.commands.remove(&name).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Module owners currently holding at least one command.
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

    /// Command names in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Entry snapshots sorted by name, for help listings.
    pub fn entries(&self) -> Vec<CommandEntry> {
        let mut entries: Vec<CommandEntry> =
            self.commands.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
