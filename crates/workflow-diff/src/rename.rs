//! Carry node renames into the connection map
//!
//! Connections reference nodes by name. Renames made by `updateNode` are
//! collected during the node phase and rewritten into the map in one pass
//! before any connection operation is validated.

use indexmap::IndexMap;

use crate::types::ConnectionMap;

/// Old name -> new name pairs produced during one call
#[derive(Debug, Clone, Default)]
pub struct RenameTracker {
    renames: IndexMap<String, String>,
}

impl RenameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rename
    ///
    /// Chained renames (A -> B, then B -> C) collapse to A -> C so a single
    /// rewrite pass lands on the final name.
    pub fn record(&mut self, old_name: &str, new_name: &str) {
        if old_name == new_name {
            return;
        }
        let mut chained = false;
        for target in self.renames.values_mut() {
            if target == old_name {
                *target = new_name.to_string();
                chained = true;
            }
        }
        if !chained && !self.renames.contains_key(old_name) {
            self.renames
                .insert(old_name.to_string(), new_name.to_string());
        }
        // A -> B -> A leaves nothing to rewrite
        self.renames.retain(|old, new| old != new);
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    /// Whether some node was renamed away from `name` and not yet applied
    pub fn renamed_from(&self, name: &str) -> bool {
        self.renames.contains_key(name)
    }

    /// Drop the renames that end at `new_name` and return their old names
    ///
    /// Called when the renamed node is removed before propagation, so the
    /// edges still filed under the old names can go with it.
    pub fn forget(&mut self, new_name: &str) -> Vec<String> {
        let mut old_names = Vec::new();
        self.renames.retain(|old, new| {
            if *new == new_name {
                old_names.push(old.clone());
                false
            } else {
                true
            }
        });
        old_names
    }

    /// Rewrite source keys and target references, then forget the renames
    ///
    /// Returns the number of references rewritten.
    pub fn apply(&mut self, connections: &mut ConnectionMap) -> usize {
        if self.renames.is_empty() {
            return 0;
        }

        let mut rewritten = 0;
        let entries = std::mem::take(connections);
        for (source, channels) in entries {
            let key = match self.renames.get(&source) {
                Some(new_name) => {
                    rewritten += 1;
                    new_name.clone()
                }
                None => source,
            };
            connections.insert(key, channels);
        }

        for target in connections
            .values_mut()
            .flat_map(|channels| channels.values_mut())
            .flatten()
            .flatten()
        {
            if let Some(new_name) = self.renames.get(&target.node) {
                target.node = new_name.clone();
                rewritten += 1;
            }
        }

        log::debug!(
            "Propagated {} rename(s) into {} connection reference(s)",
            self.renames.len(),
            rewritten
        );
        self.renames.clear();
        rewritten
    }
}
