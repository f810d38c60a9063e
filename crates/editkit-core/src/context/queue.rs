//! Queue derivation
//!
//! History is grouped into one queue per target (ordered by first
//! appearance), each queue is merged, filtered by its manager and finally
//! handed to the aggregators. The result is an arena of `CommandInfo`
//! entries; queues and `merged_by` links are arena indices.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use editkit_core_types::{CommandId, ObjectHandle};

use crate::command::{Command, CommandKind};
use crate::manager::{ManagerResolver, ObjectManager, QueueFilter};
use crate::merge::{clear_pass_markers, MergeOutcome, UserParams};
use crate::persist::PersistInfo;
use crate::reflect::CommandReflector;

use super::HistoryEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    History,
    /// Produced by a merge under an id no queue entry carried
    Synthetic,
}

#[derive(Clone)]
pub(crate) struct CommandInfo {
    pub command: Command,
    pub reflector: Option<Arc<dyn CommandReflector>>,
    pub manager: Option<Arc<dyn ObjectManager>>,
    pub merged_by: Option<usize>,
    pub prev_in_batch: Option<CommandId>,
    pub executed: bool,
    pub persist_actions: Option<Vec<PersistInfo>>,
    pub origin: Origin,
}

impl CommandInfo {
    fn new(
        command: Command,
        reflector: Option<Arc<dyn CommandReflector>>,
        manager: Option<Arc<dyn ObjectManager>>,
        origin: Origin,
    ) -> Self {
        Self {
            command,
            reflector,
            manager,
            merged_by: None,
            prev_in_batch: None,
            executed: false,
            persist_actions: None,
            origin,
        }
    }
}

#[derive(Clone)]
pub(crate) struct CommandQueue {
    pub target: ObjectHandle,
    pub manager: Option<Arc<dyn ObjectManager>>,
    /// Surviving entries in original relative order
    pub entries: Vec<usize>,
}

#[derive(Clone, Default)]
pub(crate) struct Derivation {
    pub entries: Vec<CommandInfo>,
    pub queues: Vec<CommandQueue>,
}

impl Derivation {
    /// Run a full derivation pass over `history`
    ///
    /// `params` carries the context's user params in; markers of an earlier
    /// pass are dropped first and this pass's markers are left behind.
    pub fn build(
        history: &[HistoryEntry],
        resolver: &dyn ManagerResolver,
        params: &mut UserParams,
    ) -> Self {
        clear_pass_markers(params);
        let mut derivation = Derivation::default();
        let mut by_target: HashMap<ObjectHandle, usize> = HashMap::new();
        let mut originals: Vec<Vec<usize>> = Vec::new();

        for entry in history {
            let target = entry.command.target();
            let queue = match by_target.get(target) {
                Some(&queue) => queue,
                None => {
                    derivation.queues.push(CommandQueue {
                        target: target.clone(),
                        manager: resolver.resolve(target),
                        entries: Vec::new(),
                    });
                    originals.push(Vec::new());
                    let queue = derivation.queues.len() - 1;
                    by_target.insert(target.clone(), queue);
                    queue
                }
            };
            let mut info = CommandInfo::new(
                entry.command.clone(),
                entry.reflector.clone(),
                derivation.queues[queue].manager.clone(),
                Origin::History,
            );
            info.prev_in_batch = entry.prev_in_batch;
            originals[queue].push(derivation.entries.len());
            derivation.entries.push(info);
        }

        let mut synthetic = HashMap::new();
        for (queue, queue_originals) in originals.iter().enumerate() {
            let surviving = derivation.merge_queue(queue, queue_originals, params, &mut synthetic);
            derivation.queues[queue].entries = surviving;
        }
        derivation.filter_queues();
        derivation.aggregate();

        tracing::debug!(
            history_len = history.len(),
            queue_count = derivation.queues.len(),
            "Derived command queues"
        );
        derivation
    }

    fn merge_queue(
        &mut self,
        queue: usize,
        originals: &[usize],
        params: &mut UserParams,
        synthetic: &mut HashMap<CommandId, usize>,
    ) -> Vec<usize> {
        let mut surviving: Vec<usize> = Vec::new();
        for &index in originals {
            let command = self.entries[index].command.clone();
            if surviving.is_empty() {
                let outcome = command.merge(None, params);
                match outcome {
                    MergeOutcome::Unchanged => surviving.push(index),
                    MergeOutcome::Cancelled => {}
                    MergeOutcome::Replaced(replacement) => {
                        self.absorb(queue, index, replacement, originals, &mut surviving, synthetic)
                    }
                }
                continue;
            }

            let mut absorbed = false;
            let mut position = surviving.len();
            while position > 0 {
                position -= 1;
                let candidate = surviving[position];
                let outcome = command.merge(Some(&self.entries[candidate].command), params);
                match outcome {
                    MergeOutcome::Unchanged => {}
                    MergeOutcome::Cancelled => {
                        surviving.remove(position);
                        absorbed = true;
                    }
                    MergeOutcome::Replaced(replacement) => {
                        self.absorb(queue, index, replacement, originals, &mut surviving, synthetic);
                        absorbed = true;
                        break;
                    }
                }
            }
            if !absorbed {
                surviving.push(index);
            }
        }
        surviving
    }

    /// Store a `Replaced` result and link the new command to its holder
    fn absorb(
        &mut self,
        queue: usize,
        index: usize,
        replacement: Command,
        originals: &[usize],
        surviving: &mut Vec<usize>,
        synthetic: &mut HashMap<CommandId, usize>,
    ) {
        let id = replacement.id();
        if id == self.entries[index].command.id() {
            self.entries[index].command = replacement;
            surviving.push(index);
            return;
        }

        let existing = surviving
            .iter()
            .chain(originals.iter())
            .copied()
            .find(|&i| self.entries[i].command.id() == id)
            .or_else(|| synthetic.get(&id).copied());
        let holder = match existing {
            Some(holder) => {
                self.entries[holder].command = replacement;
                holder
            }
            None => {
                let manager = self.queues[queue].manager.clone();
                self.entries.push(CommandInfo::new(
                    replacement,
                    None,
                    manager,
                    Origin::Synthetic,
                ));
                let holder = self.entries.len() - 1;
                synthetic.insert(id, holder);
                holder
            }
        };
        if !surviving.contains(&holder) {
            self.entries[holder].merged_by = None;
            surviving.push(holder);
        }
        self.entries[index].merged_by = Some(holder);
    }

    fn filter_queues(&mut self) {
        for queue in 0..self.queues.len() {
            let Some(manager) = self.queues[queue].manager.clone() else {
                continue;
            };
            let kept = {
                let current = &self.queues[queue];
                let mut filter = QueueFilter::new(
                    &current.target,
                    current
                        .entries
                        .iter()
                        .map(|&i| (i, &self.entries[i].command))
                        .collect(),
                );
                manager.filter_commands(&mut filter);
                filter.into_indices()
            };
            self.queues[queue].entries = kept;
        }
    }

    /// Let every surviving aggregator claim the commands in its scope
    ///
    /// Aggregators are visited newest first, so the most recent one wins
    /// when scopes overlap.
    fn aggregate(&mut self) {
        let surviving: Vec<usize> = self
            .queues
            .iter()
            .flat_map(|q| q.entries.iter().copied())
            .collect();
        let mut aggregators: Vec<usize> = surviving
            .iter()
            .copied()
            .filter(|&i| self.entries[i].command.is_aggregate())
            .collect();
        aggregators.sort_unstable_by(|a, b| b.cmp(a));

        let mut claimed: HashSet<usize> = HashSet::new();
        for aggregator in aggregators {
            let scope = match self.entries[aggregator].command.kind() {
                CommandKind::Aggregate { scope, .. } => scope.clone(),
                _ => continue,
            };
            let claims: Vec<usize> = surviving
                .iter()
                .copied()
                .filter(|&i| {
                    let info = &self.entries[i];
                    i != aggregator
                        && !claimed.contains(&i)
                        && !info.command.is_aggregate()
                        && info.merged_by.is_none()
                        && scope.contains(info.command.target())
                })
                .collect();

            let mut commands = Vec::with_capacity(claims.len());
            for index in claims {
                claimed.insert(index);
                self.entries[index].merged_by = Some(aggregator);
                commands.push(self.entries[index].command.clone());
            }
            if let CommandKind::Aggregate { claimed: list, .. } =
                self.entries[aggregator].command.kind_mut()
            {
                *list = commands;
            }
        }
    }

    /// Follow `merged_by` to the effective entry
    pub fn resolve(&self, mut index: usize) -> usize {
        while let Some(next) = self.entries[index].merged_by {
            index = next;
        }
        index
    }

    pub fn is_dirty(&self) -> bool {
        self.queues.iter().any(|q| !q.entries.is_empty())
    }

    /// Effective entries, de-duplicated, in queue order
    pub fn final_entries(&self) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for queue in &self.queues {
            for &index in &queue.entries {
                let effective = self.resolve(index);
                if seen.insert(effective) {
                    result.push(effective);
                }
            }
        }
        result
    }

    pub fn edited_objects(&self) -> Vec<ObjectHandle> {
        self.queues
            .iter()
            .filter(|q| !q.entries.is_empty())
            .map(|q| q.target.clone())
            .collect()
    }

    /// History entries whose merge chain ends at `effective`
    pub fn history_resolving_to(&self, effective: usize) -> Vec<usize> {
        (0..self.entries.len())
            .filter(|&i| self.entries[i].origin == Origin::History && self.resolve(i) == effective)
            .collect()
    }
}
