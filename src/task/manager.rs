//! Registry of running rule groups with hot reload

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex as AsyncMutex;

use super::config::ManagerOptions;
use super::group::{Task, TaskContext};
use crate::rules::{FeatureLookup, NotifyFunc, PostableRule, Queriers, Rule, RuleError, RuleType};
use crate::rules::{ThresholdRule, ThresholdRuleOpts};

/// Owns every running group and swaps groups in place on update
pub struct Manager {
    opts: ManagerOptions,
    ctx: TaskContext,
    features: Option<Arc<dyn FeatureLookup>>,
    tasks: DashMap<String, Arc<Task>>,
    /// Serializes updates so an old group is always stopped before its
    /// replacement starts
    update: AsyncMutex<()>,
}

impl Manager {
    pub fn new(opts: ManagerOptions, queriers: Queriers, notify: NotifyFunc) -> Self {
        Self {
            opts,
            ctx: TaskContext {
                queriers,
                notify,
                resend_delay: opts.resend_delay,
            },
            features: None,
            tasks: DashMap::new(),
            update: AsyncMutex::new(()),
        }
    }

    pub fn with_features(mut self, features: Arc<dyn FeatureLookup>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.opts
    }

    /// Build a rule from its definition. Only threshold rules are
    /// evaluated by this manager.
    pub fn build_rule(&self, id: &str, def: &PostableRule) -> Result<Arc<dyn Rule>, RuleError> {
        if def.rule_type == Some(RuleType::Prom) {
            return Err(RuleError::InvalidRule(format!(
                "rule {} has unsupported type prom",
                id
            )));
        }
        let rule = ThresholdRule::new(
            id,
            def,
            ThresholdRuleOpts::default(),
            self.features.as_deref(),
        )?;
        Ok(Arc::new(rule))
    }

    /// Replace the group `name;file` with one running `rules`.
    ///
    /// A running group with the same key is stopped first and its alert
    /// state carried over to the new group.
    pub async fn update_group(
        &self,
        name: &str,
        file: &str,
        frequency: Duration,
        rules: Vec<Arc<dyn Rule>>,
    ) -> Arc<Task> {
        let _guard = self.update.lock().await;

        let frequency = if frequency.is_zero() {
            self.opts.default_frequency
        } else {
            frequency
        };
        let task = Arc::new(Task::new(name, file, frequency, rules, self.ctx.clone()));
        let key = task.key();

        let old = self.tasks.get(&key).map(|t| Arc::clone(t.value()));
        if let Some(old) = old {
            old.stop().await;
            task.copy_state(&old);
            tracing::info!(group = %key, "Reloading rule group");
        } else {
            tracing::info!(group = %key, rules = task.rules().len(), "Adding rule group");
        }

        task.spawn();
        self.tasks.insert(key, Arc::clone(&task));
        task
    }

    /// Run a single rule definition in its own group
    pub async fn add_rule(&self, id: &str, def: &PostableRule) -> Result<Arc<Task>, RuleError> {
        def.validate()?;
        let rule = self.build_rule(id, def)?;
        let task = self.update_group(id, "", def.frequency, vec![rule]).await;
        if def.disabled {
            task.pause(true);
        }
        Ok(task)
    }

    /// Stop and remove a group, reporting its series as stale.
    pub async fn delete_group(&self, key: &str) -> bool {
        let _guard = self.update.lock().await;

        let Some((_, task)) = self.tasks.remove(key) else {
            tracing::debug!(group = %key, "No rule group to delete");
            return false;
        };
        task.set_mark_stale(true);
        task.stop().await;
        tracing::info!(group = %key, "Deleted rule group");
        true
    }

    pub fn task(&self, key: &str) -> Option<Arc<Task>> {
        self.tasks.get(key).map(|t| Arc::clone(t.value()))
    }

    /// All groups, ordered by key
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        let mut tasks: Vec<_> = self.tasks.iter().map(|t| Arc::clone(t.value())).collect();
        tasks.sort_by_key(|t| t.key());
        tasks
    }

    /// Stop every group and wait for all of them to exit.
    pub async fn stop(&self) {
        let _guard = self.update.lock().await;

        let tasks: Vec<_> = self.tasks.iter().map(|t| Arc::clone(t.value())).collect();
        tracing::info!(groups = tasks.len(), "Stopping rule manager");
        join_all(tasks.iter().map(|t| t.stop())).await;
        tracing::info!("Rule manager stopped");
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("opts", &self.opts)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
