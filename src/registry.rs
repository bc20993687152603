use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use thiserror::Error;

use crate::eval::RuleEngine;
use crate::protocol::EventType;

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid tool pattern {pattern:?} for hook {hook}: {source}")]
    Pattern {
        hook: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("hook {0} has no registered engine")]
    UnknownEngine(String),
}

/// One configured evaluator: which event and tools it fires for, and in what order.
#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Also the name of the engine this hook runs.
    pub name: String,
    pub event_type: EventType,
    /// Unanchored regex over the tool name; `None` matches every tool.
    pub tool_pattern: Option<Regex>,
    /// Lower runs first.
    pub priority: i32,
    pub timeout: Duration,
}

impl HookConfig {
    pub fn new(name: impl Into<String>, event_type: EventType) -> Self {
        Self {
            name: name.into(),
            event_type,
            tool_pattern: None,
            priority: 0,
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    /// Restrict to tools matching `pattern`. An empty pattern matches everything.
    pub fn with_tool_pattern(mut self, pattern: &str) -> Result<Self, RegistryError> {
        self.tool_pattern = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern).map_err(|source| RegistryError::Pattern {
                hook: self.name.clone(),
                pattern: pattern.to_string(),
                source,
            })?)
        };
        Ok(self)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn matches_tool(&self, tool_name: &str) -> bool {
        self.tool_pattern
            .as_ref()
            .is_none_or(|re| re.is_match(tool_name))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    config: HookConfig,
    seq: u64,
}

/// Priority-ordered hook configurations plus the engines they name.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<EventType, Vec<Entry>>>,
    engines: RwLock<HashMap<String, Arc<dyn RuleEngine>>>,
    next_seq: AtomicU64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping ascending priority; equal priorities keep registration order.
    pub fn register(&self, config: HookConfig) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut hooks = self.hooks.write();
        let list = hooks.entry(config.event_type).or_default();
        let at = list.partition_point(|e| e.config.priority <= config.priority);
        list.insert(at, Entry { config, seq });
    }

    /// Bind the engine hooks named `name` will run. Replaces any previous binding.
    pub fn register_engine(&self, name: impl Into<String>, engine: Arc<dyn RuleEngine>) {
        self.engines.write().insert(name.into(), engine);
    }

    pub fn engine(&self, name: &str) -> Option<Arc<dyn RuleEngine>> {
        self.engines.read().get(name).cloned()
    }

    /// Hooks for `event_type` whose pattern matches `tool_name`, in run order.
    pub fn get_hooks(&self, event_type: EventType, tool_name: &str) -> Vec<HookConfig> {
        self.hooks
            .read()
            .get(&event_type)
            .map(|list| {
                list.iter()
                    .filter(|e| e.config.matches_tool(tool_name))
                    .map(|e| e.config.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Matching hooks paired with their engines.
    pub fn resolve(
        &self,
        event_type: EventType,
        tool_name: &str,
    ) -> Result<Vec<(HookConfig, Arc<dyn RuleEngine>)>, RegistryError> {
        self.get_hooks(event_type, tool_name)
            .into_iter()
            .map(|hook| match self.engine(&hook.name) {
                Some(engine) => Ok((hook, engine)),
                None => Err(RegistryError::UnknownEngine(hook.name)),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.hooks.write().clear();
    }

    /// Registration sequence numbers in run order, for diagnostics.
    pub fn order(&self, event_type: EventType) -> Vec<(String, u64)> {
        self.hooks
            .read()
            .get(&event_type)
            .map(|list| list.iter().map(|e| (e.config.name.clone(), e.seq)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::BaseRuleEngine;

    fn names(hooks: &[HookConfig]) -> Vec<&str> {
        hooks.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn ascending_priority_ties_by_registration() {
        let registry = HookRegistry::new();
        registry.register(HookConfig::new("late", EventType::PreToolUse).with_priority(10));
        registry.register(HookConfig::new("first-zero", EventType::PreToolUse));
        registry.register(HookConfig::new("early", EventType::PreToolUse).with_priority(-5));
        registry.register(HookConfig::new("second-zero", EventType::PreToolUse));
        let hooks = registry.get_hooks(EventType::PreToolUse, "Write");
        assert_eq!(names(&hooks), vec!["early", "first-zero", "second-zero", "late"]);
        let seqs: Vec<u64> = registry.order(EventType::PreToolUse).into_iter().map(|(_, s)| s).collect();
        assert_eq!(seqs, vec![2, 1, 3, 0]);
    }

    #[test]
    fn filtered_by_event_and_tool() {
        let registry = HookRegistry::new();
        registry.register(
            HookConfig::new("writes", EventType::PreToolUse)
                .with_tool_pattern("^(Write|Edit|MultiEdit)$")
                .unwrap(),
        );
        registry.register(HookConfig::new("all", EventType::PreToolUse).with_tool_pattern("").unwrap());
        registry.register(HookConfig::new("post", EventType::PostToolUse));

        assert_eq!(names(&registry.get_hooks(EventType::PreToolUse, "Write")), vec!["writes", "all"]);
        assert_eq!(names(&registry.get_hooks(EventType::PreToolUse, "Bash")), vec!["all"]);
        assert_eq!(names(&registry.get_hooks(EventType::PostToolUse, "Bash")), vec!["post"]);
        assert!(registry.get_hooks(EventType::Stop, "").is_empty());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn invalid_pattern_rejected() {
        let err = HookConfig::new("bad", EventType::PreToolUse)
            .with_tool_pattern("(unclosed")
            .unwrap_err();
        assert!(matches!(err, RegistryError::Pattern { .. }));
    }

    #[test]
    fn resolve_requires_engine() {
        let registry = HookRegistry::new();
        registry.register(HookConfig::new("base", EventType::PreToolUse));
        assert!(matches!(
            registry.resolve(EventType::PreToolUse, "Write"),
            Err(RegistryError::UnknownEngine(_))
        ));
        registry.register_engine("base", Arc::new(BaseRuleEngine));
        let resolved = registry.resolve(EventType::PreToolUse, "Write").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1.name(), "base");
    }

    #[test]
    fn clear_empties() {
        let registry = HookRegistry::new();
        registry.register(HookConfig::new("a", EventType::Stop));
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
    }
}
