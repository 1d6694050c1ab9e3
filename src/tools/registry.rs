//! Tool registry - manages available tools for the agent
//!
//! One registry per process is the normal arrangement (see
//! [`global_registry`]); tests construct isolated instances directly.
//! Reads are concurrent, writes serialized, and snapshots are independent
//! copies so callers iterate without holding the lock.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::agent::types::ToolDefinition;
use crate::error::{Error, Result};

use super::traits::Tool;

#[derive(Default)]
struct RegistryInner {
    /// Canonical name → tool
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Alias → canonical name
    aliases: HashMap<String, String>,
}

impl RegistryInner {
    fn name_taken(&self, name: &str) -> bool {
        self.tools.contains_key(name) || self.aliases.contains_key(name)
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        ToolRegistry {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a tool under its own name and aliases.
    ///
    /// Re-registering the identical instance is a no-op; any other
    /// name or alias collision fails.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        let mut inner = self.inner.write().expect("registry lock poisoned");

        if let Some(existing) = inner.tools.get(&name) {
            if Arc::ptr_eq(existing, &tool) {
                return Ok(());
            }
            return Err(Error::AlreadyRegistered(name));
        }
        if inner.aliases.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        for alias in tool.aliases() {
            if inner.name_taken(alias) {
                return Err(Error::AlreadyRegistered(alias.to_string()));
            }
        }

        for alias in tool.aliases() {
            inner.aliases.insert(alias.to_string(), name.clone());
        }
        debug!(tool = %name, "registered tool");
        inner.tools.insert(name, tool);
        Ok(())
    }

    /// Legacy mapping-style registration under an explicit name.
    ///
    /// Shares the same store and collision rules as [`register`]; the
    /// tool's declared aliases are not installed.
    ///
    /// [`register`]: ToolRegistry::register
    pub fn register_named(&self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Result<()> {
        let name = name.into();
        let mut inner = self.inner.write().expect("registry lock poisoned");

        if let Some(existing) = inner.tools.get(&name) {
            if Arc::ptr_eq(existing, &tool) {
                return Ok(());
            }
            return Err(Error::AlreadyRegistered(name));
        }
        if inner.aliases.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        inner.tools.insert(name, tool);
        Ok(())
    }

    /// Remove a tool and its alias entries
    pub fn unregister(&self, name: &str) -> Result<Arc<dyn Tool>> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let tool = inner
            .tools
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("tool '{}'", name)))?;
        inner.aliases.retain(|_, canonical| canonical != name);
        Ok(tool)
    }

    /// Get a tool by name or alias
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let canonical = inner.aliases.get(name).map(String::as_str).unwrap_or(name);
        inner
            .tools
            .get(canonical)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("tool '{}'", name)))
    }

    /// Independent snapshot of canonical name → tool
    pub fn list(&self) -> HashMap<String, Arc<dyn Tool>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.tools.clone()
    }

    /// Get all tool definitions
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Get tool count
    pub fn count(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").tools.len()
    }

    /// List canonical tool names
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.tools.keys().cloned().collect()
    }

    /// Invoke `cleanup` on every registered tool.
    pub async fn cleanup_all(&self) {
        for (_, tool) in self.list() {
            tool.cleanup().await;
        }
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<ToolRegistry>> = OnceLock::new();

/// The process-wide registry, lazily constructed on first access.
pub fn global_registry() -> Arc<ToolRegistry> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(ToolRegistry::new()))
        .clone()
}
