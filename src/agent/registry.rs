use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Isolated key-value execution context owned by one extension. Probes
/// accumulate state across invocations by storing it here; two extensions
/// never share a namespace.
#[derive(Debug, Default)]
pub struct Namespace {
    slots: HashMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.slots.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.slots.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.slots.remove(key)
    }
}

/// One compiled probe hook. Load and unload hooks ignore the returned value;
/// the invoker's return value becomes the command response payload.
pub type HookFn = Box<dyn FnMut(&mut Namespace, Option<&Value>) -> Result<Value> + Send>;

/// Builds a hook from install-time arguments. Registered by the embedding
/// host; the registry never knows what a probe does.
pub type HookBuilder = Box<dyn Fn(Option<&Value>) -> Result<HookFn> + Send + Sync>;

/// Reference to a catalog probe inside an `install` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookSpec {
    pub probe: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl HookSpec {
    pub fn new(probe: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            args: None,
        }
    }

    pub fn with_args(probe: impl Into<String>, args: Value) -> Self {
        Self {
            probe: probe.into(),
            args: Some(args),
        }
    }
}

/// Payload of the `install` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstallSpec {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<HookSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoke: Option<HookSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unload: Option<HookSpec>,
}

impl InstallSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            load: None,
            invoke: None,
            unload: None,
        }
    }

    pub fn load(mut self, spec: HookSpec) -> Self {
        self.load = Some(spec);
        self
    }

    pub fn invoke(mut self, spec: HookSpec) -> Self {
        self.invoke = Some(spec);
        self
    }

    pub fn unload(mut self, spec: HookSpec) -> Self {
        self.unload = Some(spec);
        self
    }
}

/// The probe implementations a host process offers to dashboards.
/// Install requests resolve their hook specs against this catalog.
#[derive(Default)]
pub struct ProbeCatalog {
    builders: HashMap<String, HookBuilder>,
}

impl ProbeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(Option<&Value>) -> Result<HookFn> + Send + Sync + 'static,
    {
        self.builders.insert(name.into(), Box::new(builder));
    }

    fn resolve(&self, spec: &HookSpec) -> Result<HookFn> {
        let builder = self
            .builders
            .get(&spec.probe)
            .ok_or_else(|| Error::UnknownProbe(spec.probe.clone()))?;
        builder(spec.args.as_ref())
    }
}

struct Extension {
    invoke: Option<HookFn>,
    unload: Option<HookFn>,
    namespace: Namespace,
}

/// Live extensions of one session, keyed by caller-chosen id. Owned by the
/// attach server; dropped (unloaders run) exactly once, at session end.
pub struct ExtensionRegistry {
    catalog: Arc<ProbeCatalog>,
    entries: HashMap<String, Extension>,
}

impl ExtensionRegistry {
    pub fn new(catalog: Arc<ProbeCatalog>) -> Self {
        Self {
            catalog,
            entries: HashMap::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Install or replace an extension. All hook specs must resolve and the
    /// loader must run successfully (against a fresh namespace) before
    /// anything is registered; any failure leaves a previously installed
    /// extension with the same id untouched. On success, replacement runs
    /// the previous unloader before the new entry takes over.
    pub fn install(&mut self, spec: InstallSpec) -> Result<()> {
        let fail = |reason: String| Error::ExtensionInstall {
            id: spec.id.clone(),
            reason,
        };

        let mut load = match spec.load.as_ref().map(|s| self.catalog.resolve(s)) {
            Some(Ok(hook)) => Some(hook),
            Some(Err(e)) => return Err(fail(e.to_string())),
            None => None,
        };
        let invoke = match spec.invoke.as_ref().map(|s| self.catalog.resolve(s)) {
            Some(Ok(hook)) => Some(hook),
            Some(Err(e)) => return Err(fail(e.to_string())),
            None => None,
        };
        let unload = match spec.unload.as_ref().map(|s| self.catalog.resolve(s)) {
            Some(Ok(hook)) => Some(hook),
            Some(Err(e)) => return Err(fail(e.to_string())),
            None => None,
        };

        let mut namespace = Namespace::new();
        if let Some(load) = load.as_mut() {
            load(&mut namespace, None).map_err(|e| fail(e.to_string()))?;
        }

        if let Some(previous) = self.entries.remove(&spec.id) {
            run_unloader(&spec.id, previous);
        }

        self.entries.insert(
            spec.id.clone(),
            Extension {
                invoke,
                unload,
                namespace,
            },
        );
        tracing::debug!(id = %spec.id, "extension installed");
        Ok(())
    }

    /// Run an extension's invoker against its own namespace. `None` means
    /// the id is unknown (the server answers NotFound).
    pub fn invoke(&mut self, id: &str, data: Option<&Value>) -> Option<Result<Value>> {
        let entry = self.entries.get_mut(id)?;
        Some(match entry.invoke.as_mut() {
            Some(hook) => hook(&mut entry.namespace, data),
            // Default invoker: a no-op returning nothing.
            None => Ok(Value::Null),
        })
    }

    /// Best-effort unload of every extension. Called exactly once, during
    /// session termination.
    pub fn remove_all(&mut self) {
        for (id, entry) in self.entries.drain() {
            run_unloader(&id, entry);
        }
    }
}

fn run_unloader(id: &str, mut entry: Extension) {
    if let Some(unload) = entry.unload.as_mut() {
        match unload(&mut entry.namespace, None) {
            Ok(_) => tracing::debug!(id, "extension removed"),
            Err(e) => tracing::warn!(id, error = %e, "extension unloader failed"),
        }
    }
}
