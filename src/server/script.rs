use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::store::Store;
use crate::Result;
use crate::ScriptError;

/// Error a script handler may return; its message becomes the `FAIL` detail.
pub type ScriptFailure = Box<dyn std::error::Error + Send + Sync>;

/// Server-side handler invoked by `RUN_SCRIPT`.
pub type ScriptHandler = Arc<dyn Fn(ScriptParameters) -> std::result::Result<String, ScriptFailure> + Send + Sync>;

/// Input handed to a script: the live store and the caller's optional payload.
#[derive(Clone)]
pub struct ScriptParameters {
    pub store: Arc<Store>,
    /// Trimmed custom data; `None` when the request carried none
    pub custom_data: Option<String>,
}

impl fmt::Debug for ScriptParameters {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ScriptParameters")
            .field("custom_data", &self.custom_data)
            .finish()
    }
}

/// Named script handlers, shared by all sessions.
#[derive(Default)]
pub struct ScriptRegistry {
    scripts: DashMap<String, ScriptHandler>,
}

impl fmt::Debug for ScriptRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("scripts", &self.scripts.len())
            .finish()
    }
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `ScriptError::AlreadyExists` if `name` is taken.
    pub fn add_script<F>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(ScriptParameters) -> std::result::Result<String, ScriptFailure> + Send + Sync + 'static,
    {
        match self.scripts.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ScriptError::AlreadyExists(name.to_string()).into()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(handler));
                info!(script = name, "script registered");
                Ok(())
            }
        }
    }

    /// Removes `name`; removing an unknown script is a no-op.
    pub fn remove_script(
        &self,
        name: &str,
    ) -> bool {
        self.scripts.remove(name).is_some()
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<ScriptHandler> {
        self.scripts.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
