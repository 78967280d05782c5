//! Additional assignment kinds beyond DMX.
//!
//! Hosting applications can register new kinds (downstream byte protocols,
//! show-variable writes, whatever) together with the hooks the renderer needs:
//! a resolver, an optional fade, and buffer setup/teardown called around each
//! frame.
use std::any::Any;

use anyhow::{Result, bail, ensure};
use log::error;
use ordermap::OrderMap;

use crate::assign::{Assignment, Kind};

/// Per-extension scratch state, rebuilt or reused frame to frame.
pub type ExtensionBuffer = Box<dyn Any + Send>;

/// Blend two optional assignments of an extension kind.
pub type FadeFn =
    Box<dyn Fn(Option<&Assignment>, Option<&Assignment>, f64) -> Result<Option<Assignment>> + Send>;

/// The hooks an extension registers alongside its kinds.
pub struct ExtensionHooks {
    /// Write one resolved assignment into the extension's buffer.
    pub resolve: Box<dyn FnMut(&Assignment, &mut ExtensionBuffer) -> Result<()> + Send>,
    /// Kind-specific fade; omitted kinds step at the transition midpoint.
    pub fade: Option<FadeFn>,
    /// Called while universe buffers are being zeroed, before any resolution.
    pub empty: Option<Box<dyn FnMut(&mut ExtensionBuffer) + Send>>,
    /// Called after resolution, when DMX frames are about to be sent.
    pub send: Option<Box<dyn FnMut(&mut ExtensionBuffer) -> Result<()> + Send>>,
}

struct Entry {
    kinds: Vec<String>,
    buffer: ExtensionBuffer,
    hooks: ExtensionHooks,
}

/// Registered extensions, in registration order.
#[derive(Default)]
pub struct ExtensionRegistry {
    entries: OrderMap<String, Entry>,
}

impl ExtensionRegistry {
    /// Register an extension under a unique key.
    ///
    /// Each kind tag may belong to only one extension; `kinds` also fixes the
    /// extension's internal resolution order.
    pub fn register(
        &mut self,
        key: &str,
        kinds: Vec<String>,
        buffer: ExtensionBuffer,
        hooks: ExtensionHooks,
    ) -> Result<()> {
        ensure!(!kinds.is_empty(), "extension '{key}' registers no kinds");
        ensure!(
            !self.entries.contains_key(key),
            "duplicate extension key '{key}'"
        );
        for kind in &kinds {
            ensure!(
                self.owner_of(kind).is_none(),
                "extension kind '{kind}' is already registered"
            );
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                kinds,
                buffer,
                hooks,
            },
        );
        Ok(())
    }

    /// Re-order (or narrow) the resolution order of an extension's kinds.
    pub fn set_resolution_order(&mut self, key: &str, kinds: Vec<String>) -> Result<()> {
        let Some(entry) = self.entries.get_mut(key) else {
            bail!("no extension registered under '{key}'");
        };
        for kind in &kinds {
            ensure!(
                entry.kinds.contains(kind),
                "extension '{key}' does not own kind '{kind}'"
            );
        }
        entry.kinds = kinds;
        Ok(())
    }

    fn owner_of(&self, kind: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, e)| e.kinds.iter().any(|k| k == kind))
            .map(|(key, _)| key.as_str())
    }

    /// All extension kinds, in resolution order: registration order of
    /// extensions, then each extension's own kind order.
    pub fn resolution_kinds(&self) -> Vec<Kind> {
        self.entries
            .values()
            .flat_map(|e| e.kinds.iter())
            .map(|k| Kind::Extension(k.clone()))
            .collect()
    }

    /// The registered fade for an extension kind, if any.
    pub fn fade(
        &self,
        kind: &str,
        from: Option<&Assignment>,
        to: Option<&Assignment>,
        f: f64,
    ) -> Option<Result<Option<Assignment>>> {
        let entry = self.entries.get(self.owner_of(kind)?)?;
        let fade = entry.hooks.fade.as_ref()?;
        Some(fade(from, to, f))
    }

    /// Route an extension-kind assignment to its owner's resolver.
    pub fn resolve(&mut self, kind: &str, assignment: &Assignment) -> Result<()> {
        let Some(owner) = self.owner_of(kind).map(str::to_string) else {
            bail!("no extension owns kind '{kind}'");
        };
        let entry = self.entries.get_mut(&owner).unwrap();
        (entry.hooks.resolve)(assignment, &mut entry.buffer)
    }

    /// Run every empty-buffer hook.
    pub fn empty_buffers(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some(empty) = entry.hooks.empty.as_mut() {
                empty(&mut entry.buffer);
            }
        }
    }

    /// Run every send-buffer hook; failures are logged, not fatal.
    pub fn send_buffers(&mut self) {
        for (key, entry) in self.entries.iter_mut() {
            if let Some(send) = entry.hooks.send.as_mut()
                && let Err(err) = send(&mut entry.buffer)
            {
                error!("extension '{key}' send hook failed: {err:#}.");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
