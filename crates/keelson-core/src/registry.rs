use crate::feature::Feature;
use crate::ServerError;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;

/// Non-owning handle to a registered feature.
///
/// Borrow-checking is dynamic: the driver holds a mutable borrow of the
/// feature whose hook is currently running, so a feature may freely resolve
/// and access its peers from inside a hook, but not itself.
pub struct FeatureRef<'a> {
    cell: &'a RefCell<Box<dyn Feature>>,
}

impl<'a> FeatureRef<'a> {
    pub fn get(&self) -> Ref<'a, dyn Feature> {
        Ref::map(self.cell.borrow(), |f| f.as_ref())
    }

    pub fn get_mut(&self) -> RefMut<'a, dyn Feature> {
        RefMut::map(self.cell.borrow_mut(), |f| f.as_mut())
    }

    pub fn is_enabled(&self) -> bool {
        self.get().info().is_enabled()
    }
}

/// Insertion-ordered mapping from feature name to the exclusively-owned
/// feature instance. Iteration order is the registration order, which makes
/// the resolver's output deterministic for identical inputs.
#[derive(Default)]
pub struct FeatureRegistry {
    slots: Vec<FeatureSlot>,
    index: HashMap<String, usize>,
}

struct FeatureSlot {
    name: String,
    cell: RefCell<Box<dyn Feature>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a feature. A name collision is an error; the
    /// registry is the single owner of every feature for the process
    /// lifetime.
    pub fn add(&mut self, feature: Box<dyn Feature>) -> Result<(), ServerError> {
        let name = feature.info().name().to_owned();
        if self.index.contains_key(&name) {
            return Err(ServerError::DuplicateFeature(name));
        }
        self.index.insert(name.clone(), self.slots.len());
        self.slots.push(FeatureSlot {
            name,
            cell: RefCell::new(feature),
        });
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Result<FeatureRef<'_>, ServerError> {
        self.try_lookup(name)
            .ok_or_else(|| ServerError::UnknownFeature(name.to_owned()))
    }

    pub fn try_lookup(&self, name: &str) -> Option<FeatureRef<'_>> {
        self.index
            .get(name)
            .map(|&idx| FeatureRef {
                cell: &self.slots[idx].cell,
            })
    }

    /// Like `lookup`, but additionally fails when the feature is disabled.
    pub fn lookup_enabled(&self, name: &str) -> Result<FeatureRef<'_>, ServerError> {
        let feature = self.lookup(name)?;
        if !feature.is_enabled() {
            return Err(ServerError::FeatureNotEnabled(name.to_owned()));
        }
        Ok(feature)
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool, ServerError> {
        Ok(self.lookup(name)?.is_enabled())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run a callback over the features, optionally restricted to enabled
    /// ones. The visiting order is unspecified; callers must not rely on it.
    pub fn apply(&self, enabled_only: bool, mut callback: impl FnMut(&mut dyn Feature)) {
        for slot in &self.slots {
            let mut feature = slot.cell.borrow_mut();
            if !enabled_only || feature.info().is_enabled() {
                callback(feature.as_mut());
            }
        }
    }

    /// Disable the named features. Unknown names are tolerated.
    pub fn disable(&self, names: &[&str]) {
        for name in names {
            if let Some(feature) = self.try_lookup(name) {
                feature.get_mut().info_mut().disable();
            }
        }
    }

    /// Force-disable the named features (sticky). Unknown names are
    /// tolerated.
    pub fn force_disable(&self, names: &[&str]) {
        for name in names {
            if let Some(feature) = self.try_lookup(name) {
                feature.get_mut().info_mut().force_disable();
            }
        }
    }

    pub(crate) fn cell(&self, idx: usize) -> &RefCell<Box<dyn Feature>> {
        &self.slots[idx].cell
    }

    pub(crate) fn name_at(&self, idx: usize) -> &str {
        &self.slots[idx].name
    }
}

impl Drop for FeatureRegistry {
    fn drop(&mut self) {
        // features are destroyed in reverse registration order
        while self.slots.pop().is_some() {}
    }
}
