//! Prefab templates.
//!
//! A prefab is a named, immutable-once-published template: an ordered set
//! of components plus an optional parent prefab. Its effective component
//! set is the parent's set overridden and extended by its own, minus the
//! names it explicitly removes. [`PrefabData`] is the mutable
//! pre-publication form; the codec layers delta records onto it before it
//! is published into the [`PrefabRegistry`].

use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;
use thiserror::Error;

use crate::component::Component;

/// Prefab registration failure.
#[derive(Debug, Error)]
pub enum PrefabError {
    /// A prefab with this name is already published.
    #[error("prefab already exists: {0}")]
    AlreadyExists(String),

    /// The declared parent is not published yet.
    #[error("prefab {prefab} references missing parent {parent}")]
    MissingParent { prefab: String, parent: String },
}

/// A published, immutable prefab.
pub struct Prefab {
    name: String,
    parent: Option<Rc<Prefab>>,
    persisted: bool,
    always_relevant: bool,
    components: Vec<Box<dyn Component>>,
    removed: Vec<String>,
}

impl Prefab {
    /// The prefab's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parent prefab, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Rc<Prefab>> {
        self.parent.as_ref()
    }

    /// Whether instances derived from this prefab are persisted.
    #[must_use]
    pub const fn persisted(&self) -> bool {
        self.persisted
    }

    /// Whether instances are replicated regardless of distance.
    #[must_use]
    pub const fn always_relevant(&self) -> bool {
        self.always_relevant
    }

    /// The prefab's own components, in template order.
    pub fn own_components(&self) -> impl Iterator<Item = &dyn Component> {
        self.components.iter().map(|c| &**c)
    }

    /// Component names removed relative to the parent.
    #[must_use]
    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    /// Resolve one component by type name through the parent chain.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&dyn Component> {
        if let Some(own) = self.components.iter().find(|c| c.type_name() == name) {
            return Some(&**own);
        }
        if self.removed.iter().any(|r| r == name) {
            return None;
        }
        self.parent.as_ref()?.component(name)
    }

    /// Whether the effective set contains the named component.
    #[must_use]
    pub fn has_component(&self, name: &str) -> bool {
        self.component(name).is_some()
    }

    /// The effective component set: parent components not overridden or
    /// removed here, followed by this prefab's own.
    #[must_use]
    pub fn components(&self) -> Vec<&dyn Component> {
        let mut out: Vec<&dyn Component> = Vec::new();
        if let Some(parent) = &self.parent {
            for component in parent.components() {
                let name = component.type_name();
                if self.removed.iter().any(|r| r == name) {
                    continue;
                }
                if self.components.iter().any(|own| own.type_name() == name) {
                    continue;
                }
                out.push(component);
            }
        }
        out.extend(self.components.iter().map(|c| &**c));
        out
    }
}

impl fmt::Debug for Prefab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefab")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("own_components", &self.components.len())
            .finish()
    }
}

/// The mutable pre-publication form of a prefab.
#[derive(Default)]
pub struct PrefabData {
    name: String,
    parent: Option<String>,
    persisted: bool,
    always_relevant: bool,
    components: Vec<Box<dyn Component>>,
    removed: Vec<String>,
}

impl PrefabData {
    /// Start a template with the given name. Persisted by default.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persisted: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn set_parent(&mut self, parent: Option<String>) {
        self.parent = parent;
    }

    #[must_use]
    pub const fn persisted(&self) -> bool {
        self.persisted
    }

    pub fn set_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }

    #[must_use]
    pub const fn always_relevant(&self) -> bool {
        self.always_relevant
    }

    pub fn set_always_relevant(&mut self, relevant: bool) {
        self.always_relevant = relevant;
    }

    /// Set or replace a component, keeping the position of an existing one
    /// with the same type name. Un-removes the name if it was removed.
    pub fn set_component(&mut self, component: Box<dyn Component>) {
        let name = component.type_name();
        self.removed.retain(|r| r != name);
        match self.components.iter().position(|c| c.type_name() == name) {
            Some(index) => self.components[index] = component,
            None => self.components.push(component),
        }
    }

    /// Read an own component by type name.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&dyn Component> {
        self.components
            .iter()
            .find(|c| c.type_name() == name)
            .map(|c| &**c)
    }

    /// Mutable access to an own component by type name.
    pub fn component_mut(&mut self, name: &str) -> Option<&mut (dyn Component + 'static)> {
        self.components
            .iter_mut()
            .find(|c| c.type_name() == name)
            .map(|c| &mut **c)
    }

    /// Drop an own component and mark the name removed relative to the
    /// parent.
    pub fn remove_component(&mut self, name: &str) {
        self.components.retain(|c| c.type_name() != name);
        if !self.removed.iter().any(|r| r == name) {
            self.removed.push(name.to_owned());
        }
    }

    /// The template's own components.
    pub fn components(&self) -> impl Iterator<Item = &dyn Component> {
        self.components.iter().map(|c| &**c)
    }

    /// Names removed relative to the parent.
    #[must_use]
    pub fn removed(&self) -> &[String] {
        &self.removed
    }
}

impl fmt::Debug for PrefabData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefabData")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("components", &self.components.len())
            .finish()
    }
}

/// Registry of published prefabs, by name.
#[derive(Default)]
pub struct PrefabRegistry {
    prefabs: HashMap<String, Rc<Prefab>>,
    order: Vec<String>,
}

impl PrefabRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a template, resolving its parent by name. The prefab is
    /// immutable afterwards.
    pub fn publish(&mut self, data: PrefabData) -> Result<Rc<Prefab>, PrefabError> {
        if self.prefabs.contains_key(&data.name) {
            return Err(PrefabError::AlreadyExists(data.name));
        }
        let parent = match &data.parent {
            Some(parent_name) => Some(self.prefabs.get(parent_name).cloned().ok_or_else(|| {
                PrefabError::MissingParent {
                    prefab: data.name.clone(),
                    parent: parent_name.clone(),
                }
            })?),
            None => None,
        };
        let prefab = Rc::new(Prefab {
            name: data.name.clone(),
            parent,
            persisted: data.persisted,
            always_relevant: data.always_relevant,
            components: data.components,
            removed: data.removed,
        });
        self.order.push(data.name.clone());
        self.prefabs.insert(data.name, Rc::clone(&prefab));
        Ok(prefab)
    }

    /// Look up a prefab by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rc<Prefab>> {
        self.prefabs.get(name).cloned()
    }

    /// Whether the name is published.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.prefabs.contains_key(name)
    }

    /// Iterate prefabs in publication order.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<Prefab>> {
        self.order.iter().filter_map(|name| self.prefabs.get(name))
    }

    /// Number of published prefabs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    /// Whether no prefab is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }
}

impl fmt::Debug for PrefabRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefabRegistry")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrene_entity_derive::Component;

    #[derive(Component, Clone, Default, PartialEq, Debug)]
    struct Health {
        value: i32,
    }

    #[derive(Component, Clone, Default, PartialEq, Debug)]
    struct Burnable {
        fuel: i32,
    }

    fn publish(registry: &mut PrefabRegistry, data: PrefabData) -> Rc<Prefab> {
        registry.publish(data).unwrap()
    }

    #[test]
    fn parent_chain_resolution() {
        let mut registry = PrefabRegistry::new();

        let mut base = PrefabData::new("base");
        base.set_component(Box::new(Health { value: 100 }));
        base.set_component(Box::new(Burnable { fuel: 10 }));
        publish(&mut registry, base);

        let mut child = PrefabData::new("child");
        child.set_parent(Some("base".into()));
        child.set_component(Box::new(Health { value: 40 }));
        child.remove_component("Burnable");
        let child = publish(&mut registry, child);

        // own component overrides the parent's
        let health = child.component("Health").unwrap();
        assert_eq!(health.downcast_ref::<Health>().unwrap().value, 40);

        // removed names suppress the parent's
        assert!(!child.has_component("Burnable"));

        let effective = child.components();
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].type_name(), "Health");
    }

    #[test]
    fn missing_parent_is_an_error() {
        let mut registry = PrefabRegistry::new();
        let mut orphan = PrefabData::new("orphan");
        orphan.set_parent(Some("nowhere".into()));
        assert!(matches!(
            registry.publish(orphan),
            Err(PrefabError::MissingParent { .. })
        ));
    }

    #[test]
    fn duplicate_name_is_an_error() {
        let mut registry = PrefabRegistry::new();
        publish(&mut registry, PrefabData::new("tree"));
        assert!(matches!(
            registry.publish(PrefabData::new("tree")),
            Err(PrefabError::AlreadyExists(_))
        ));
    }

    #[test]
    fn set_component_unremoves() {
        let mut data = PrefabData::new("p");
        data.remove_component("Health");
        assert_eq!(data.removed(), &["Health".to_owned()]);
        data.set_component(Box::new(Health { value: 1 }));
        assert!(data.removed().is_empty());
        assert!(data.component("Health").is_some());
    }
}
