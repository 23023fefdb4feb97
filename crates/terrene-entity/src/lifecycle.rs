//! Lifecycle notification traits.
//!
//! The manager fans every logical mutation out to the registered
//! subscribers synchronously, in registration order, before the mutating
//! call returns. How notifications propagate further (rendering, physics,
//! network replication) is the subscribers' business.

use std::any::TypeId;

use crate::manager::EntityManager;
use crate::reference::EntityRef;

/// Whether a call site fires lifecycle notifications.
///
/// Bulk persistence load paths suppress them; everything else fires.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Events {
    #[default]
    Fire,
    Suppress,
}

impl Events {
    /// Whether notifications are fired.
    #[must_use]
    pub const fn fire(self) -> bool {
        matches!(self, Events::Fire)
    }
}

/// Subscriber to component-level change notifications.
///
/// Callbacks receive shared access to the manager, so the entity's state at
/// the moment of the mutation is readable. All methods default to no-ops.
pub trait ChangeSubscriber {
    /// A component was added to an entity.
    fn component_added(&mut self, manager: &EntityManager, entity: &EntityRef, ty: TypeId) {
        let _ = (manager, entity, ty);
    }

    /// A component was saved over an existing instance.
    fn component_changed(&mut self, manager: &EntityManager, entity: &EntityRef, ty: TypeId) {
        let _ = (manager, entity, ty);
    }

    /// A component is about to be removed; it is still readable.
    fn component_removed(&mut self, manager: &EntityManager, entity: &EntityRef, ty: TypeId) {
        let _ = (manager, entity, ty);
    }

    /// The entity is about to be deactivated for storage; its full
    /// component set is still readable.
    fn before_deactivation(&mut self, manager: &EntityManager, entity: &EntityRef) {
        let _ = (manager, entity);
    }

    /// A previously stored entity was reconstituted under its old id.
    fn reactivated(&mut self, manager: &EntityManager, entity: &EntityRef) {
        let _ = (manager, entity);
    }
}

/// Subscriber to entity destruction.
///
/// Called before components are cleared, so the entity's final state is
/// still readable through the manager.
pub trait DestroySubscriber {
    fn entity_destroyed(&mut self, manager: &EntityManager, entity: &EntityRef);
}

impl<F> DestroySubscriber for F
where
    F: FnMut(&EntityManager, &EntityRef),
{
    fn entity_destroyed(&mut self, manager: &EntityManager, entity: &EntityRef) {
        self(manager, entity);
    }
}
