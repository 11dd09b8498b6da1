//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Lists of entities held by the client are replaced wholesale on
/// reconciliation, so identity is the only thing callers can rely on between
/// snapshots.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Position of the entity with `id` in `items`, if present.
pub fn position_of<E: Entity>(items: &[E], id: &E::Id) -> Option<usize> {
    items.iter().position(|item| item.id() == id)
}
