//! Position book — open and closed positions plus the owner index
//!
//! A position id maps to exactly one of the open or closed sets at any
//! time and is never reused. The owner index records every position a user
//! ever opened (open and closed) until the user is deleted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::errors::EngineError;
use types::ids::{OwnerId, PositionId};
use types::position::Position;

/// Open and closed positions with an owner → position-id index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionBook {
    open: BTreeMap<PositionId, Position>,
    closed: BTreeMap<PositionId, Position>,
    by_owner: BTreeMap<OwnerId, Vec<PositionId>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly opened position.
    ///
    /// Fails if the id is already present in either set (ids are never
    /// reused).
    pub fn insert_open(&mut self, position: Position) -> Result<(), EngineError> {
        if self.open.contains_key(&position.id) || self.closed.contains_key(&position.id) {
            return Err(EngineError::Internal(format!(
                "position id reused: {}",
                position.id
            )));
        }
        self.by_owner
            .entry(position.owner.clone())
            .or_default()
            .push(position.id);
        self.open.insert(position.id, position);
        Ok(())
    }

    /// Look up an open position.
    pub fn get_open(&self, id: &PositionId) -> Option<&Position> {
        self.open.get(id)
    }

    /// Look up a closed position.
    pub fn get_closed(&self, id: &PositionId) -> Option<&Position> {
        self.closed.get(id)
    }

    /// Take a position out of the open set for closing.
    ///
    /// The caller sets the exit fields and hands it back via
    /// [`insert_closed`](Self::insert_closed).
    pub fn remove_open(&mut self, id: &PositionId) -> Option<Position> {
        self.open.remove(id)
    }

    /// File a closed position. The owner index entry already exists from
    /// when the position was opened.
    pub fn insert_closed(&mut self, position: Position) {
        debug_assert!(position.status.is_terminal());
        self.closed.insert(position.id, position);
    }

    /// Ids of every position the owner ever opened.
    pub fn owner_positions(&self, owner: &OwnerId) -> &[PositionId] {
        self.by_owner.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The owner's currently open position ids.
    pub fn open_ids_for(&self, owner: &OwnerId) -> Vec<PositionId> {
        self.owner_positions(owner)
            .iter()
            .filter(|id| self.open.contains_key(id))
            .copied()
            .collect()
    }

    /// Drop the owner index entry (account deletion). Closed positions stay
    /// in the closed set as history.
    pub fn remove_owner(&mut self, owner: &OwnerId) {
        self.by_owner.remove(owner);
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }

    /// Iterate open positions in id order.
    pub fn iter_open(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    /// Clone the sets for snapshot serialization.
    pub fn export(
        &self,
    ) -> (
        BTreeMap<PositionId, Position>,
        BTreeMap<PositionId, Position>,
        BTreeMap<OwnerId, Vec<PositionId>>,
    ) {
        (self.open.clone(), self.closed.clone(), self.by_owner.clone())
    }

    /// Replace the sets from a snapshot.
    pub fn restore(
        &mut self,
        open: BTreeMap<PositionId, Position>,
        closed: BTreeMap<PositionId, Position>,
        by_owner: BTreeMap<OwnerId, Vec<PositionId>>,
    ) {
        self.open = open;
        self.closed = closed;
        self.by_owner = by_owner;
    }
}
