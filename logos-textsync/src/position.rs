//! Positions that survive concurrent edits.
//!
//! A [`RelativePosition`] pins a location to the CRDT item next to it
//! rather than to an integer offset, so it still points between the same
//! two characters after other clients insert or delete around it. Each
//! position is tagged with its resource and only resolves against that
//! resource's text.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::StickyIndex;

use crate::error::SyncError;
use crate::surface::SelectionDirection;

#[derive(Clone)]
pub struct RelativePosition {
    resource: Arc<str>,
    index: StickyIndex,
}

impl RelativePosition {
    pub(crate) fn new(resource: Arc<str>, index: StickyIndex) -> Self {
        Self { resource, index }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub(crate) fn sticky_index(&self) -> &StickyIndex {
        &self.index
    }

    /// Encode for the presence channel.
    pub fn to_wire(&self) -> WirePosition {
        WirePosition {
            resource: self.resource.to_string(),
            index: self.index.encode_v1(),
        }
    }

    pub fn from_wire(wire: &WirePosition) -> Result<Self, SyncError> {
        let index = StickyIndex::decode_v1(&wire.index)?;
        Ok(Self::new(Arc::from(wire.resource.as_str()), index))
    }
}

impl fmt::Debug for RelativePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelativePosition")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// A selection captured as relative positions, restored after a
/// transaction has shifted absolute offsets.
#[derive(Debug, Clone)]
pub struct RelativeSelection {
    pub start: RelativePosition,
    pub end: RelativePosition,
    pub direction: SelectionDirection,
}

/// Serialized [`RelativePosition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePosition {
    pub resource: String,
    pub index: Vec<u8>,
}

/// A client's selection as published on the presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSelection {
    pub anchor: WirePosition,
    pub head: WirePosition,
}
