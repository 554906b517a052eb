//! Presence channel: ephemeral per-client state shared in a room.
//!
//! Each client owns one entry (identity + optional selection). Entries
//! travel between processes as bincode-encoded [`AwarenessUpdate`]s;
//! every entry carries a per-client clock so stale updates are ignored,
//! and an entry without state removes the client.
//!
//! ```text
//! set_local_selection()
//!       │
//!       ▼
//! encode_local_update() ──(transport)──► apply_update()
//!                                             │
//!                                             ▼
//!                                 on_change { added, updated, removed }
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::UserInfo;
use crate::error::SyncError;
use crate::event::{Emitter, Subscription};
use crate::position::WireSelection;

pub type ClientId = u64;

/// What one client publishes about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub user: Option<UserInfo>,
    pub selection: Option<WireSelection>,
}

impl PresenceState {
    pub fn nickname(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.nickname.as_str())
    }
}

/// Client ids affected by one change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceChange {
    pub added: Vec<ClientId>,
    pub updated: Vec<ClientId>,
    pub removed: Vec<ClientId>,
}

impl PresenceChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// One client's entry on the wire. `state: None` means the client left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessEntry {
    pub client_id: ClientId,
    pub clock: u64,
    pub state: Option<PresenceState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub entries: Vec<AwarenessEntry>,
}

impl AwarenessUpdate {
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| SyncError::Presence(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        let (update, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| SyncError::Presence(e.to_string()))?;
        Ok(update)
    }
}

struct ClientEntry {
    clock: u64,
    state: PresenceState,
}

pub struct Awareness {
    local_id: ClientId,
    local_clock: RefCell<u64>,
    states: RefCell<BTreeMap<ClientId, ClientEntry>>,
    // Clocks of clients that left, so late updates cannot resurrect them.
    departed: RefCell<BTreeMap<ClientId, u64>>,
    changed: Emitter<PresenceChange>,
}

impl Awareness {
    pub fn new(local_id: ClientId) -> Self {
        Self {
            local_id,
            local_clock: RefCell::new(0),
            states: RefCell::new(BTreeMap::new()),
            departed: RefCell::new(BTreeMap::new()),
            changed: Emitter::new(),
        }
    }

    pub fn local_id(&self) -> ClientId {
        self.local_id
    }

    pub fn local_state(&self) -> Option<PresenceState> {
        self.states
            .borrow()
            .get(&self.local_id)
            .map(|e| e.state.clone())
    }

    pub fn set_local_user(&self, user: UserInfo) {
        self.update_local(|state| state.user = Some(user));
    }

    pub fn set_local_selection(&self, selection: Option<WireSelection>) {
        self.update_local(|state| state.selection = selection);
    }

    fn update_local(&self, f: impl FnOnce(&mut PresenceState)) {
        let clock = {
            let mut clock = self.local_clock.borrow_mut();
            *clock += 1;
            *clock
        };
        let change = {
            let mut states = self.states.borrow_mut();
            match states.get_mut(&self.local_id) {
                Some(entry) => {
                    let before = entry.state.clone();
                    f(&mut entry.state);
                    entry.clock = clock;
                    if entry.state == before {
                        PresenceChange::default()
                    } else {
                        PresenceChange {
                            updated: vec![self.local_id],
                            ..PresenceChange::default()
                        }
                    }
                }
                None => {
                    let mut state = PresenceState::default();
                    f(&mut state);
                    states.insert(self.local_id, ClientEntry { clock, state });
                    PresenceChange {
                        added: vec![self.local_id],
                        ..PresenceChange::default()
                    }
                }
            }
        };
        if !change.is_empty() {
            self.changed.emit(&change);
        }
    }

    /// Snapshot of every known client, ordered by client id.
    pub fn states(&self) -> Vec<(ClientId, PresenceState)> {
        self.states
            .borrow()
            .iter()
            .map(|(id, e)| (*id, e.state.clone()))
            .collect()
    }

    pub fn state(&self, client_id: ClientId) -> Option<PresenceState> {
        self.states.borrow().get(&client_id).map(|e| e.state.clone())
    }

    pub fn on_change(&self, listener: impl Fn(&PresenceChange) + 'static) -> Subscription {
        self.changed.subscribe(listener)
    }

    /// Encode the given clients' entries. Unknown ids are skipped.
    pub fn encode_update(&self, clients: &[ClientId]) -> Result<Vec<u8>, SyncError> {
        let states = self.states.borrow();
        let entries = clients
            .iter()
            .filter_map(|id| {
                states.get(id).map(|e| AwarenessEntry {
                    client_id: *id,
                    clock: e.clock,
                    state: Some(e.state.clone()),
                })
            })
            .collect();
        AwarenessUpdate { entries }.encode()
    }

    pub fn encode_local_update(&self) -> Result<Vec<u8>, SyncError> {
        self.encode_update(&[self.local_id])
    }

    /// Announce that this client is leaving.
    pub fn encode_departure(&self) -> Result<Vec<u8>, SyncError> {
        let clock = *self.local_clock.borrow() + 1;
        AwarenessUpdate {
            entries: vec![AwarenessEntry {
                client_id: self.local_id,
                clock,
                state: None,
            }],
        }
        .encode()
    }

    /// Merge an update received from another client.
    pub fn apply_update(&self, bytes: &[u8]) -> Result<PresenceChange, SyncError> {
        let update = AwarenessUpdate::decode(bytes)?;
        let mut change = PresenceChange::default();
        {
            let mut states = self.states.borrow_mut();
            let mut departed = self.departed.borrow_mut();
            for entry in update.entries {
                if entry.client_id == self.local_id {
                    continue;
                }
                let known_clock = states
                    .get(&entry.client_id)
                    .map(|e| e.clock)
                    .or_else(|| departed.get(&entry.client_id).copied());
                if known_clock.is_some_and(|clock| entry.clock <= clock) {
                    continue;
                }

                match entry.state {
                    Some(state) => {
                        departed.remove(&entry.client_id);
                        let previous = states.insert(
                            entry.client_id,
                            ClientEntry {
                                clock: entry.clock,
                                state: state.clone(),
                            },
                        );
                        match previous {
                            None => change.added.push(entry.client_id),
                            Some(prev) if prev.state != state => change.updated.push(entry.client_id),
                            Some(_) => {}
                        }
                    }
                    None => {
                        departed.insert(entry.client_id, entry.clock);
                        if states.remove(&entry.client_id).is_some() {
                            change.removed.push(entry.client_id);
                        }
                    }
                }
            }
        }
        if !change.is_empty() {
            self.changed.emit(&change);
        }
        Ok(change)
    }

    /// Drop clients whose connection is gone.
    pub fn remove_clients(&self, clients: &[ClientId]) -> PresenceChange {
        let mut change = PresenceChange::default();
        {
            let mut states = self.states.borrow_mut();
            let mut departed = self.departed.borrow_mut();
            for id in clients {
                if *id == self.local_id {
                    continue;
                }
                if let Some(entry) = states.remove(id) {
                    departed.insert(*id, entry.clock);
                    change.removed.push(*id);
                }
            }
        }
        if !change.is_empty() {
            self.changed.emit(&change);
        }
        change
    }
}
