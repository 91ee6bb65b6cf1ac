//! SSRC → (participant, role) routing
//!
//! Mappings come from the server and are authoritative (last write wins).
//! Screen roles fall back to attribution by watch state, because the
//! forwarding server may rewrite their SSRC in transit.

use crate::role::{ParticipantId, StreamRole};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Where a mapping came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingSource {
    /// Pushed by the server
    Server,
    /// Inferred locally from watch state
    Inferred,
}

/// One SSRC mapping entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrcMapping {
    /// Participant owning the stream
    pub participant: ParticipantId,
    /// Role of the stream
    pub role: StreamRole,
    /// Origin of the mapping
    pub source: MappingSource,
}

/// Server-pushed mapping tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingUpdate {
    /// Wire SSRC
    pub ssrc: u32,
    /// Participant owning the stream
    pub participant: ParticipantId,
    /// Role of the stream
    pub role: StreamRole,
}

/// Concurrent SSRC routing table
#[derive(Debug, Default)]
pub struct SsrcRouter {
    by_ssrc: DashMap<u32, SsrcMapping>,
    // writers serialize on this index so both directions stay consistent
    by_stream: Mutex<HashMap<(ParticipantId, StreamRole), u32>>,
    watched: RwLock<BTreeSet<ParticipantId>>,
}

impl SsrcRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an authoritative mapping from the server
    pub fn observe_mapping(&self, ssrc: u32, participant: ParticipantId, role: StreamRole) {
        self.insert(ssrc, participant, role, MappingSource::Server);
    }

    /// Record a batch of server mappings in order
    pub fn observe_batch<I>(&self, updates: I)
    where
        I: IntoIterator<Item = MappingUpdate>,
    {
        for update in updates {
            self.observe_mapping(update.ssrc, update.participant, update.role);
        }
    }

    fn insert(&self, ssrc: u32, participant: ParticipantId, role: StreamRole, source: MappingSource) {
        let mut by_stream = self.by_stream.lock();

        // the SSRC may have belonged to another stream
        if let Some(prev) = self.by_ssrc.get(&ssrc).map(|m| m.clone()) {
            if prev.participant != participant || prev.role != role {
                by_stream.remove(&(prev.participant, prev.role));
            }
        }
        // the stream may have had another SSRC
        if let Some(old_ssrc) = by_stream.insert((participant.clone(), role), ssrc) {
            if old_ssrc != ssrc {
                self.by_ssrc.remove(&old_ssrc);
            }
        }

        debug!("ssrc {} -> {} ({}, {:?})", ssrc, participant, role, source);
        self.by_ssrc.insert(
            ssrc,
            SsrcMapping {
                participant,
                role,
                source,
            },
        );
    }

    /// Resolve the participant sending on `ssrc` for a stream of the given role
    pub fn resolve(&self, ssrc: u32, role: StreamRole) -> Option<ParticipantId> {
        if let Some(mapping) = self.by_ssrc.get(&ssrc) {
            return Some(mapping.participant.clone());
        }
        if !role.is_screen() {
            return None;
        }

        let watched = self.watched.read();
        match watched.len() {
            0 => None,
            1 => {
                let participant = watched.iter().next()?.clone();
                drop(watched);
                self.insert(ssrc, participant.clone(), role, MappingSource::Inferred);
                Some(participant)
            }
            n => {
                // degraded: attribution is arbitrary while several shares are watched
                let participant = watched.iter().next()?.clone();
                warn!(
                    "unmapped {} ssrc {} with {} shares watched, attributing to {}",
                    role, ssrc, n, participant
                );
                Some(participant)
            }
        }
    }

    /// Full mapping entry for an SSRC
    pub fn mapping(&self, ssrc: u32) -> Option<SsrcMapping> {
        self.by_ssrc.get(&ssrc).map(|m| m.clone())
    }

    /// Current SSRC of a participant's stream
    pub fn ssrc_for(&self, participant: &ParticipantId, role: StreamRole) -> Option<u32> {
        self.by_stream.lock().get(&(participant.clone(), role)).copied()
    }

    /// Mark a participant's screen share as watched
    pub fn start_watching(&self, participant: ParticipantId) {
        self.watched.write().insert(participant);
    }

    /// Stop watching a participant's screen share
    ///
    /// Mappings inferred from watch state are dropped with it; server
    /// mappings stay.
    pub fn stop_watching(&self, participant: &ParticipantId) {
        let mut by_stream = self.by_stream.lock();
        by_stream.retain(|(p, _), ssrc| {
            let inferred = p == participant
                && self
                    .by_ssrc
                    .get(ssrc)
                    .map_or(false, |m| m.source == MappingSource::Inferred);
            if inferred {
                self.by_ssrc.remove(ssrc);
            }
            !inferred
        });
        self.by_ssrc
            .retain(|_, m| !(&m.participant == participant && m.source == MappingSource::Inferred));
        self.watched.write().remove(participant);
    }

    /// Whether a participant's screen share is watched
    pub fn is_watching(&self, participant: &ParticipantId) -> bool {
        self.watched.read().contains(participant)
    }

    /// Whether any screen share is watched
    pub fn is_watching_any(&self) -> bool {
        !self.watched.read().is_empty()
    }

    /// Participants whose screen share is watched
    pub fn watched(&self) -> Vec<ParticipantId> {
        self.watched.read().iter().cloned().collect()
    }

    /// Remove every mapping and watch entry of a departing participant
    pub fn purge_participant(&self, participant: &ParticipantId) {
        let mut by_stream = self.by_stream.lock();
        by_stream.retain(|(p, _), ssrc| {
            if p == participant {
                self.by_ssrc.remove(ssrc);
                false
            } else {
                true
            }
        });
        self.by_ssrc.retain(|_, m| &m.participant != participant);
        self.watched.write().remove(participant);
    }

    /// Drop all state
    pub fn clear(&self) {
        let mut by_stream = self.by_stream.lock();
        by_stream.clear();
        self.by_ssrc.clear();
        self.watched.write().clear();
    }

    /// Number of known SSRCs
    pub fn len(&self) -> usize {
        self.by_ssrc.len()
    }

    /// Whether no SSRC is known
    pub fn is_empty(&self) -> bool {
        self.by_ssrc.is_empty()
    }
}
