//! Index of the outstanding queries by identity.
use std::collections::HashMap;

use log::{debug, trace};

use crate::extractor::{extract, extract_segment, Candidate, Origin, Segment};
use crate::models::{Identity, SegmentKey};
use crate::packet::Packet;

struct Entry<T> {
    segment_key: Option<SegmentKey>,
    value: T,
}

/// Outstanding entries keyed by probe identity.
///
/// At most one entry is registered per identity. Entries of TCP-style
/// queries are also indexed by the key of their direct reply.
pub struct Matcher<T> {
    outstanding: HashMap<Identity, Entry<T>>,
    segments: HashMap<SegmentKey, Vec<Identity>>,
}

impl<T> Matcher<T> {
    pub fn new() -> Self {
        Matcher {
            outstanding: HashMap::new(),
            segments: HashMap::new(),
        }
    }

    /// Register `value` under `identity`, and under `segment_key` for direct
    /// TCP replies.
    ///
    /// # Panics
    ///
    /// Panics if another entry is already registered under `identity`.
    pub fn register(&mut self, identity: Identity, segment_key: Option<SegmentKey>, value: T) {
        if self.outstanding.contains_key(&identity) {
            panic!("a query is already outstanding for {}", identity);
        }
        if let Some(key) = segment_key {
            self.segments.entry(key).or_default().push(identity);
        }
        self.outstanding.insert(identity, Entry { segment_key, value });
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.outstanding.contains_key(identity)
    }

    pub fn get_mut(&mut self, identity: &Identity) -> Option<&mut T> {
        self.outstanding
            .get_mut(identity)
            .map(|entry| &mut entry.value)
    }

    pub fn remove(&mut self, identity: &Identity) -> Option<T> {
        let entry = self.outstanding.remove(identity)?;
        if let Some(key) = entry.segment_key {
            if let Some(identities) = self.segments.get_mut(&key) {
                identities.retain(|other| other != identity);
                if identities.is_empty() {
                    self.segments.remove(&key);
                }
            }
        }
        Some(entry.value)
    }

    /// Remove and return the entry answered by `packet`, if any.
    pub fn resolve(&mut self, packet: &Packet) -> Option<(Candidate, T)> {
        let candidate = match extract_segment(packet) {
            Some(segment) => self.segment_candidate(&segment)?,
            None => extract(packet)?,
        };
        match self.remove(&candidate.identity) {
            Some(value) => Some((candidate, value)),
            None => {
                trace!("no outstanding query for {}", candidate.identity);
                None
            }
        }
    }

    /// The identity answered by a direct TCP reply.
    ///
    /// A reply that refers to several outstanding queries answers none of
    /// them. These queries can still be answered by ICMP errors.
    fn segment_candidate(&self, segment: &Segment) -> Option<Candidate> {
        match self.segments.get(&segment.key).map(Vec::as_slice) {
            Some([identity]) => Some(Candidate {
                identity: *identity,
                responder: segment.responder,
                origin: Origin::Direct,
            }),
            Some(identities) => {
                debug!(
                    "ambiguous reply {} for {} queries",
                    segment.key,
                    identities.len()
                );
                None
            }
            None => {
                trace!("no outstanding query for {}", segment.key);
                None
            }
        }
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<(Identity, T)> {
        self.segments.clear();
        self.outstanding
            .drain()
            .map(|(identity, entry)| (identity, entry.value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

impl<T> Default for Matcher<T> {
    fn default() -> Self {
        Self::new()
    }
}
