//! Conference matching: can an existing room serve a new request?
//!
//! Every check is skipped when the corresponding wanted field is empty, so a
//! fully empty description matches anything.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::params::{Backend, RoomParameters};

/// Data a room exposes for matching.
pub trait MatchCandidate {
    fn params(&self) -> Option<&RoomParameters>;
    fn local_address(&self) -> Option<&Address>;
    fn remote_address(&self) -> Option<&Address>;
    fn participants(&self) -> &[Address];
}

/// A wanted (or existing) conference description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConferenceDescription {
    pub params: Option<RoomParameters>,
    pub local_address: Option<Address>,
    pub remote_address: Option<Address>,
    pub participants: Vec<Address>,
}

impl MatchCandidate for ConferenceDescription {
    fn params(&self) -> Option<&RoomParameters> {
        self.params.as_ref()
    }

    fn local_address(&self) -> Option<&Address> {
        self.local_address.as_ref()
    }

    fn remote_address(&self) -> Option<&Address> {
        self.remote_address.as_ref()
    }

    fn participants(&self) -> &[Address] {
        &self.participants
    }
}

/// First check that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    LocalAddress,
    RemoteAddress,
    MissingParams,
    Media,
    SecurityLevel,
    Subject,
    LocalParticipant,
    Backend,
    Group,
    Encryption,
    ParticipantCount,
    Participant,
}

fn same_address(wanted: &Address, candidate: Option<&Address>) -> bool {
    candidate.is_some_and(|c| c.canonical() == wanted.canonical())
}

fn params_mismatch(wanted: &RoomParameters, candidate: &RoomParameters) -> Option<Mismatch> {
    if wanted.audio_enabled != candidate.audio_enabled
        || wanted.video_enabled != candidate.video_enabled
        || wanted.chat_enabled != candidate.chat_enabled
    {
        return Some(Mismatch::Media);
    }
    if wanted.security_level != candidate.security_level {
        return Some(Mismatch::SecurityLevel);
    }

    let has_media = wanted.audio_enabled
        || wanted.video_enabled
        || candidate.audio_enabled
        || candidate.video_enabled;
    if has_media {
        if !wanted.subject.is_empty() && wanted.subject != candidate.subject {
            return Some(Mismatch::Subject);
        }
        if wanted.local_participant_enabled != candidate.local_participant_enabled {
            return Some(Mismatch::LocalParticipant);
        }
    }

    if wanted.chat_enabled {
        if wanted.backend() != candidate.backend() {
            return Some(Mismatch::Backend);
        }
        if wanted.group != candidate.group {
            return Some(Mismatch::Group);
        }
        if wanted.group && candidate.backend() == Backend::Basic {
            return Some(Mismatch::Backend);
        }
        if wanted.is_encrypted() != candidate.is_encrypted() {
            return Some(Mismatch::Encryption);
        }
        if wanted.group
            && candidate.backend() == Backend::RoomBackend
            && !wanted.subject.is_empty()
            && !candidate.subject.is_empty()
            && wanted.subject != candidate.subject
        {
            return Some(Mismatch::Subject);
        }
    }

    None
}

/// The first reason `candidate` cannot serve `wanted`, if any.
pub fn mismatch<C: MatchCandidate + ?Sized>(
    wanted: &ConferenceDescription,
    candidate: &C,
) -> Option<Mismatch> {
    if let Some(local) = &wanted.local_address {
        if !same_address(local, candidate.local_address()) {
            return Some(Mismatch::LocalAddress);
        }
    }
    if let Some(remote) = &wanted.remote_address {
        if !same_address(remote, candidate.remote_address()) {
            return Some(Mismatch::RemoteAddress);
        }
    }
    if let Some(params) = &wanted.params {
        let Some(candidate_params) = candidate.params() else {
            return Some(Mismatch::MissingParams);
        };
        if let Some(reason) = params_mismatch(params, candidate_params) {
            return Some(reason);
        }
    }
    if !wanted.participants.is_empty() {
        let existing = candidate.participants();
        if existing.len() != wanted.participants.len() {
            return Some(Mismatch::ParticipantCount);
        }
        let all_found = wanted
            .participants
            .iter()
            .all(|w| existing.iter().any(|c| c.weak_equal(w)));
        if !all_found {
            return Some(Mismatch::Participant);
        }
    }
    None
}

/// Whether `candidate` can be reused for `wanted`.
pub fn matches<C: MatchCandidate + ?Sized>(wanted: &ConferenceDescription, candidate: &C) -> bool {
    match mismatch(wanted, candidate) {
        None => true,
        Some(reason) => {
            tracing::trace!(?reason, "conference does not match");
            false
        }
    }
}

/// First candidate that can be reused for `wanted`.
pub fn find_reusable<'a, C, I>(wanted: &ConferenceDescription, candidates: I) -> Option<&'a C>
where
    C: MatchCandidate + 'a,
    I: IntoIterator<Item = &'a C>,
{
    candidates.into_iter().find(|c| matches(wanted, *c))
}
