//! Contains common, primitive types shared across the crate.
//!
//! Subscribers of a shared run are identified by generational keys so that a
//! stale token can never address a subscriber that attached later.

use slotmap::new_key_type;

new_key_type! {
    /// Uniquely and safely identifies a subscriber attached to a shared run.
    ///
    /// The key is handed out when a consumer attaches and is revoked when it
    /// detaches. A revoked key is never reused for a different subscriber, so
    /// delivery through an old token is impossible.
    pub struct SubscriberId;
}

/// Identifies one run started from a `Countdown` or any of its clones.
///
/// Ids are handed out in start order and never repeat for the same family of
/// clones, so lifecycle listeners can tell concurrent runs apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);
