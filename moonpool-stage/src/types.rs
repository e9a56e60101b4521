//! Core addressing types.
//!
//! These types identify the target of an invocation independently of the
//! node hosting it. The transport layer carries them opaquely; only the
//! execution layer interprets them.
//!
//! # Design
//!
//! - `ActorType` is a u64 derived from the interface/trait name.
//! - `RemoteReference` is `ActorType` + a string key + a `ReferenceKind`.
//! - `ReferenceKind::Actor` references are virtual actors: they exist
//!   conceptually always and are activated on the first invocation.
//! - `ReferenceKind::Observer` references are plain addressable objects
//!   (callbacks, client-side observers). They are never activated by the
//!   execution layer and must be resolved by forwarding.
//! - `MethodId` is the method discriminant within an actor type.
//!
//! # Orleans Reference
//!
//! `RemoteReference` plays the role of Orleans' `GrainReference`: equality
//! and hashing are by value, so two references built independently for the
//! same key are interchangeable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies an actor TYPE, derived from the trait/interface name.
///
/// # Convention
///
/// Use a hex constant matching the interface ID pattern:
/// ```rust
/// use moonpool_stage::ActorType;
/// const BANK_ACCOUNT: ActorType = ActorType(0xBA4E_4B00);
/// ```
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct ActorType(pub u64);

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Method discriminant within an actor type (1, 2, 3, …).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Debug)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a reference denotes a virtual actor or a plain addressable object.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub enum ReferenceKind {
    /// A virtual actor, activated on demand.
    Actor,
    /// A non-activatable addressable object (observer).
    Observer,
}

/// Location-independent identity of an invocation target.
///
/// # Examples
///
/// ```rust
/// use moonpool_stage::{ActorType, RemoteReference};
///
/// let player = RemoteReference::actor(ActorType(0x504C_4159), "player-42");
/// assert!(player.is_actor());
/// assert_eq!(player, RemoteReference::actor(ActorType(0x504C_4159), "player-42"));
/// ```
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct RemoteReference {
    actor_type: ActorType,
    key: String,
    kind: ReferenceKind,
}

impl RemoteReference {
    /// Create a reference to a virtual actor.
    pub fn actor(actor_type: ActorType, key: impl Into<String>) -> Self {
        Self {
            actor_type,
            key: key.into(),
            kind: ReferenceKind::Actor,
        }
    }

    /// Create a reference to a non-activatable observer object.
    pub fn observer(actor_type: ActorType, key: impl Into<String>) -> Self {
        Self {
            actor_type,
            key: key.into(),
            kind: ReferenceKind::Observer,
        }
    }

    /// The interface type of the target.
    pub fn actor_type(&self) -> ActorType {
        self.actor_type
    }

    /// The instance key (e.g., "player-42").
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The reference kind.
    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    /// True when the reference denotes a virtual actor that can be
    /// activated on demand.
    pub fn is_actor(&self) -> bool {
        self.kind == ReferenceKind::Actor
    }
}

impl fmt::Display for RemoteReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ReferenceKind::Actor => write!(f, "{}/{}", self.actor_type, self.key),
            ReferenceKind::Observer => write!(f, "{}/{}#observer", self.actor_type, self.key),
        }
    }
}
