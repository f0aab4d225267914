//! Authorization of join requests.
//!
//! What a space type means (a post, a document, the global lobby) is decided
//! outside this crate; the router only asks whether a join may proceed.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AccessConfig;
use crate::session::RoomKey;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("access denied: {0}")]
    Denied(String),
    #[error("access check unavailable: {0}")]
    Unavailable(String),
}

impl AccessError {
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::Denied(_) => "FORBIDDEN",
            AccessError::Unavailable(_) => "ACCESS_UNAVAILABLE",
        }
    }
}

/// External access check consulted before every join
#[async_trait]
pub trait SpaceAccess: Send + Sync {
    async fn authorize(&self, identity: Option<&str>, room: &RoomKey) -> Result<(), AccessError>;
}

/// Config-driven policy: optional guest lockout and a space-type allow list
#[derive(Debug, Clone)]
pub struct PolicyAccess {
    allow_guests: bool,
    space_types: HashSet<String>,
}

impl PolicyAccess {
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            allow_guests: config.allow_guests,
            space_types: config.space_types.iter().cloned().collect(),
        }
    }

    /// Policy that admits everyone everywhere
    pub fn open() -> Self {
        Self {
            allow_guests: true,
            space_types: HashSet::new(),
        }
    }
}

#[async_trait]
impl SpaceAccess for PolicyAccess {
    async fn authorize(&self, identity: Option<&str>, room: &RoomKey) -> Result<(), AccessError> {
        if identity.is_none() && !self.allow_guests {
            return Err(AccessError::Denied(
                "guests may not join spaces".to_string(),
            ));
        }

        if !self.space_types.is_empty() && !self.space_types.contains(&room.space_type) {
            return Err(AccessError::Denied(format!(
                "unknown space type '{}'",
                room.space_type
            )));
        }

        Ok(())
    }
}
