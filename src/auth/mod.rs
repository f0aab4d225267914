//! Optional authentication of realtime and HTTP callers.
//!
//! Identity verification is an opaque collaborator: it either yields a
//! principal, yields nothing (guest), or rejects the presented credential.

mod claims;
mod jwt;

pub use claims::Claims;
pub use jwt::JwtValidator;

use crate::error::AppError;

/// Resolves an optional bearer credential into an optional identity.
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` means guest. A credential that was presented but is not
    /// acceptable is an error, never a silent downgrade to guest.
    fn authenticate(&self, token: Option<&str>) -> Result<Option<String>, AppError>;

    /// False when no credential can ever be accepted
    fn is_enabled(&self) -> bool;
}
