//! Relay (TURN) credential endpoint.

use axum::{extract::State, Json};

use crate::error::Result;
use crate::metrics::RelayMetrics;
use crate::relay::{CredentialError, RelayCredential};
use crate::server::{AppState, CallerIdentity};

/// GET /api/v1/relay/credentials - Short-lived relay credentials.
///
/// Guests receive credentials under the shared guest username. Fails with
/// `CONFIG_ERROR` when no relay secret is configured.
#[tracing::instrument(name = "api.relay_credentials", skip(state))]
pub async fn relay_credentials(
    State(state): State<AppState>,
    CallerIdentity(identity): CallerIdentity,
) -> Result<Json<RelayCredential>> {
    match state.credential_issuer.issue(identity.as_deref()) {
        Ok(credential) => {
            RelayMetrics::record_issued();
            tracing::debug!(
                identity = ?identity,
                expires_at = credential.expires_at,
                "Relay credentials issued"
            );
            Ok(Json(credential))
        }
        Err(e @ CredentialError::MissingSecret) => {
            RelayMetrics::record_unconfigured();
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
