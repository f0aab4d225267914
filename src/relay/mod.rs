//! Time-boxed credentials for the NAT-traversal media relay.

mod credentials;

pub use credentials::{CredentialError, CredentialIssuer, RelayCredential, RELAY_CREDENTIAL_TTL_SECS};
