//! Release host contract.

use async_trait::async_trait;

use crate::credential::Credential;
use crate::descriptor::{ReleaseDescriptor, ReleaseOutcome};
use crate::Result;

/// Git hosting release API.
///
/// Guarantees expected from implementations:
/// - one call creates at most one release object;
/// - on `Err`, no release created by this call is left behind;
/// - the credential is used for authentication only and never logged.
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    /// Authenticate with `credential` and create the release described.
    async fn create_release(
        &self,
        descriptor: &ReleaseDescriptor,
        credential: &Credential,
    ) -> Result<ReleaseOutcome>;
}
