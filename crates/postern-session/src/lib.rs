//! Session lifecycle for the Postern client runtime.
//!
//! Single-flight coordination for expensive side-effect operations, the
//! session token cache with coalesced refreshes, the background refresh
//! poller with exponential backoff, device attestation/assertion, and
//! client re-sync — plus the middleware that wires those corrective flows
//! into the request pipeline.

pub mod client_sync;
pub mod device_trust;
pub mod middleware;
pub mod poller;
pub mod sessions;
pub mod single_flight;
pub mod token_cache;

pub use client_sync::{ClientSync, CLIENT_PATH, ENVIRONMENT_PATH};
pub use device_trust::{AssertionProof, AttestationProof, DeviceAttestor, DeviceTrustService};
pub use middleware::{ClientSyncValidator, DeviceProofRetrier, DEVICE_PROOF_CORRECTION};
pub use poller::{SessionPoller, SessionRefresher};
pub use sessions::SessionService;
pub use single_flight::SingleFlight;
pub use token_cache::{
    GetTokenOptions, SessionToken, SessionTokenCache, TokenCacheKey, MAX_EXPIRATION_BUFFER,
};
