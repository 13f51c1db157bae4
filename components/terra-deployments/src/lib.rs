extern crate serde;

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate serde_json;

#[macro_use]
extern crate tracing;

pub mod broadcaster;
pub mod code_cache;
pub mod network;
pub mod orchestrator;
pub mod sequence;
pub mod signer;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod testing;

pub use broadcaster::{
    BroadcastError, BroadcastErrorKind, BroadcastStrategy, FeeConfig, TransactionBroadcaster,
};
pub use code_cache::{content_hash, CodeCache, DEFAULT_CACHE_PATH};
pub use network::NetworkClient;
pub use orchestrator::{DeploymentError, DeploymentOrchestrator, UploadedCode};
pub use sequence::SequenceAllocator;
pub use signer::{Signer, SignerContext, SignerError, TerradSigner};
pub use types::{Msg, TransactionOutcome};
