extern crate serde;

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate serde_json;

#[macro_use]
extern crate tracing;

pub extern crate terra_deployments;
pub extern crate terra_rpc_client;

#[macro_use]
mod macros;

pub mod contracts;
#[cfg(feature = "cli")]
pub mod frontend;
pub mod scenarios;
pub mod types;
