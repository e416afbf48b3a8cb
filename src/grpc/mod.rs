//! gRPC transport for the job API.
//!
//! [`GrpcServer`] serves [`ClientService`] over mTLS. Every call is
//! authorized against the [`UserTable`](crate::auth::UserTable) before it
//! reaches the [`JobWorker`](crate::worker::JobWorker).

pub mod client_service;
pub mod server;

pub use client_service::{CallerIdentity, ClientService};
pub use server::GrpcServer;
