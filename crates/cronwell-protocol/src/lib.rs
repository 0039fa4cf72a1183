//! Wire formats shared between cronwell nodes and job processes.
//!
//! - [`routes`]: cluster RPC paths served under `/cluster`.
//! - [`messages`]: JSON request/reply bodies for those routes.
//! - [`lifecycle`]: the line protocol a process job writes to stdout.

pub mod lifecycle;
pub mod messages;
pub mod routes;
