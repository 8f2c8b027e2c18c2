//! # Swarm Service
//!
//! The coordinator: owns the peer directory, protocol router, peer event
//! hub and neighborhood manager, and runs one receive task per connection.
//!
//! ## Tasks
//!
//! - pool event loop: registers inbound peers, spawns connection readers
//! - connection reader: feeds frames through the receive pipeline
//! - overlay task: optional bootstrap, then the neighborhood manager
//!
//! Every task watches the shutdown signal and exits once it is raised.

mod api;
mod core;
mod events;
mod messaging;
mod neighborhood;
mod pipeline;
mod router;

pub use self::core::Swarm;

#[cfg(test)]
mod tests;
