//! dweb-hosting-bot: a decentralized content-replication engine.
//!
//! A publisher builds a content-addressed manifest for a file, caches it
//! locally, and replicates it to a quorum of peers over direct sessions,
//! falling back to a storage service when a peer cannot be reached. Readers
//! resolve individual chunks through a priority chain of local cache,
//! origin, peer, and storage tiers, verifying every chunk against the
//! manifest's pinned hashes before trusting it.

pub mod chunk_store;
pub mod cli;
pub mod config;
pub mod hash;
pub mod identity;
pub mod manifest;
pub mod publication;
pub mod registry;
pub mod retriever;
pub mod scheduler;
pub mod session;
