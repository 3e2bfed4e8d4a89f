//! Fused approve + supply against a forked chain, executed through a relay.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

/// Smart-account setup and quote signing.
pub mod account;

/// Chain reads and fork debug controls.
pub mod chain;

/// Environment configuration.
pub mod config;

/// Contract bindings.
pub mod contracts;

/// Error types and failure classification.
pub mod error;

/// Donor-funded balance top-ups.
pub mod funding;

/// Provider capable of filling and sending transactions.
pub mod provider;

/// Execution relay client.
pub mod relay;

/// Balance snapshots and run summaries.
pub mod report;

/// Retry with backoff.
pub mod retry;

/// Connected fork + relay session.
pub mod session;

/// The fused approve + supply.
pub mod supply;

#[cfg(test)]
pub(crate) mod test_utils;

// used by the binaries
use clap as _;
use dotenvy as _;
use eyre as _;
