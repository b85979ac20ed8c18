//! Chartsup keeps a chart tile provider process alive on behalf of a navigation server.
//! It discovers a provider that is already running for its configuration, launches one
//! when none is found, polls its health endpoint and recovers when it stops answering.
//! The chart list from the last successful poll is cached for consumers.

/// Cached chart list and loopback rewriting.
pub mod charts;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared names, paths and timings.
pub mod constants;

/// Ownership tag and process environment scanning.
pub mod environ;

/// Error handling.
pub mod error;

/// Command line planning for the provider.
pub mod launch;

/// Health probes.
pub mod probe;

/// Process table access.
pub mod process;

/// Status reporting.
pub mod status;

/// Supervision state machine.
pub mod supervisor;

/// Provider process launching and output capture.
pub mod worker;
