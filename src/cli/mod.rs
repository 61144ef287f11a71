//! CLI module for trellis - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for submitting jobs,
//! inspecting status, listing, cancellation, and maintenance.

pub mod commands;

pub use commands::Cli;
