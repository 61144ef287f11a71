//! Capability Provider layer - the narrow contract to per-layer services
//!
//! This module provides:
//! - CapabilityProvider trait and the Transient/Permanent/Timeout taxonomy
//! - ProviderRegistry mapping plan references to live providers
//! - HttpProvider adapter for remote services

pub mod client;
pub mod http;
pub mod registry;

pub use client::{CapabilityProvider, ProviderContext, ProviderError};
pub use http::{HttpProvider, HttpProviderConfig};
pub use registry::ProviderRegistry;
