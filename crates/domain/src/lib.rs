//! Shared domain types for ClinAgent: provider-agnostic messages and tool
//! calls, stream events, the configuration tree, and the common error type.

pub mod capability;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;
