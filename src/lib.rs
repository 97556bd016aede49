//! deckhand - deployment settings assembler.
//!
//! This library merges a JSON deployment template with configuration
//! fragments, some of them KMS-encrypted at rest, into typed settings for
//! container deployment.

pub mod assemble;
pub mod config;
pub mod embed;
pub mod envelope;
pub mod error;
pub mod kms;
pub mod settings;
pub mod vault;

pub use error::{Error, Result};
