//! # varstore
//!
//! An efivarfs variable store with:
//! - One file per variable, `{name}-{guid}`, holding `[attributes][payload]`
//! - Race detection instead of locking (exclusive create + inode identity)
//! - Immutable-flag clearing with guaranteed restoration
//! - Rollback of files left behind by a failed create
//! - Best-effort mirroring of a designated variable onto an ESP file
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   VarStore (VariableOps)                     │
//! │   get / get_size / get_attributes / set / append / delete    │
//! │            chmod / get_next_name / probe                     │
//! └──────┬───────────────┬────────────────┬─────────────┬───────┘
//!        │               │                │             │
//!        ▼               ▼                ▼             ▼
//! ┌────────────┐  ┌────────────┐  ┌──────────────┐ ┌──────────────┐
//! │PathResolver│  │ MountProbe │  │ Immutability │ │ Persistence  │
//! │ (root once)│  │  (statfs)  │  │    Guard     │ │    Mirror    │
//! └────────────┘  └────────────┘  └──────────────┘ └──────────────┘
//!                                                   (after commit)
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod diagnostics;

pub mod key;
pub mod paths;
pub mod probe;
pub mod immutable;
pub mod store;
pub mod mirror;
pub mod export;
pub mod ops;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, VarError};
pub use config::{Config, Pacing};
pub use key::{Attributes, Guid, VariableKey};
pub use ops::VariableOps;
pub use probe::fs_magic;
pub use store::{VarStore, Variable};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of varstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
