//! Immutability Module
//!
//! efivarfs marks most variable files immutable (`chattr +i`), so every
//! mutation has to clear the flag first and put it back afterwards.
//!
//! ## Responsibilities
//! - Read and change the per-inode flag word through `FlagControl`
//! - Treat "flags unsupported by this filesystem" as "not immutable"
//! - Restore the original flags on every exit path via `MutableWindow`
//!
//! ## Flag Word
//! ```text
//! ┌───────────────┬───────┬───────────────┐
//! │ other flags   │ IMMUT │ other flags   │
//! │               │ 0x10  │               │
//! └───────────────┴───────┴───────────────┘
//! ```

mod flags;
mod guard;

pub use flags::{FlagControl, IoctlFlags, FS_IMMUTABLE_FL};
pub use guard::{ImmutabilityGuard, MutableWindow};
