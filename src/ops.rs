//! Backend operation surface
//!
//! Every backend exposes the same keyed operations; callers pick one at
//! startup and use it through this trait.

use crate::error::Result;
use crate::key::{Attributes, VariableKey};
use crate::store::Variable;

/// Keyed variable operations shared by all backends
pub trait VariableOps {
    /// Short backend name
    fn name(&self) -> &'static str;

    /// Whether the backend can be used on this system
    fn probe(&self) -> bool;

    fn get(&self, key: &VariableKey) -> Result<Variable>;

    fn get_size(&self, key: &VariableKey) -> Result<u64>;

    fn get_attributes(&self, key: &VariableKey) -> Result<Attributes>;

    fn set(&self, key: &VariableKey, attributes: Attributes, data: &[u8], mode: u32) -> Result<()>;

    fn append(&self, key: &VariableKey, attributes: Attributes, data: &[u8]) -> Result<()>;

    fn delete(&self, key: &VariableKey) -> Result<()>;

    /// Key following `after` in a stable order; `None` once exhausted
    fn get_next_name(&self, after: Option<&VariableKey>) -> Result<Option<VariableKey>>;

    fn chmod(&self, key: &VariableKey, mode: u32) -> Result<()>;
}
