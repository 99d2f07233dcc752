//! VM configuration
//!
//! [`VmOptions`] is fixed at creation. [`CallOptions`] and [`ForkOptions`]
//! carry overrides that apply to a single call or to a newly forked child.
//! On [`VmOptions`] a cycle limit of `None` means unbounded; on the override
//! types `None` means "keep the VM's default" and [`CycleLimit::Unbounded`]
//! lifts the limit.

use crate::constants::DEFAULT_MEMORY_SIZE;
use serde::{Deserialize, Serialize};

/// Options for creating a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Default cycle budget of every call
    pub cycle_limit: Option<u64>,
    /// Size of the engine's linear memory in bytes
    pub memory_size: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            cycle_limit: None,
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }
}

impl VmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cycle_limit(mut self, limit: u64) -> Self {
        self.cycle_limit = Some(limit);
        self
    }

    pub fn with_memory_size(mut self, bytes: usize) -> Self {
        self.memory_size = bytes;
        self
    }
}

/// Cycle budget override for one call or one fork
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleLimit {
    Unbounded,
    Cycles(u64),
}

impl CycleLimit {
    /// Apply an optional override on top of `default`.
    pub fn resolve(limit: Option<Self>, default: Option<u64>) -> Option<u64> {
        match limit {
            Some(CycleLimit::Unbounded) => None,
            Some(CycleLimit::Cycles(cycles)) => Some(cycles),
            None => default,
        }
    }
}

impl From<u64> for CycleLimit {
    fn from(cycles: u64) -> Self {
        CycleLimit::Cycles(cycles)
    }
}

/// Per-call overrides for `eval` and `call_function`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    pub cycle_limit: Option<CycleLimit>,
}

impl CallOptions {
    pub fn with_cycle_limit(limit: u64) -> Self {
        Self {
            cycle_limit: Some(CycleLimit::Cycles(limit)),
        }
    }

    /// Run without a cycle budget even if the VM has a default one.
    pub fn unbounded() -> Self {
        Self {
            cycle_limit: Some(CycleLimit::Unbounded),
        }
    }
}

/// Overrides applied to a forked child
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkOptions {
    /// Replaces the default limit inherited from the parent
    pub cycle_limit: Option<CycleLimit>,
}

impl ForkOptions {
    pub fn with_cycle_limit(limit: u64) -> Self {
        Self {
            cycle_limit: Some(CycleLimit::Cycles(limit)),
        }
    }

    /// Child without a default cycle limit.
    pub fn unbounded() -> Self {
        Self {
            cycle_limit: Some(CycleLimit::Unbounded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_override() {
        assert_eq!(CycleLimit::resolve(None, Some(10)), Some(10));
        assert_eq!(CycleLimit::resolve(None, None), None);
        assert_eq!(CycleLimit::resolve(Some(CycleLimit::Cycles(3)), Some(10)), Some(3));
        assert_eq!(CycleLimit::resolve(Some(CycleLimit::Unbounded), Some(10)), None);
    }

    #[test]
    fn test_override_serde() {
        let options: CallOptions = serde_json::from_str(r#"{ "cycle_limit": "unbounded" }"#).unwrap();
        assert_eq!(options, CallOptions::unbounded());

        let options: ForkOptions =
            serde_json::from_str(r#"{ "cycle_limit": { "cycles": 7 } }"#).unwrap();
        assert_eq!(options, ForkOptions::with_cycle_limit(7));

        let options: CallOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.cycle_limit, None);
    }
}
