//! # Introduction
//!
//! forkvm hosts sandboxed script VMs that can be forked: a VM's entire engine
//! state is one contiguous memory, so a byte copy of it is a complete,
//! independent copy of the guest. Hosts bootstrap a VM once and fork cheap
//! children from it, each bounded by a per-call cycle budget.
//!
//! ## Layers
//!
//! ```text
//! ForkableVm ──► Runtime ──► Engine
//!     │            ├── MetadataBlock (relocation after restore)
//!     │            └── CycleMeter   (interrupt-hook budget)
//!     └── marshal: Value ⇄ engine handles, StandIn proxies
//! ```
//!
//! 1. [`engine`]: the engine contract plus the bundled arena engine.
//! 2. [`runtime`]: snapshot/restore, metadata relocation and metering.
//! 3. [`marshal`]: host values and stand-ins for engine objects.
//! 4. [`vm`]: exclusive access, forking and disposal.
//!
//! ## Example
//!
//! ```no_run
//! use forkvm::{create_preloaded_vm, CallOptions, ForkOptions, Value, VmOptions};
//!
//! # async fn demo() -> forkvm::VmResult<()> {
//! let base = create_preloaded_vm("let hits = 0; function hit() { return ++hits; }", VmOptions::new())?;
//! let child = base.fork(ForkOptions::default()).await?;
//! assert_eq!(child.call_function("hit", &[])?, Value::Number(1.0));
//! assert_eq!(base.eval("hits")?, Value::Number(0.0));
//!
//! let run = child.eval_with_metrics("while (true) {}", CallOptions::with_cycle_limit(5));
//! assert!(run.is_err());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod runtime;
pub mod vm;

pub use config::{CallOptions, CycleLimit, ForkOptions, VmOptions};
pub use error::{VmError, VmResult};
pub use marshal::{
    HostFunction, PropertyDescriptor, PropertyKey, StandIn, StandInKind, Symbol, Value,
};
pub use runtime::{Metered, Snapshot};
pub use vm::{create_preloaded_vm, create_vm, create_vm_with_factory, ForkableVm};
