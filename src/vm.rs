//! Forkable VMs
//!
//! A [`ForkableVm`] wraps one [`Runtime`] and serializes access to it. At most
//! one operation runs at a time; a second one attempted meanwhile fails right
//! away with [`VmError::OperationInProgress`] instead of waiting. Distinct VMs
//! share nothing and can be driven from different threads concurrently.
//!
//! # Lifecycle
//!
//! ```text
//! create_vm / fork ──► Active ──dispose()──► Disposed
//! ```
//!
//! Disposal is idempotent and final. When it happens during an operation,
//! the runtime is released as soon as that operation finishes.
//!
//! # Forking
//!
//! [`ForkableVm::fork`] snapshots the parent, creates a new engine from the
//! same factory and restores the snapshot into it. The parent stays busy for
//! the whole sequence. Engine creation and restore run on tokio's blocking
//! pool when a tokio runtime is available.

use crate::config::{CallOptions, CycleLimit, ForkOptions, VmOptions};
use crate::engine::arena::ArenaEngineFactory;
use crate::engine::{EngineError, EngineFactory, HandleId};
use crate::error::{VmError, VmResult};
use crate::marshal::{free_all, from_engine, to_engine_all, StandIn, Value};
use crate::runtime::{Metered, Runtime};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between a VM and its stand-ins
pub(crate) struct VmShared {
    pub(crate) id: u64,
    busy: AtomicBool,
    disposed: AtomicBool,
    runtime: Mutex<Option<Runtime>>,
    /// Handles of stand-ins dropped while the VM was busy
    pending_release: Mutex<Vec<HandleId>>,
    options: VmOptions,
    generation: u32,
    factory: Arc<dyn EngineFactory>,
}

/// Exclusive access to a VM for the duration of one operation
pub(crate) struct OpGuard<'a> {
    shared: &'a VmShared,
}

impl VmShared {
    /// Claim the VM for one operation.
    pub(crate) fn begin(&self) -> VmResult<OpGuard<'_>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(VmError::AlreadyDisposed);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VmError::OperationInProgress);
        }
        let guard = OpGuard { shared: self };
        if self.disposed.load(Ordering::SeqCst) {
            return Err(VmError::AlreadyDisposed);
        }
        guard.drain_pending();
        Ok(guard)
    }

    /// Release a stand-in's handle now, or queue it if the VM is busy.
    pub(crate) fn release(&self, handle: HandleId) {
        match self.begin() {
            Ok(guard) => {
                let freed = guard.with_runtime(|runtime| Ok(runtime.engine_mut().free(handle)?));
                trace!("released handle {} of vm {}: {:?}", handle, self.id, freed);
            }
            Err(VmError::OperationInProgress) => {
                self.pending_release.lock().push(handle);
                trace!("queued release of handle {} on busy vm {}", handle, self.id);
            }
            Err(_) => {}
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("disposing vm {}", self.id);
        self.take_runtime_if_idle();
    }

    /// Drop the runtime of a disposed VM unless an operation still holds it.
    fn take_runtime_if_idle(&self) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let runtime = self.runtime.lock().take();
            self.pending_release.lock().clear();
            self.busy.store(false, Ordering::SeqCst);
            if runtime.is_some() {
                debug!("vm {} released its runtime", self.id);
            }
        }
    }
}

impl OpGuard<'_> {
    /// Run `f` against the runtime.
    pub(crate) fn with_runtime<R>(&self, f: impl FnOnce(&mut Runtime) -> VmResult<R>) -> VmResult<R> {
        let mut slot = self.shared.runtime.lock();
        let runtime = slot.as_mut().ok_or(VmError::AlreadyDisposed)?;
        f(runtime)
    }

    fn drain_pending(&self) {
        let pending = std::mem::take(&mut *self.shared.pending_release.lock());
        if pending.is_empty() {
            return;
        }
        trace!(
            "draining {} pending releases on vm {}",
            pending.len(),
            self.shared.id
        );
        if let Some(runtime) = self.shared.runtime.lock().as_mut() {
            for handle in pending {
                let freed = runtime.engine_mut().free(handle);
                trace!("released queued handle {} of vm {}: {:?}", handle, self.shared.id, freed);
            }
        }
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.shared.busy.store(false, Ordering::SeqCst);
        if self.shared.disposed.load(Ordering::SeqCst) {
            self.shared.take_runtime_if_idle();
        }
    }
}

/// A sandboxed script VM that can be forked
pub struct ForkableVm {
    shared: Arc<VmShared>,
}

impl ForkableVm {
    fn from_runtime(
        runtime: Runtime,
        options: VmOptions,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        let shared = VmShared {
            id: NEXT_VM_ID.fetch_add(1, Ordering::Relaxed),
            busy: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            generation: runtime.generation(),
            runtime: Mutex::new(Some(runtime)),
            pending_release: Mutex::new(Vec::new()),
            options,
            factory,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Identity checked when stand-ins are passed back in
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Fork depth: 0 for a freshly created VM
    pub fn generation(&self) -> u32 {
        self.shared.generation
    }

    pub fn options(&self) -> VmOptions {
        self.shared.options
    }

    /// Evaluate source at top level with the default cycle limit.
    pub fn eval(&self, source: &str) -> VmResult<Value> {
        self.eval_with(source, CallOptions::default())
    }

    pub fn eval_with(&self, source: &str, options: CallOptions) -> VmResult<Value> {
        Ok(self.run_eval(source, options, false)?.value)
    }

    /// Like [`eval_with`](Self::eval_with), also reporting the cycles used.
    pub fn eval_with_metrics(&self, source: &str, options: CallOptions) -> VmResult<Metered<Value>> {
        self.run_eval(source, options, true)
    }

    /// Call the global function `name`.
    pub fn call_function(&self, name: &str, args: &[Value]) -> VmResult<Value> {
        self.call_function_with(name, args, CallOptions::default())
    }

    pub fn call_function_with(
        &self,
        name: &str,
        args: &[Value],
        options: CallOptions,
    ) -> VmResult<Value> {
        Ok(self.run_call(name, args, options, false)?.value)
    }

    pub fn call_function_with_metrics(
        &self,
        name: &str,
        args: &[Value],
        options: CallOptions,
    ) -> VmResult<Metered<Value>> {
        self.run_call(name, args, options, true)
    }

    fn run_eval(&self, source: &str, options: CallOptions, metrics: bool) -> VmResult<Metered<Value>> {
        let guard = self.shared.begin()?;
        guard.with_runtime(|runtime| {
            if metrics {
                runtime.enable_metering();
            }
            let result = runtime.evaluate(source, options.cycle_limit)?;
            let engine = runtime.engine_mut();
            let value = from_engine(engine, &self.shared, result.value)?;
            Ok(Metered {
                value,
                cycles: result.cycles,
            })
        })
    }

    fn run_call(
        &self,
        name: &str,
        args: &[Value],
        options: CallOptions,
        metrics: bool,
    ) -> VmResult<Metered<Value>> {
        let guard = self.shared.begin()?;
        guard.with_runtime(|runtime| {
            if metrics {
                runtime.enable_metering();
            }
            let handles = to_engine_all(runtime.engine_mut(), self.shared.id, args)?;
            let result = runtime.invoke(name, &handles, options.cycle_limit);
            let engine = runtime.engine_mut();
            free_all(engine, &handles)?;
            let result = result?;
            let value = from_engine(engine, &self.shared, result.value)?;
            Ok(Metered {
                value,
                cycles: result.cycles,
            })
        })
    }

    /// Stand-in over the engine's global object.
    pub fn global(&self) -> VmResult<StandIn> {
        let guard = self.shared.begin()?;
        guard.with_runtime(|runtime| {
            let engine = runtime.engine_mut();
            let handle = engine.global()?;
            match from_engine(engine, &self.shared, handle)? {
                Value::StandIn(global) => Ok(global),
                other => Err(VmError::Engine(EngineError::Exception(format!(
                    "global object marshaled as {}",
                    other.type_name()
                )))),
            }
        })
    }

    /// Create an independent copy of this VM.
    ///
    /// The child starts from the parent's current state and inherits its
    /// default cycle limit unless `options` overrides it.
    pub async fn fork(&self, options: ForkOptions) -> VmResult<ForkableVm> {
        let guard = self.shared.begin()?;
        let snapshot = guard.with_runtime(|runtime| Ok(runtime.snapshot()))?;

        let child_options = VmOptions {
            cycle_limit: CycleLimit::resolve(options.cycle_limit, self.shared.options.cycle_limit),
            ..self.shared.options
        };
        let factory = Arc::clone(&self.shared.factory);
        let restore_factory = Arc::clone(&factory);
        let build = move || {
            let engine = restore_factory.create()?;
            Runtime::from_snapshot(engine, &snapshot, child_options.cycle_limit)
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => match handle.spawn_blocking(build).await {
                Ok(result) => result?,
                Err(err) => match err.try_into_panic() {
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(_) => return Err(VmError::Engine(EngineError::Cancelled)),
                },
            },
            Err(_) => build()?,
        };
        drop(guard);

        let child = ForkableVm::from_runtime(runtime, child_options, factory);
        debug!(
            "forked vm {} into vm {} (generation {})",
            self.shared.id,
            child.id(),
            child.generation()
        );
        Ok(child)
    }

    /// Release the engine. Idempotent; later operations fail with
    /// [`VmError::AlreadyDisposed`].
    pub fn dispose(&self) {
        self.shared.dispose();
    }
}

impl Drop for ForkableVm {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl fmt::Debug for ForkableVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkableVm")
            .field("id", &self.shared.id)
            .field("generation", &self.shared.generation)
            .field("disposed", &self.is_disposed())
            .field("options", &self.shared.options)
            .finish()
    }
}

/// Create a VM backed by the bundled arena engine.
pub fn create_vm(options: VmOptions) -> VmResult<ForkableVm> {
    let factory = ArenaEngineFactory::new(options.memory_size);
    create_vm_with_factory(options, Arc::new(factory))
}

/// Create a VM backed by engines from `factory`.
pub fn create_vm_with_factory(
    options: VmOptions,
    factory: Arc<dyn EngineFactory>,
) -> VmResult<ForkableVm> {
    let options = VmOptions {
        memory_size: factory.memory_size(),
        ..options
    };
    let runtime = Runtime::new(factory.create()?, options.cycle_limit)?;
    let vm = ForkableVm::from_runtime(runtime, options, factory);
    debug!(
        "created vm {} (memory={} bytes, cycle_limit={:?})",
        vm.id(),
        options.memory_size,
        options.cycle_limit
    );
    Ok(vm)
}

/// Create a VM and evaluate `bootstrap` in it.
///
/// If the bootstrap fails the VM is disposed before the error is returned.
pub fn create_preloaded_vm(bootstrap: &str, options: VmOptions) -> VmResult<ForkableVm> {
    let vm = create_vm(options)?;
    if let Err(err) = vm.eval(bootstrap) {
        warn!("bootstrap of vm {} failed: {}", vm.id(), err);
        vm.dispose();
        return Err(err);
    }
    Ok(vm)
}
