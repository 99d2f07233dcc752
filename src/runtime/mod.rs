//! Runtime: one engine, its metadata block and its cycle meter
//!
//! The runtime owns an [`Engine`] exclusively and adds three things on top of
//! it:
//!
//! - whole-memory [`Snapshot`]s and restore, with relocation through the
//!   [`MetadataBlock`]
//! - metered top-level calls through a [`CycleMeter`] installed as the
//!   engine's interrupt handler
//! - mapping of engine failures to [`VmError`]
//!
//! [`ForkableVm`](crate::ForkableVm) adds concurrency control on top; the
//! runtime itself assumes a single caller.

pub mod metadata;
pub mod meter;

pub use metadata::MetadataBlock;
pub use meter::CycleMeter;

use crate::config::CycleLimit;
use crate::constants::METADATA_BYTES;
use crate::engine::{Engine, EngineError, HandleId};
use crate::error::{VmError, VmResult};
use log::{debug, trace, warn};
use std::fmt;
use std::sync::Arc;

/// Full copy of an engine's linear memory
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot {
    bytes: Vec<u8>,
}

impl Snapshot {
    /// Wrap bytes produced by [`Snapshot::into_bytes`] or persisted by a host.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("len", &self.bytes.len()).finish()
    }
}

/// Result of a metered call together with the cycles it used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metered<T> {
    pub value: T,
    pub cycles: u64,
}

impl<T> Metered<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Metered<U> {
        Metered {
            value: f(self.value),
            cycles: self.cycles,
        }
    }
}

/// A single engine instance with snapshot support and cycle metering
pub struct Runtime {
    engine: Box<dyn Engine>,
    metadata: MetadataBlock,
    meter: Arc<CycleMeter>,
    default_limit: Option<u64>,
    metering: bool,
}

impl Runtime {
    /// Initialize `engine` and embed a fresh metadata block in its memory.
    pub fn new(mut engine: Box<dyn Engine>, default_limit: Option<u64>) -> VmResult<Self> {
        let handles = engine.initialize()?;
        let offset = engine.allocate(METADATA_BYTES)?;
        let metadata = MetadataBlock::new(offset, handles);
        metadata.write(engine.memory_mut());
        debug!(
            "runtime created: memory={} bytes, metadata at {:#x}",
            engine.memory().len(),
            offset
        );

        let mut runtime = Self {
            engine,
            metadata,
            meter: Arc::new(CycleMeter::new()),
            default_limit,
            metering: false,
        };
        if default_limit.is_some() {
            runtime.enable_metering();
        }
        Ok(runtime)
    }

    /// Build a runtime by restoring `snapshot` into an uninitialized engine.
    pub fn from_snapshot(
        mut engine: Box<dyn Engine>,
        snapshot: &Snapshot,
        default_limit: Option<u64>,
    ) -> VmResult<Self> {
        engine.memory_restore(snapshot.as_bytes())?;
        let metadata = relocate(engine.as_mut())?;
        let mut runtime = Self {
            engine,
            metadata,
            meter: Arc::new(CycleMeter::new()),
            default_limit,
            metering: false,
        };
        if default_limit.is_some() {
            runtime.enable_metering();
        }
        Ok(runtime)
    }

    /// Copy the engine's whole memory.
    pub fn snapshot(&self) -> Snapshot {
        let bytes = self.engine.memory_snapshot();
        debug!("snapshot taken: {} bytes", bytes.len());
        Snapshot { bytes }
    }

    /// Replace this runtime's state with `snapshot`.
    ///
    /// Size and metadata block are checked before memory is overwritten, so a
    /// rejected snapshot leaves the runtime untouched.
    pub fn restore(&mut self, snapshot: &Snapshot) -> VmResult<()> {
        let expected = self.memory_size();
        if snapshot.len() != expected {
            return Err(VmError::SizeMismatch {
                expected,
                actual: snapshot.len(),
            });
        }
        if MetadataBlock::scan(snapshot.as_bytes()).is_none() {
            warn!("restore rejected: no metadata block in {} byte snapshot", snapshot.len());
            return Err(VmError::CorruptSnapshot);
        }
        self.engine.memory_restore(snapshot.as_bytes())?;
        self.metadata = relocate(self.engine.as_mut())?;
        Ok(())
    }

    /// Install the meter as the engine's interrupt handler.
    ///
    /// Runtimes with an unbounded default start without a handler; metrics
    /// and per-call limits turn it on, and it stays on afterwards.
    pub fn enable_metering(&mut self) {
        if !self.metering {
            self.engine.set_interrupt_handler(Some(self.meter.hook()));
            self.metering = true;
            trace!("interrupt handler installed");
        }
    }

    pub fn is_metering(&self) -> bool {
        self.metering
    }

    pub fn default_limit(&self) -> Option<u64> {
        self.default_limit
    }

    pub fn set_default_limit(&mut self, limit: Option<u64>) {
        self.default_limit = limit;
        if limit.is_some() {
            self.enable_metering();
        }
    }

    pub fn metadata(&self) -> MetadataBlock {
        self.metadata
    }

    /// Number of restores between this runtime and its original ancestor.
    pub fn generation(&self) -> u32 {
        self.metadata.generation
    }

    pub fn memory_size(&self) -> usize {
        self.engine.memory().len()
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn Engine {
        self.engine.as_mut()
    }

    /// Evaluate script source at top level.
    ///
    /// `limit` overrides the default budget for this call only.
    pub fn evaluate(
        &mut self,
        source: &str,
        limit: Option<CycleLimit>,
    ) -> VmResult<Metered<HandleId>> {
        self.metered(limit, |engine| engine.evaluate(source))
    }

    /// Call the global function `name`.
    pub fn invoke(
        &mut self,
        name: &str,
        args: &[HandleId],
        limit: Option<CycleLimit>,
    ) -> VmResult<Metered<HandleId>> {
        self.metered(limit, |engine| engine.invoke(name, args))
    }

    /// Call a function value with an explicit receiver.
    pub fn call(
        &mut self,
        func: HandleId,
        this: HandleId,
        args: &[HandleId],
        limit: Option<CycleLimit>,
    ) -> VmResult<Metered<HandleId>> {
        self.metered(limit, |engine| engine.call(func, this, args))
    }

    fn metered<F>(&mut self, limit: Option<CycleLimit>, f: F) -> VmResult<Metered<HandleId>>
    where
        F: FnOnce(&mut dyn Engine) -> Result<HandleId, EngineError>,
    {
        let limit = CycleLimit::resolve(limit, self.default_limit);
        if limit.is_some() {
            self.enable_metering();
        }
        self.meter.reset(limit);

        let result = f(self.engine.as_mut());
        let cycles = self.meter.cycles();
        trace!("call finished: cycles={} limit={:?}", cycles, limit);

        match result {
            Ok(value) => Ok(Metered { value, cycles }),
            Err(EngineError::Interrupted) if self.meter.tripped() => {
                Err(VmError::CycleLimitExceeded {
                    limit: limit.unwrap_or(u64::MAX),
                    cycles,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Find the metadata block in restored memory, re-attach the engine and
/// bump the generation.
fn relocate(engine: &mut dyn Engine) -> VmResult<MetadataBlock> {
    let mut block = match MetadataBlock::scan(engine.memory()) {
        Some(block) => block,
        None => {
            warn!("restored memory has no metadata block");
            return Err(VmError::CorruptSnapshot);
        }
    };
    match engine.attach(block.handles) {
        Ok(()) => {}
        Err(EngineError::InvalidRecords { runtime, context }) => {
            warn!(
                "metadata block at {:#x} names invalid records {:#x}/{:#x}",
                block.offset, runtime, context
            );
            return Err(VmError::CorruptSnapshot);
        }
        Err(err) => return Err(err.into()),
    }
    block.generation += 1;
    block.write(engine.memory_mut());
    debug!(
        "relocated metadata block at {:#x}, generation {}",
        block.offset, block.generation
    );
    Ok(block)
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("metadata", &self.metadata)
            .field("default_limit", &self.default_limit)
            .field("metering", &self.metering)
            .finish()
    }
}
