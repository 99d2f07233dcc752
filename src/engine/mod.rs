//! Engine collaborator contract
//!
//! A [`Runtime`](crate::runtime::Runtime) drives exactly one [`Engine`]. The
//! engine owns a single contiguous linear memory that holds all guest state,
//! which is what makes whole-memory snapshots possible.
//!
//! Values cross the boundary as [`HandleId`]s: reference-counted entries in an
//! engine-side handle table. Every handle an engine hands out is owned by the
//! caller and must be released with [`Engine::free`] (or kept alive with
//! [`Engine::dup`]). Handles passed as arguments are borrowed.
//!
//! - [`arena`]: the bundled reference engine

pub mod arena;

use thiserror::Error;

/// Index into an engine's handle table. `0` is never a valid handle.
pub type HandleId = u32;

/// Callback polled by the engine at coarse execution boundaries.
///
/// Returning `true` requests that the current execution be abandoned.
pub type InterruptHandler = Box<dyn FnMut() -> bool + Send>;

/// Offsets of the engine's runtime and context records inside its memory.
///
/// These are what the runtime metadata block stores so that a restored
/// memory image can be re-attached to a fresh engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHandles {
    pub runtime: u32,
    pub context: u32,
}

/// Result of the engine's `typeof` primitive.
///
/// `null` reports [`ValueKind::Object`]; callers tell it apart with
/// [`Engine::strict_equals`] against the engine's null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Boolean,
    Number,
    String,
    Object,
    Function,
}

/// Attribute flags for [`Engine::define_property`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertyFlags {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyFlags {
    /// Flags of a property created by plain assignment.
    pub const fn all() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }
}

/// Errors reported by an engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A guest exception, carried as the engine's textual rendering.
    #[error("{0}")]
    Exception(String),

    /// Execution was abandoned because the interrupt handler asked for it.
    #[error("InternalError: interrupted")]
    Interrupted,

    #[error("Snapshot size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("engine out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("invalid value handle {0}")]
    InvalidHandle(HandleId),

    #[error("engine records at runtime {runtime:#x}, context {context:#x} are not valid")]
    InvalidRecords { runtime: u32, context: u32 },

    #[error("engine has not been initialized")]
    Uninitialized,

    /// Background engine setup was cancelled before it finished.
    #[error("engine setup was cancelled")]
    Cancelled,
}

/// The primitives a runtime needs from an embedded script engine.
pub trait Engine: Send {
    /// Build the engine's initial state inside its memory.
    fn initialize(&mut self) -> Result<EngineHandles, EngineError>;

    /// Re-bind the engine to records found in a restored memory image.
    fn attach(&mut self, handles: EngineHandles) -> Result<(), EngineError>;

    /// The engine's whole linear memory.
    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];

    /// Independent copy of the linear memory.
    fn memory_snapshot(&self) -> Vec<u8> {
        self.memory().to_vec()
    }

    /// Overwrite the linear memory wholesale.
    ///
    /// The engine is detached afterwards until [`Engine::attach`] succeeds.
    fn memory_restore(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        let memory = self.memory_mut();
        if memory.len() != bytes.len() {
            return Err(EngineError::SizeMismatch {
                expected: memory.len(),
                actual: bytes.len(),
            });
        }
        memory.copy_from_slice(bytes);
        Ok(())
    }

    /// Reserve `size` bytes of engine memory, returning their offset.
    fn allocate(&mut self, size: usize) -> Result<u32, EngineError>;

    fn set_interrupt_handler(&mut self, handler: Option<InterruptHandler>);

    // ---- execution ----

    fn evaluate(&mut self, source: &str) -> Result<HandleId, EngineError>;

    /// Call the global function `name`.
    fn invoke(&mut self, name: &str, args: &[HandleId]) -> Result<HandleId, EngineError>;

    fn call(
        &mut self,
        func: HandleId,
        this: HandleId,
        args: &[HandleId],
    ) -> Result<HandleId, EngineError>;

    /// Handle to the global object.
    fn global(&mut self) -> Result<HandleId, EngineError>;

    // ---- inspection and conversion ----

    fn type_of(&self, value: HandleId) -> Result<ValueKind, EngineError>;
    fn is_array(&self, value: HandleId) -> Result<bool, EngineError>;
    fn strict_equals(&self, a: HandleId, b: HandleId) -> Result<bool, EngineError>;
    fn to_bool(&self, value: HandleId) -> Result<bool, EngineError>;
    fn to_number(&self, value: HandleId) -> Result<f64, EngineError>;
    fn to_string(&self, value: HandleId) -> Result<String, EngineError>;

    // ---- construction ----

    fn new_undefined(&mut self) -> Result<HandleId, EngineError>;
    fn new_null(&mut self) -> Result<HandleId, EngineError>;
    fn new_bool(&mut self, value: bool) -> Result<HandleId, EngineError>;
    fn new_number(&mut self, value: f64) -> Result<HandleId, EngineError>;
    fn new_string(&mut self, value: &str) -> Result<HandleId, EngineError>;
    fn new_object(&mut self) -> Result<HandleId, EngineError>;
    fn new_array(&mut self) -> Result<HandleId, EngineError>;

    // ---- properties ----

    fn get_property(&mut self, object: HandleId, key: &str) -> Result<HandleId, EngineError>;
    fn set_property(
        &mut self,
        object: HandleId,
        key: &str,
        value: HandleId,
    ) -> Result<(), EngineError>;
    fn has_property(&self, object: HandleId, key: &str) -> Result<bool, EngineError>;
    fn define_property(
        &mut self,
        object: HandleId,
        key: &str,
        value: HandleId,
        flags: PropertyFlags,
    ) -> Result<(), EngineError>;

    /// Own enumerable string keys, array indices first.
    fn own_keys(&self, object: HandleId) -> Result<Vec<String>, EngineError>;

    // ---- reference counting ----

    fn dup(&mut self, value: HandleId) -> Result<HandleId, EngineError>;
    fn free(&mut self, value: HandleId) -> Result<(), EngineError>;
}

/// Creates engine instances with identical memory configuration.
///
/// Snapshots are only portable between engines from the same factory
/// configuration.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Engine>, EngineError>;

    /// Size of the linear memory every created engine gets.
    fn memory_size(&self) -> usize;
}
