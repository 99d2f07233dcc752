// Constants shared by the runtime and the bundled engine

/// Magic word identifying the runtime metadata block ("FVM!" little-endian).
pub const METADATA_MAGIC: u32 = 0x4656_4d21;

/// Size of the metadata block in 32-bit words.
pub const METADATA_WORDS: usize = 16;

/// Size of the metadata block in bytes.
pub const METADATA_BYTES: usize = METADATA_WORDS * 4;

/// Word indices inside the metadata block
pub const META_MAGIC: usize = 0;
pub const META_SELF: usize = 1;
pub const META_RUNTIME: usize = 2;
pub const META_CONTEXT: usize = 3;
pub const META_GENERATION: usize = 4;

/// Engine ticks (loop back-edges and calls) between two interrupt hook polls.
pub const INTERRUPT_INTERVAL: u32 = 4096;

/// Default size of an engine's linear memory
pub const DEFAULT_MEMORY_SIZE: usize = 4 * 1024 * 1024;

/// Smallest memory an engine can be configured with.
pub const MIN_MEMORY_SIZE: usize = 64 * 1024;

/// Largest memory an engine can address with 32-bit offsets.
pub const MAX_MEMORY_SIZE: usize = u32::MAX as usize;

/// Maximum nesting of guest function calls before a RangeError is thrown.
pub const MAX_CALL_DEPTH: usize = 64;

/// Parser budget for syntactic nesting. Each bracketed or nested construct
/// costs several units and each operator or member chain link one.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Maximum recursion of the evaluator across statements, expressions and
/// guest calls before a RangeError is thrown.
pub const MAX_EVAL_DEPTH: usize = 256;
