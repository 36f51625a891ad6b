//! Engine-wide limits.
//!
//! These caps bound the damage a hostile or broken script can do. They are
//! deliberately conservative; hosts that need more can widen them through
//! [`crate::engine::EngineConfig`] where a knob exists.

use std::time::Duration;

/// Maximum number of errors reported per compilation before further errors
/// are counted but dropped.
pub const MAX_ERRORS: usize = 10;

/// Maximum accepted script source size in bytes.
pub const MAX_SCRIPT_SIZE: u64 = 1024 * 1024;

/// Maximum nesting depth of blocks and test expressions.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Default CPU-time budget for one execution.
pub const DEFAULT_MAX_CPU_TIME: Duration = Duration::from_secs(30);

/// Longest accepted varint encoding for a `u64` operand.
pub(crate) const MAX_VARINT_BYTES: usize = 10;
