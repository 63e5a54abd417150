//! Capability groups over primitives.
//!
//! Operators and builtins validate their operands against capabilities
//! rather than exact types: `+` wants `NUMERIC`, `<` wants `COMPARABLE`,
//! `len()` wants `SEQUENCE`, a mapping key wants `MAPPING_KEY`.

use bitflags::bitflags;

bitflags! {
    /// Abstract properties a primitive can expose.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capability: u8 {
        /// Supports arithmetic operators.
        const NUMERIC = 1 << 0;
        /// Supports ordering comparisons.
        const COMPARABLE = 1 << 1;
        /// Fixed-length indexable sequence (`len`, iteration, subscript).
        const SEQUENCE = 1 << 2;
        /// Usable as a mapping key (word-encodable scalar).
        const MAPPING_KEY = 1 << 3;
        /// Fixed-width byte string supporting bitwise operators.
        const PACKED = 1 << 4;
        /// Flag set supporting bitwise union/intersection.
        const FLAG_SET = 1 << 5;
    }
}
