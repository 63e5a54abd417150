//! Declaration-site type information.
//!
//! A [`Definition`] binds a [`Primitive`] to the place it was declared:
//! its constancy, its data location, and (for module-level items) its
//! visibility. Two definitions of the same primitive compare equal, and a
//! definition always equals its own primitive - the extra facts describe
//! the declaration, not the type.

use std::fmt::{self, Display, Formatter};

use xxhash_rust::xxh64::xxh64;

use crate::span::Span;
use crate::types::Primitive;

/// Function mutability, ordered by how much state it may touch.
///
/// The derived ordering is the effect lattice the analyzer checks calls
/// against: `Pure < View < Nonpayable < Payable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mutability {
    /// Reads nothing outside its arguments.
    Pure,
    /// May read persistent state and the environment.
    View,
    /// May write persistent state; rejects attached value.
    Nonpayable,
    /// May write persistent state and receive value.
    Payable,
}

impl Mutability {
    pub fn as_str(self) -> &'static str {
        match self {
            Mutability::Pure => "pure",
            Mutability::View => "view",
            Mutability::Nonpayable => "nonpayable",
            Mutability::Payable => "payable",
        }
    }
}

impl Display for Mutability {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who may call a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Reachable through the runtime dispatcher.
    External,
    /// Reachable only via internal calls.
    Internal,
    /// Runs once, inside the deployment transaction.
    Deploy,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::External => "external",
            Visibility::Internal => "internal",
            Visibility::Deploy => "deploy",
        }
    }
}

/// Whether a binding may be written, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constancy {
    /// Folded at analysis; no runtime representation of its own.
    Constant,
    /// Written once during deployment, read-only afterwards.
    Immutable,
    /// Freely writable where mutability rules allow.
    Mutable,
}

/// Where a value lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// Persistent storage, rooted at a slot.
    Storage { slot: u64 },
    /// The function's static memory frame, word offset from its base.
    Memory { offset: u64 },
    /// Calldata argument, word index after the selector.
    Calldata { index: u64 },
    /// The immutable data segment, word offset.
    Data { offset: u64 },
    /// A transient evaluation-stack value.
    Stack,
}

/// A primitive bound to a declaration site.
#[derive(Debug, Clone, Eq)]
pub struct Definition {
    pub ty: Primitive,
    pub constancy: Constancy,
    pub location: Location,
    pub span: Span,
}

impl Definition {
    /// A transient value of the given type (expression results).
    pub fn stack(ty: Primitive) -> Self {
        Self {
            ty,
            constancy: Constancy::Mutable,
            location: Location::Stack,
            span: Span::default(),
        }
    }

    /// A storage-rooted definition.
    pub fn storage(ty: Primitive, slot: u64, span: Span) -> Self {
        Self {
            ty,
            constancy: Constancy::Mutable,
            location: Location::Storage { slot },
            span,
        }
    }

    /// A memory-frame local.
    pub fn memory(ty: Primitive, offset: u64, span: Span) -> Self {
        Self {
            ty,
            constancy: Constancy::Mutable,
            location: Location::Memory { offset },
            span,
        }
    }

    /// A folded module constant.
    pub fn constant(ty: Primitive, span: Span) -> Self {
        Self {
            ty,
            constancy: Constancy::Constant,
            location: Location::Stack,
            span,
        }
    }

    /// Whether assignment through this definition is ever legal.
    pub fn is_writable(&self) -> bool {
        matches!(self.constancy, Constancy::Mutable)
            && !matches!(self.location, Location::Calldata { .. } | Location::Data { .. })
    }

    /// Whether this definition denotes persistent state.
    pub fn is_storage(&self) -> bool {
        matches!(self.location, Location::Storage { .. })
    }
}

impl PartialEq for Definition {
    /// Definitions compare by type identity alone; declaration-site facts
    /// never make two occurrences of one type unequal.
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
    }
}

impl PartialEq<Primitive> for Definition {
    fn eq(&self, other: &Primitive) -> bool {
        self.ty == *other
    }
}

impl Display for Definition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)
    }
}

/// The callable signature built for each function by the module pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub name: String,
    pub visibility: Visibility,
    /// Declared mutability; `None` until inference fills it in.
    pub mutability: Option<Mutability>,
    pub params: Vec<(String, Primitive)>,
    pub ret: Option<Primitive>,
    pub nonreentrant: bool,
    pub span: Span,
}

impl FunctionSig {
    /// Canonical external signature, e.g. `transfer(address,uint256)`.
    pub fn canonical(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(_, ty)| ty.canonical_name())
            .collect();
        format!("{}({})", self.name, params.join(","))
    }

    /// 4-byte dispatch selector: the high bytes of xxh64 over the
    /// canonical signature.
    pub fn selector(&self) -> [u8; 4] {
        let hash = xxh64(self.canonical().as_bytes(), 0);
        hash.to_be_bytes()[..4].try_into().unwrap_or([0; 4])
    }

    /// The mutability the rest of the pipeline should assume.
    ///
    /// Falls back to `nonpayable` while inference has not run.
    pub fn effective_mutability(&self) -> Mutability {
        self.mutability.unwrap_or(Mutability::Nonpayable)
    }
}

/// One method of an external interface declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceMethod {
    pub name: String,
    pub params: Vec<Primitive>,
    pub ret: Option<Primitive>,
    pub mutability: Mutability,
    pub span: Span,
}

impl InterfaceMethod {
    pub fn canonical(&self) -> String {
        let params: Vec<String> =
            self.params.iter().map(Primitive::canonical_name).collect();
        format!("{}({})", self.name, params.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = xxh64(self.canonical().as_bytes(), 0);
        hash.to_be_bytes()[..4].try_into().unwrap_or([0; 4])
    }

    /// Whether calling this method may change the callee's state.
    pub fn is_state_changing(&self) -> bool {
        self.mutability >= Mutability::Nonpayable
    }
}
