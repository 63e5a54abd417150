//! Canonical type identities.
//!
//! A [`Primitive`] is one concrete type the language can express: an
//! integer of a given width and signedness, `bool`, `address`, a
//! fixed-width byte string, or a constructed container/user type. Each
//! primitive has exactly one canonical spelling, and its [`TypeId`] is a
//! deterministic hash of that spelling - structurally equal containers
//! therefore share an identity without a separate interning pass.

use std::fmt::{self, Display, Formatter};

use xxhash_rust::xxh64::xxh64;

use crate::capability::Capability;

/// Deterministic identity of a primitive, hashed from its canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u64);

impl TypeId {
    /// Compute the id for a canonical type name.
    pub fn from_name(name: &str) -> Self {
        TypeId(xxh64(name.as_bytes(), 0))
    }
}

impl Display for TypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// One concrete type.
///
/// User types (struct/flag/event/interface) are constructed once from
/// their declarations by the module pass and compared structurally like
/// the built-in containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Unsigned integer. `bits` is a multiple of 8 in `8..=256`.
    Uint { bits: u16 },
    /// Signed integer in two's complement. Same widths as `Uint`.
    Int { bits: u16 },
    Bool,
    /// Account address; low 160 bits significant.
    Address,
    /// Fixed-width byte string, `len` in `1..=32`.
    Bytes { len: u8 },
    /// Fixed-length array.
    Array { elem: Box<Primitive>, len: u64 },
    /// Tuple; appears in return positions only.
    Tuple { items: Vec<Primitive> },
    /// Key/value mapping. Storage-only; occupies a single root slot.
    Mapping { key: Box<Primitive>, value: Box<Primitive> },
    Struct {
        name: String,
        fields: Vec<(String, Primitive)>,
    },
    /// Closed set of power-of-two members combined bitwise.
    Flag { name: String, members: Vec<String> },
    Event {
        name: String,
        fields: Vec<EventField>,
    },
    /// Handle to an external contract described by an interface.
    Interface { name: String },
}

/// One field of an event payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventField {
    pub name: String,
    pub ty: Primitive,
    /// Indexed fields become topics instead of data words.
    pub indexed: bool,
}

impl Primitive {
    pub const UINT256: Primitive = Primitive::Uint { bits: 256 };
    pub const INT256: Primitive = Primitive::Int { bits: 256 };

    /// The canonical spelling this type hashes under.
    pub fn canonical_name(&self) -> String {
        match self {
            Primitive::Uint { bits } => format!("uint{bits}"),
            Primitive::Int { bits } => format!("int{bits}"),
            Primitive::Bool => "bool".to_string(),
            Primitive::Address => "address".to_string(),
            Primitive::Bytes { len } => format!("bytes{len}"),
            Primitive::Array { elem, len } => {
                format!("{}[{len}]", elem.canonical_name())
            }
            Primitive::Tuple { items } => {
                let inner: Vec<String> =
                    items.iter().map(Primitive::canonical_name).collect();
                format!("({})", inner.join(","))
            }
            Primitive::Mapping { key, value } => format!(
                "map[{}]{}",
                key.canonical_name(),
                value.canonical_name()
            ),
            Primitive::Struct { name, .. } => format!("struct {name}"),
            Primitive::Flag { name, .. } => format!("flag {name}"),
            Primitive::Event { name, .. } => format!("event {name}"),
            Primitive::Interface { name } => format!("interface {name}"),
        }
    }

    /// Deterministic identity derived from the canonical name.
    pub fn type_id(&self) -> TypeId {
        TypeId::from_name(&self.canonical_name())
    }

    /// The capability groups this type belongs to.
    pub fn capabilities(&self) -> Capability {
        match self {
            Primitive::Uint { .. } | Primitive::Int { .. } => {
                Capability::NUMERIC | Capability::COMPARABLE | Capability::MAPPING_KEY
            }
            Primitive::Bool => Capability::MAPPING_KEY,
            Primitive::Address => Capability::COMPARABLE | Capability::MAPPING_KEY,
            Primitive::Bytes { .. } => {
                Capability::COMPARABLE | Capability::MAPPING_KEY | Capability::PACKED
            }
            Primitive::Array { .. } => Capability::SEQUENCE,
            Primitive::Flag { .. } => Capability::FLAG_SET,
            Primitive::Tuple { .. }
            | Primitive::Mapping { .. }
            | Primitive::Struct { .. }
            | Primitive::Event { .. }
            | Primitive::Interface { .. } => Capability::empty(),
        }
    }

    /// Whether this is an integer of either signedness.
    pub fn is_integer(&self) -> bool {
        matches!(self, Primitive::Uint { .. } | Primitive::Int { .. })
    }

    /// Integer width, when integral.
    pub fn int_bits(&self) -> Option<u16> {
        match self {
            Primitive::Uint { bits } | Primitive::Int { bits } => Some(*bits),
            _ => None,
        }
    }

    /// Whether this is a signed integer.
    pub fn is_signed(&self) -> bool {
        matches!(self, Primitive::Int { .. })
    }

    /// Whether values of this type fit in a single VM word.
    pub fn is_word_sized(&self) -> bool {
        matches!(
            self,
            Primitive::Uint { .. }
                | Primitive::Int { .. }
                | Primitive::Bool
                | Primitive::Address
                | Primitive::Bytes { .. }
                | Primitive::Flag { .. }
                | Primitive::Interface { .. }
        )
    }

    /// Storage footprint in slots / memory footprint in words.
    ///
    /// Every scalar takes a full word; aggregates are laid out densely,
    /// one word per scalar element. A mapping occupies only its root slot
    /// (elements live at hashed slots).
    pub fn word_count(&self) -> u64 {
        match self {
            Primitive::Array { elem, len } => elem.word_count() * len,
            Primitive::Tuple { items } => {
                items.iter().map(Primitive::word_count).sum()
            }
            Primitive::Struct { fields, .. } => {
                fields.iter().map(|(_, ty)| ty.word_count()).sum()
            }
            Primitive::Mapping { .. } => 1,
            _ => 1,
        }
    }

    /// Fixed iteration length, for sequence types.
    pub fn sequence_len(&self) -> Option<u64> {
        match self {
            Primitive::Array { len, .. } => Some(*len),
            _ => None,
        }
    }

    /// Element type, for sequence types.
    pub fn sequence_elem(&self) -> Option<&Primitive> {
        match self {
            Primitive::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Word offset of a named struct field, with its type.
    pub fn field(&self, name: &str) -> Option<(u64, &Primitive)> {
        match self {
            Primitive::Struct { fields, .. } => {
                let mut offset = 0;
                for (field_name, ty) in fields {
                    if field_name == name {
                        return Some((offset, ty));
                    }
                    offset += ty.word_count();
                }
                None
            }
            _ => None,
        }
    }
}

impl Display for Primitive {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}
