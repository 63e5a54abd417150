//! Per-module registration of declarations.
//!
//! The module pass fills a [`ModuleRegistry`] with everything the local
//! pass and the lowering stages resolve against: user types, the storage
//! layout, folded constants, immutables and their data-segment offsets,
//! function signatures, events, and interfaces. Iteration orders are
//! declaration orders - maps are only an index over the `Vec`s.

use covenant_core::{
    Definition, FunctionSig, InterfaceMethod, Primitive, Span, Value, Visibility, Word,
};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh64::xxh64;

/// A registered storage variable.
#[derive(Debug, Clone)]
pub struct StorageVar {
    pub name: String,
    pub def: Definition,
    pub public: bool,
}

/// A registered immutable with its data-segment offset.
#[derive(Debug, Clone)]
pub struct ImmutableVar {
    pub name: String,
    pub ty: Primitive,
    pub offset: u64,
    pub span: Span,
}

/// A registered function: signature plus its declaration index.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub sig: FunctionSig,
    /// Index into `Module::decls`, for body lookup in later phases.
    /// `None` for synthesized functions (public storage getters).
    pub decl_index: Option<usize>,
}

/// Everything the module pass learned about one compilation unit.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    types: FxHashMap<String, Primitive>,
    storage: Vec<StorageVar>,
    storage_index: FxHashMap<String, usize>,
    constants: FxHashMap<String, (Definition, Value)>,
    immutables: Vec<ImmutableVar>,
    immutable_index: FxHashMap<String, usize>,
    functions: Vec<FunctionInfo>,
    function_index: FxHashMap<String, usize>,
    events: FxHashMap<String, Primitive>,
    interfaces: FxHashMap<String, Vec<InterfaceMethod>>,
    next_slot: u64,
    data_words: u64,
    /// Slot of the reentrancy guard, reserved after all user storage.
    reentrancy_slot: Option<u64>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ==========================================================================
    // User types
    // ==========================================================================

    pub fn register_type(&mut self, name: &str, ty: Primitive) {
        self.types.insert(name.to_string(), ty);
    }

    pub fn user_type(&self, name: &str) -> Option<&Primitive> {
        self.types.get(name)
    }

    // ==========================================================================
    // Storage
    // ==========================================================================

    /// Allocate the next storage slots for a variable of the given type.
    pub fn register_storage(&mut self, name: &str, ty: Primitive, public: bool, span: Span) -> u64 {
        let slot = self.next_slot;
        self.next_slot += ty.word_count();
        let var = StorageVar {
            name: name.to_string(),
            def: Definition::storage(ty, slot, span),
            public,
        };
        self.storage_index.insert(name.to_string(), self.storage.len());
        self.storage.push(var);
        slot
    }

    pub fn storage_var(&self, name: &str) -> Option<&StorageVar> {
        self.storage_index.get(name).map(|&i| &self.storage[i])
    }

    pub fn storage_vars(&self) -> &[StorageVar] {
        &self.storage
    }

    /// Total slots in use, the guard slot included once reserved.
    pub fn storage_slots(&self) -> u64 {
        self.next_slot
    }

    /// Reserve the reentrancy guard slot (idempotent).
    pub fn reserve_reentrancy_slot(&mut self) -> u64 {
        match self.reentrancy_slot {
            Some(slot) => slot,
            None => {
                let slot = self.next_slot;
                self.next_slot += 1;
                self.reentrancy_slot = Some(slot);
                slot
            }
        }
    }

    pub fn reentrancy_slot(&self) -> Option<u64> {
        self.reentrancy_slot
    }

    // ==========================================================================
    // Constants & immutables
    // ==========================================================================

    pub fn register_constant(&mut self, name: &str, def: Definition, value: Value) {
        self.constants.insert(name.to_string(), (def, value));
    }

    pub fn constant(&self, name: &str) -> Option<&(Definition, Value)> {
        self.constants.get(name)
    }

    /// Allocate data-segment words for an immutable.
    pub fn register_immutable(&mut self, name: &str, ty: Primitive, span: Span) -> u64 {
        let offset = self.data_words;
        self.data_words += ty.word_count();
        self.immutable_index
            .insert(name.to_string(), self.immutables.len());
        self.immutables.push(ImmutableVar {
            name: name.to_string(),
            ty,
            offset,
            span,
        });
        offset
    }

    pub fn immutable(&self, name: &str) -> Option<&ImmutableVar> {
        self.immutable_index.get(name).map(|&i| &self.immutables[i])
    }

    pub fn immutables(&self) -> &[ImmutableVar] {
        &self.immutables
    }

    /// Size of the post-deployment data segment in words.
    pub fn data_words(&self) -> u64 {
        self.data_words
    }

    // ==========================================================================
    // Functions
    // ==========================================================================

    pub fn register_function(&mut self, sig: FunctionSig, decl_index: Option<usize>) {
        self.function_index
            .insert(sig.name.clone(), self.functions.len());
        self.functions.push(FunctionInfo { sig, decl_index });
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.function_index.get(name).map(|&i| &self.functions[i])
    }

    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    /// Record the mutability inference result for a function.
    pub fn set_function_mutability(&mut self, name: &str, mutability: covenant_core::Mutability) {
        if let Some(&i) = self.function_index.get(name) {
            self.functions[i].sig.mutability = Some(mutability);
        }
    }

    /// The deploy-visibility function, if declared.
    pub fn deploy_function(&self) -> Option<&FunctionInfo> {
        self.functions
            .iter()
            .find(|f| f.sig.visibility == Visibility::Deploy)
    }

    /// External functions in declaration order (dispatcher order).
    pub fn external_functions(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions
            .iter()
            .filter(|f| f.sig.visibility == Visibility::External)
    }

    // ==========================================================================
    // Events & interfaces
    // ==========================================================================

    pub fn register_event(&mut self, name: &str, ty: Primitive) {
        self.events.insert(name.to_string(), ty);
    }

    pub fn event(&self, name: &str) -> Option<&Primitive> {
        self.events.get(name)
    }

    /// Deterministic 32-byte topic identifying an event signature.
    pub fn event_topic(event: &Primitive) -> Word {
        let Primitive::Event { name, fields } = event else {
            return Word::ZERO;
        };
        let field_names: Vec<String> = fields
            .iter()
            .map(|f| f.ty.canonical_name())
            .collect();
        let canonical = format!("{name}({})", field_names.join(","));
        let mut bytes = [0u8; 32];
        for seed in 0..4u64 {
            let hash = xxh64(canonical.as_bytes(), seed);
            let start = (seed as usize) * 8;
            bytes[start..start + 8].copy_from_slice(&hash.to_be_bytes());
        }
        Word::from_be_bytes(bytes)
    }

    pub fn register_interface(&mut self, name: &str, methods: Vec<InterfaceMethod>) {
        self.interfaces.insert(name.to_string(), methods);
    }

    pub fn interface(&self, name: &str) -> Option<&[InterfaceMethod]> {
        self.interfaces.get(name).map(Vec::as_slice)
    }

    pub fn interface_method(&self, iface: &str, method: &str) -> Option<&InterfaceMethod> {
        self.interface(iface)?.iter().find(|m| m.name == method)
    }
}
