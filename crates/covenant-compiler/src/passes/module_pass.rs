//! Module pass: register every top-level declaration.
//!
//! A single left-to-right sweep. Each declaration is processed on its
//! own: its first error aborts that declaration, but independent
//! declarations keep going and their errors are reported together. The
//! sweep assigns storage slots in declaration order, folds constants
//! immediately, constructs user types, and builds one callable signature
//! per function. Bodies are not entered here.

use covenant_core::ast::{
    ConstantDecl, Decl, EventDecl, FlagDecl, FunctionDecl, ImmutableDecl, InterfaceDecl, Module,
    StorageDecl, StructDecl,
};
use covenant_core::{
    AnalysisError, Definition, EventField, FunctionSig, InterfaceMethod, Mutability, Primitive,
    Span, Visibility,
};
use tracing::debug;

use crate::fold::ConstEval;
use crate::namespace::{Binding, Namespace};
use crate::registry::ModuleRegistry;
use crate::resolver::{TypePosition, TypeResolver};

/// Everything the module pass produced.
#[derive(Debug)]
pub struct ModulePassOutput {
    pub registry: ModuleRegistry,
    pub namespace: Namespace,
    /// Batched errors from independent declarations.
    pub errors: Vec<AnalysisError>,
}

impl ModulePassOutput {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The declaration sweep.
pub struct ModulePass {
    registry: ModuleRegistry,
    namespace: Namespace,
    errors: Vec<AnalysisError>,
    deploy_seen: Option<Span>,
}

impl ModulePass {
    pub fn new() -> Self {
        Self {
            registry: ModuleRegistry::new(),
            namespace: Namespace::new(),
            errors: Vec::new(),
            deploy_seen: None,
        }
    }

    /// Run the sweep over a module.
    pub fn run(mut self, module: &Module) -> ModulePassOutput {
        debug!(module = %module.name, decls = module.decls.len(), "module pass");
        for (index, decl) in module.decls.iter().enumerate() {
            let result = match decl {
                Decl::Storage(d) => self.storage_decl(d),
                Decl::Constant(d) => self.constant_decl(d),
                Decl::Immutable(d) => self.immutable_decl(d),
                Decl::Struct(d) => self.struct_decl(d),
                Decl::Flag(d) => self.flag_decl(d),
                Decl::Event(d) => self.event_decl(d),
                Decl::Interface(d) => self.interface_decl(d),
                Decl::Function(d) => self.function_decl(d, index),
            };
            if let Err(error) = result {
                self.errors.push(error);
            }
        }
        // The guard slot trails all user storage, so it is reserved only
        // once every declaration has claimed its slots.
        if self
            .registry
            .functions()
            .iter()
            .any(|f| f.sig.nonreentrant)
        {
            let slot = self.registry.reserve_reentrancy_slot();
            debug!(slot, "reserved reentrancy guard slot");
        }
        ModulePassOutput {
            registry: self.registry,
            namespace: self.namespace,
            errors: self.errors,
        }
    }

    fn storage_decl(&mut self, decl: &StorageDecl) -> Result<(), AnalysisError> {
        let ty = TypeResolver::new(&self.registry).resolve(&decl.ty, TypePosition::Storage)?;
        if decl.public && !ty.is_word_sized() {
            return Err(AnalysisError::InvalidType {
                message: format!("public storage variable '{}' must be word-sized", decl.name),
                span: decl.span,
            });
        }
        self.namespace
            .define(&decl.name, Binding::Storage(decl.name.clone()), decl.span)?;
        let slot = self
            .registry
            .register_storage(&decl.name, ty.clone(), decl.public, decl.span);
        if decl.public {
            // A public variable exposes a synthesized external getter.
            self.registry.register_function(
                FunctionSig {
                    name: decl.name.clone(),
                    visibility: Visibility::External,
                    mutability: Some(Mutability::View),
                    params: vec![],
                    ret: Some(ty),
                    nonreentrant: false,
                    span: decl.span,
                },
                None,
            );
        }
        debug!(name = %decl.name, slot, "storage variable");
        Ok(())
    }

    fn constant_decl(&mut self, decl: &ConstantDecl) -> Result<(), AnalysisError> {
        let ty = TypeResolver::new(&self.registry).resolve(&decl.ty, TypePosition::Value)?;
        let (_, value) = ConstEval::new(&self.registry).eval(&decl.value, Some(&ty))?;
        let def = Definition::constant(ty, decl.span);
        self.namespace
            .define_value(&decl.name, def.clone(), decl.span)?;
        self.registry.register_constant(&decl.name, def, value);
        Ok(())
    }

    fn immutable_decl(&mut self, decl: &ImmutableDecl) -> Result<(), AnalysisError> {
        let ty = TypeResolver::new(&self.registry).resolve(&decl.ty, TypePosition::Value)?;
        if !ty.is_word_sized() {
            return Err(AnalysisError::InvalidType {
                message: format!("immutable '{}' must be word-sized", decl.name),
                span: decl.span,
            });
        }
        let offset = self.registry.register_immutable(&decl.name, ty.clone(), decl.span);
        let def = Definition {
            ty,
            constancy: covenant_core::Constancy::Immutable,
            location: covenant_core::Location::Data { offset },
            span: decl.span,
        };
        self.namespace.define_value(&decl.name, def, decl.span)?;
        Ok(())
    }

    fn struct_decl(&mut self, decl: &StructDecl) -> Result<(), AnalysisError> {
        let mut fields = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            let ty = TypeResolver::new(&self.registry).resolve(&field.ty, TypePosition::Value)?;
            if fields.iter().any(|(name, _)| name == &field.name) {
                return Err(AnalysisError::NameCollision {
                    name: field.name.clone(),
                    span: field.span,
                    previous: decl.span,
                });
            }
            fields.push((field.name.clone(), ty));
        }
        let ty = Primitive::Struct {
            name: decl.name.clone(),
            fields,
        };
        self.namespace
            .define(&decl.name, Binding::Type(decl.name.clone()), decl.span)?;
        self.registry.register_type(&decl.name, ty);
        Ok(())
    }

    fn flag_decl(&mut self, decl: &FlagDecl) -> Result<(), AnalysisError> {
        if decl.members.is_empty() || decl.members.len() > 256 {
            return Err(AnalysisError::InvalidType {
                message: format!(
                    "flag '{}' needs between 1 and 256 members, has {}",
                    decl.name,
                    decl.members.len()
                ),
                span: decl.span,
            });
        }
        let mut members = Vec::with_capacity(decl.members.len());
        for (member, span) in &decl.members {
            if members.contains(member) {
                return Err(AnalysisError::NameCollision {
                    name: member.clone(),
                    span: *span,
                    previous: decl.span,
                });
            }
            members.push(member.clone());
        }
        let ty = Primitive::Flag {
            name: decl.name.clone(),
            members,
        };
        self.namespace
            .define(&decl.name, Binding::Type(decl.name.clone()), decl.span)?;
        self.registry.register_type(&decl.name, ty);
        Ok(())
    }

    fn event_decl(&mut self, decl: &EventDecl) -> Result<(), AnalysisError> {
        let mut fields = Vec::with_capacity(decl.fields.len());
        let mut indexed = 0;
        for field in &decl.fields {
            let ty = TypeResolver::new(&self.registry).resolve(&field.ty, TypePosition::Value)?;
            if !ty.is_word_sized() {
                return Err(AnalysisError::InvalidType {
                    message: format!("event field '{}' must be word-sized", field.name),
                    span: field.span,
                });
            }
            if field.indexed {
                indexed += 1;
            }
            fields.push(EventField {
                name: field.name.clone(),
                ty,
                indexed: field.indexed,
            });
        }
        if indexed > 3 {
            return Err(AnalysisError::InvalidType {
                message: format!("event '{}' indexes more than 3 fields", decl.name),
                span: decl.span,
            });
        }
        let ty = Primitive::Event {
            name: decl.name.clone(),
            fields,
        };
        self.namespace
            .define(&decl.name, Binding::Event(decl.name.clone()), decl.span)?;
        self.registry.register_event(&decl.name, ty);
        Ok(())
    }

    fn interface_decl(&mut self, decl: &InterfaceDecl) -> Result<(), AnalysisError> {
        let mut methods: Vec<InterfaceMethod> = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            if methods.iter().any(|m| m.name == method.name) {
                return Err(AnalysisError::NameCollision {
                    name: method.name.clone(),
                    span: method.span,
                    previous: decl.span,
                });
            }
            let mut params = Vec::with_capacity(method.params.len());
            for param in &method.params {
                params.push(
                    TypeResolver::new(&self.registry).resolve(param, TypePosition::Value)?,
                );
            }
            let ret = match &method.ret {
                Some(ty) => {
                    Some(TypeResolver::new(&self.registry).resolve(ty, TypePosition::Value)?)
                }
                None => None,
            };
            methods.push(InterfaceMethod {
                name: method.name.clone(),
                params,
                ret,
                mutability: method.mutability,
                span: method.span,
            });
        }
        self.namespace
            .define(&decl.name, Binding::Type(decl.name.clone()), decl.span)?;
        self.registry.register_type(
            &decl.name,
            Primitive::Interface {
                name: decl.name.clone(),
            },
        );
        self.registry.register_interface(&decl.name, methods);
        Ok(())
    }

    fn function_decl(&mut self, decl: &FunctionDecl, index: usize) -> Result<(), AnalysisError> {
        if decl.visibility == Visibility::Deploy {
            if let Some(previous) = self.deploy_seen {
                return Err(AnalysisError::NameCollision {
                    name: decl.name.clone(),
                    span: decl.span,
                    previous,
                });
            }
            self.deploy_seen = Some(decl.span);
        }
        if decl.visibility == Visibility::Internal && decl.mutability == Some(Mutability::Payable) {
            return Err(AnalysisError::InvalidOperation {
                message: format!("internal function '{}' cannot be payable", decl.name),
                span: decl.span,
            });
        }
        if decl.nonreentrant && decl.mutability == Some(Mutability::Pure) {
            return Err(AnalysisError::StateAccessViolation {
                message: format!("'{}' cannot be both nonreentrant and pure", decl.name),
                span: decl.span,
            });
        }
        let resolver = TypeResolver::new(&self.registry);
        let mut params = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            let ty = resolver.resolve(&param.ty, TypePosition::Value)?;
            if params.iter().any(|(name, _)| name == &param.name) {
                return Err(AnalysisError::NameCollision {
                    name: param.name.clone(),
                    span: param.span,
                    previous: decl.span,
                });
            }
            if decl.visibility != Visibility::Internal && !ty.is_word_sized() {
                return Err(AnalysisError::InvalidType {
                    message: format!(
                        "parameter '{}' of an externally-visible function must be word-sized",
                        param.name
                    ),
                    span: param.span,
                });
            }
            params.push((param.name.clone(), ty));
        }
        let ret = match &decl.ret {
            Some(ty) => Some(resolver.resolve(ty, TypePosition::Value)?),
            None => None,
        };
        // Return values cross either the stack (internal: one word) or
        // the ABI buffer (external/deploy: words of a scalar or tuple).
        if let Some(ret_ty) = &ret {
            let ok = if decl.visibility == Visibility::Internal {
                ret_ty.is_word_sized()
            } else {
                match ret_ty {
                    Primitive::Tuple { items } => {
                        !items.is_empty() && items.iter().all(Primitive::is_word_sized)
                    }
                    other => other.is_word_sized(),
                }
            };
            if !ok {
                return Err(AnalysisError::InvalidType {
                    message: format!(
                        "function '{}' cannot return {}",
                        decl.name,
                        ret_ty.canonical_name()
                    ),
                    span: decl.span,
                });
            }
        }
        let sig = FunctionSig {
            name: decl.name.clone(),
            visibility: decl.visibility,
            mutability: decl.mutability,
            params,
            ret,
            nonreentrant: decl.nonreentrant,
            span: decl.span,
        };
        // Selector collisions between external functions are a namespace
        // problem even though the odds are astronomical.
        if sig.visibility == Visibility::External {
            let selector = sig.selector();
            for other in self.registry.external_functions() {
                if other.sig.selector() == selector {
                    return Err(AnalysisError::NameCollision {
                        name: decl.name.clone(),
                        span: decl.span,
                        previous: other.sig.span,
                    });
                }
            }
        }
        self.namespace
            .define(&decl.name, Binding::Function(decl.name.clone()), decl.span)?;
        self.registry.register_function(sig, Some(index));
        Ok(())
    }
}

impl Default for ModulePass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::ast::{NodeIds, TypeExpr};
    use covenant_core::Word;

    fn named(ids: &mut NodeIds, name: &str) -> TypeExpr {
        TypeExpr::Named {
            id: ids.next(),
            span: Span::default(),
            name: name.to_string(),
        }
    }

    fn storage(ids: &mut NodeIds, name: &str, ty: &str) -> Decl {
        Decl::Storage(StorageDecl {
            id: ids.next(),
            span: Span::default(),
            name: name.to_string(),
            ty: named(ids, ty),
            public: false,
        })
    }

    fn module(decls: Vec<Decl>) -> Module {
        Module {
            name: "test".to_string(),
            decls,
        }
    }

    #[test]
    fn slots_in_declaration_order() {
        let mut ids = NodeIds::new();
        let out = ModulePass::new().run(&module(vec![
            storage(&mut ids, "a", "uint256"),
            storage(&mut ids, "b", "bool"),
        ]));
        assert!(out.is_success());
        let a = out.registry.storage_var("a").unwrap();
        let b = out.registry.storage_var("b").unwrap();
        assert_eq!(a.def.location, covenant_core::Location::Storage { slot: 0 });
        assert_eq!(b.def.location, covenant_core::Location::Storage { slot: 1 });
    }

    #[test]
    fn constants_fold_immediately() {
        let mut ids = NodeIds::new();
        let decl = Decl::Constant(ConstantDecl {
            id: ids.next(),
            span: Span::default(),
            name: "LIMIT".to_string(),
            ty: named(&mut ids, "uint256"),
            value: covenant_core::ast::Expr::Int {
                id: ids.next(),
                span: Span::default(),
                negative: false,
                magnitude: Word::from_u64(100),
            },
        });
        let out = ModulePass::new().run(&module(vec![decl]));
        assert!(out.is_success());
        let (def, value) = out.registry.constant("LIMIT").unwrap();
        assert_eq!(def.ty, Primitive::UINT256);
        assert_eq!(value, &covenant_core::Value::Uint(Word::from_u64(100)));
    }

    #[test]
    fn duplicate_names_batch_with_other_errors() {
        let mut ids = NodeIds::new();
        let out = ModulePass::new().run(&module(vec![
            storage(&mut ids, "x", "uint256"),
            storage(&mut ids, "x", "uint256"),
            storage(&mut ids, "y", "no_such_type"),
        ]));
        assert_eq!(out.errors.len(), 2);
        assert!(matches!(out.errors[0], AnalysisError::NameCollision { .. }));
        assert!(matches!(out.errors[1], AnalysisError::InvalidType { .. }));
        // The valid declaration still registered.
        assert!(out.registry.storage_var("x").is_some());
    }

    #[test]
    fn nonreentrant_pure_rejected() {
        let mut ids = NodeIds::new();
        let decl = Decl::Function(FunctionDecl {
            id: ids.next(),
            span: Span::default(),
            name: "f".to_string(),
            visibility: Visibility::External,
            mutability: Some(Mutability::Pure),
            nonreentrant: true,
            params: vec![],
            ret: None,
            body: vec![],
        });
        let out = ModulePass::new().run(&module(vec![decl]));
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(
            out.errors[0],
            AnalysisError::StateAccessViolation { .. }
        ));
    }

    #[test]
    fn guard_slot_reserved_after_user_storage() {
        let mut ids = NodeIds::new();
        let f = Decl::Function(FunctionDecl {
            id: ids.next(),
            span: Span::default(),
            name: "f".to_string(),
            visibility: Visibility::External,
            mutability: Some(Mutability::Nonpayable),
            nonreentrant: true,
            params: vec![],
            ret: None,
            body: vec![],
        });
        let out = ModulePass::new().run(&module(vec![storage(&mut ids, "a", "uint256"), f]));
        assert!(out.is_success());
        assert_eq!(out.registry.reentrancy_slot(), Some(1));
    }

    #[test]
    fn public_storage_synthesizes_getter() {
        let mut ids = NodeIds::new();
        let decl = Decl::Storage(StorageDecl {
            id: ids.next(),
            span: Span::default(),
            name: "total".to_string(),
            ty: named(&mut ids, "uint256"),
            public: true,
        });
        let out = ModulePass::new().run(&module(vec![decl]));
        assert!(out.is_success());
        let getter = out.registry.function("total").unwrap();
        assert_eq!(getter.sig.visibility, Visibility::External);
        assert_eq!(getter.sig.mutability, Some(Mutability::View));
        assert_eq!(getter.sig.ret, Some(Primitive::UINT256));
    }

    #[test]
    fn second_deploy_function_rejected() {
        let mut ids = NodeIds::new();
        let deploy = |ids: &mut NodeIds, name: &str| {
            Decl::Function(FunctionDecl {
                id: ids.next(),
                span: Span::default(),
                name: name.to_string(),
                visibility: Visibility::Deploy,
                mutability: None,
                nonreentrant: false,
                params: vec![],
                ret: None,
                body: vec![],
            })
        };
        let out = ModulePass::new().run(&module(vec![
            deploy(&mut ids, "init"),
            deploy(&mut ids, "init2"),
        ]));
        assert_eq!(out.errors.len(), 1);
    }
}
