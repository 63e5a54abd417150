//! End-to-end pipeline tests.
//!
//! These compile hand-built modules (the front-end is external to this
//! workspace) down to bytecode and then actually run the blobs on a
//! small reference interpreter of the target VM: the deployment blob is
//! executed as a constructor, and calls go through the runtime
//! dispatcher with real calldata.

use std::cell::Cell;
use std::collections::HashMap;

use pretty_assertions::assert_eq;

use covenant::ast::{
    BinOp, CmpOp, Decl, Expr, FlagDecl, ForIter, FunctionDecl, ImmutableDecl, InterfaceDecl,
    InterfaceMethodDecl, Module, NodeId, Param, Stmt, StorageDecl, TypeExpr,
};
use covenant::asm::Op;
use covenant::{
    compile, compile_with, CompilerOptions, Mutability, OptLevel, Span, Visibility, VmVersion,
    Word,
};

// ============================================================================
// Tree building
// ============================================================================

/// Hands out node ids the way the front-end would.
struct Build {
    next: Cell<u32>,
}

impl Build {
    fn new() -> Self {
        Self { next: Cell::new(0) }
    }

    fn id(&self) -> NodeId {
        let id = NodeId(self.next.get());
        self.next.set(self.next.get() + 1);
        id
    }

    /// A distinct synthetic position per node, the way a front-end
    /// would attach real ones.
    fn span(&self) -> Span {
        let n = self.next.get();
        Span::new(n, 1, n + 1, 1)
    }

    fn module(&self, decls: Vec<Decl>) -> Module {
        Module {
            name: "test".to_string(),
            decls,
        }
    }

    fn ty(&self, name: &str) -> TypeExpr {
        TypeExpr::Named {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
        }
    }

    fn storage(&self, name: &str, ty: &str) -> Decl {
        Decl::Storage(StorageDecl {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            ty: self.ty(ty),
            public: false,
        })
    }

    fn storage_map(&self, name: &str, key: &str, value: &str) -> Decl {
        Decl::Storage(StorageDecl {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            ty: TypeExpr::Map {
                id: self.id(),
                span: self.span(),
                key: Box::new(self.ty(key)),
                value: Box::new(self.ty(value)),
            },
            public: false,
        })
    }

    fn storage_array(&self, name: &str, elem: &str, len: u64) -> Decl {
        Decl::Storage(StorageDecl {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            ty: TypeExpr::Array {
                id: self.id(),
                span: self.span(),
                elem: Box::new(self.ty(elem)),
                len: Box::new(self.int(len)),
            },
            public: false,
        })
    }

    fn immutable(&self, name: &str, ty: &str) -> Decl {
        Decl::Immutable(ImmutableDecl {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            ty: self.ty(ty),
        })
    }

    fn flag(&self, name: &str, members: &[&str]) -> Decl {
        Decl::Flag(FlagDecl {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            members: members
                .iter()
                .map(|m| (m.to_string(), self.span()))
                .collect(),
        })
    }

    fn event(&self, name: &str, fields: &[(&str, &str, bool)]) -> Decl {
        Decl::Event(covenant::ast::EventDecl {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(fname, fty, indexed)| covenant::ast::EventFieldDecl {
                    span: self.span(),
                    name: fname.to_string(),
                    ty: self.ty(fty),
                    indexed: *indexed,
                })
                .collect(),
        })
    }

    fn interface(&self, name: &str, methods: Vec<InterfaceMethodDecl>) -> Decl {
        Decl::Interface(InterfaceDecl {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            methods,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn function(
        &self,
        name: &str,
        visibility: Visibility,
        mutability: Option<Mutability>,
        nonreentrant: bool,
        params: &[(&str, &str)],
        ret: Option<&str>,
        body: Vec<Stmt>,
    ) -> Decl {
        Decl::Function(FunctionDecl {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            visibility,
            mutability,
            nonreentrant,
            params: params
                .iter()
                .map(|(pname, pty)| Param {
                    id: self.id(),
                    span: self.span(),
                    name: pname.to_string(),
                    ty: self.ty(pty),
                })
                .collect(),
            ret: ret.map(|r| self.ty(r)),
            body,
        })
    }

    fn int(&self, value: u64) -> Expr {
        Expr::Int {
            id: self.id(),
            span: self.span(),
            negative: false,
            magnitude: Word::from_u64(value),
        }
    }

    fn name(&self, name: &str) -> Expr {
        Expr::Name {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
        }
    }

    fn self_field(&self, name: &str) -> Expr {
        Expr::SelfField {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
        }
    }

    fn attribute(&self, base: Expr, attr: &str) -> Expr {
        Expr::Attribute {
            id: self.id(),
            span: self.span(),
            base: Box::new(base),
            attr: attr.to_string(),
        }
    }

    fn subscript(&self, base: Expr, index: Expr) -> Expr {
        Expr::Subscript {
            id: self.id(),
            span: self.span(),
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    fn binary(&self, op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            id: self.id(),
            span: self.span(),
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn compare(&self, op: CmpOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            id: self.id(),
            span: self.span(),
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn internal_call(&self, name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            id: self.id(),
            span: self.span(),
            func: Box::new(self.self_field(name)),
            args,
        }
    }

    fn assign(&self, target: Expr, value: Expr) -> Stmt {
        Stmt::Assign {
            id: self.id(),
            span: self.span(),
            target,
            value,
        }
    }

    fn aug(&self, op: BinOp, target: Expr, value: Expr) -> Stmt {
        Stmt::AugAssign {
            id: self.id(),
            span: self.span(),
            op,
            target,
            value,
        }
    }

    fn ret(&self, value: Option<Expr>) -> Stmt {
        Stmt::Return {
            id: self.id(),
            span: self.span(),
            value,
        }
    }

    fn let_stmt(&self, name: &str, ty: Option<&str>, value: Expr) -> Stmt {
        Stmt::Let {
            id: self.id(),
            span: self.span(),
            name: name.to_string(),
            ty: ty.map(|t| self.ty(t)),
            value,
        }
    }

    fn if_stmt(&self, cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Stmt {
        Stmt::If {
            id: self.id(),
            span: self.span(),
            cond,
            then_body,
            else_body,
        }
    }

    fn for_range(&self, var: &str, stop: Expr, bound: Option<Expr>, body: Vec<Stmt>) -> Stmt {
        Stmt::For {
            id: self.id(),
            span: self.span(),
            var: var.to_string(),
            var_span: self.span(),
            iter: ForIter::Range {
                start: None,
                stop,
                bound,
            },
            body,
        }
    }

    fn for_seq(&self, var: &str, seq: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::For {
            id: self.id(),
            span: self.span(),
            var: var.to_string(),
            var_span: self.span(),
            iter: ForIter::Sequence(seq),
            body,
        }
    }

    fn log(&self, event: &str, args: Vec<Expr>) -> Stmt {
        Stmt::Log {
            id: self.id(),
            span: self.span(),
            event: event.to_string(),
            args,
        }
    }

    fn pass(&self) -> Stmt {
        Stmt::Pass {
            id: self.id(),
            span: self.span(),
        }
    }
}

// ============================================================================
// Reference interpreter
// ============================================================================

#[derive(Debug, PartialEq)]
enum Outcome {
    /// `RETURN` with the returned bytes.
    Return(Vec<u8>),
    /// `STOP`: success, no data.
    Stop,
    /// `REVERT`: transaction aborted, state rolled back by the caller.
    Revert,
}

#[derive(Debug, Default)]
struct LogRecord {
    topics: Vec<Word>,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Env {
    storage: HashMap<Word, Word>,
    logs: Vec<LogRecord>,
}

struct CallCtx<'a> {
    calldata: &'a [u8],
    value: u64,
    caller: Word,
}

const STEP_LIMIT: usize = 1 << 20;

/// Execute one blob. Storage writes land in a scratch copy that is
/// committed only on success, mirroring transactional semantics.
fn execute(code: &[u8], env: &mut Env, call: &CallCtx<'_>) -> Outcome {
    let mut storage = env.storage.clone();
    let mut logs = Vec::new();
    let mut stack: Vec<Word> = Vec::new();
    let mut memory: Vec<u8> = Vec::new();
    let mut pc = 0usize;

    fn grow(memory: &mut Vec<u8>, end: usize) {
        if memory.len() < end {
            memory.resize(end, 0);
        }
    }
    fn mem_word(memory: &mut Vec<u8>, offset: usize) -> Word {
        grow(memory, offset + 32);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&memory[offset..offset + 32]);
        Word::from_be_bytes(bytes)
    }
    fn scramble(bytes: &[u8]) -> Word {
        // Any deterministic digest works for the reference machine.
        let mut acc = [0x9e3779b97f4a7c15u64; 4];
        for (index, byte) in bytes.iter().enumerate() {
            let lane = index % 4;
            acc[lane] = acc[lane]
                .rotate_left(9)
                .wrapping_mul(0x100000001b3)
                .wrapping_add(u64::from(*byte) + index as u64);
        }
        let mut out = [0u8; 32];
        for (lane, value) in acc.iter().enumerate() {
            out[lane * 8..lane * 8 + 8].copy_from_slice(&value.to_be_bytes());
        }
        Word::from_be_bytes(out)
    }

    for _ in 0..STEP_LIMIT {
        let Some(&byte) = code.get(pc) else {
            // Falling off the end halts cleanly.
            env.storage = storage;
            env.logs.extend(logs);
            return Outcome::Stop;
        };
        let Ok(op) = Op::try_from(byte) else {
            return Outcome::Revert;
        };
        pc += 1;
        macro_rules! pop {
            () => {
                match stack.pop() {
                    Some(word) => word,
                    None => return Outcome::Revert,
                }
            };
        }
        match op {
            Op::Stop => {
                env.storage = storage;
                env.logs.extend(logs);
                return Outcome::Stop;
            }
            Op::Add => {
                let (a, b) = (pop!(), pop!());
                stack.push(a.overflowing_add(b).0);
            }
            Op::Mul => {
                let (a, b) = (pop!(), pop!());
                stack.push(a.wrapping_mul(b));
            }
            Op::Sub => {
                let (a, b) = (pop!(), pop!());
                stack.push(a.overflowing_sub(b).0);
            }
            Op::Div => {
                let (a, b) = (pop!(), pop!());
                stack.push(a.checked_div_rem(b).map_or(Word::ZERO, |(q, _)| q));
            }
            Op::Sdiv => {
                let (a, b) = (pop!(), pop!());
                let q = if b.is_zero() {
                    Word::ZERO
                } else if a == Word::signed_min() && b == Word::MAX {
                    Word::signed_min()
                } else {
                    a.checked_signed_div_rem(b).map_or(Word::ZERO, |(q, _)| q)
                };
                stack.push(q);
            }
            Op::Mod => {
                let (a, b) = (pop!(), pop!());
                stack.push(a.checked_div_rem(b).map_or(Word::ZERO, |(_, r)| r));
            }
            Op::Smod => {
                let (a, b) = (pop!(), pop!());
                let r = if b.is_zero() {
                    Word::ZERO
                } else {
                    a.checked_signed_div_rem(b).map_or(Word::ZERO, |(_, r)| r)
                };
                stack.push(r);
            }
            Op::Lt => {
                let (a, b) = (pop!(), pop!());
                stack.push(if a < b { Word::ONE } else { Word::ZERO });
            }
            Op::Gt => {
                let (a, b) = (pop!(), pop!());
                stack.push(if a > b { Word::ONE } else { Word::ZERO });
            }
            Op::Slt => {
                let (a, b) = (pop!(), pop!());
                stack.push(if a.signed_cmp(b) == std::cmp::Ordering::Less {
                    Word::ONE
                } else {
                    Word::ZERO
                });
            }
            Op::Sgt => {
                let (a, b) = (pop!(), pop!());
                stack.push(if a.signed_cmp(b) == std::cmp::Ordering::Greater {
                    Word::ONE
                } else {
                    Word::ZERO
                });
            }
            Op::Eq => {
                let (a, b) = (pop!(), pop!());
                stack.push(if a == b { Word::ONE } else { Word::ZERO });
            }
            Op::IsZero => {
                let a = pop!();
                stack.push(if a.is_zero() { Word::ONE } else { Word::ZERO });
            }
            Op::And => {
                let (a, b) = (pop!(), pop!());
                stack.push(a.bitand(b));
            }
            Op::Or => {
                let (a, b) = (pop!(), pop!());
                stack.push(a.bitor(b));
            }
            Op::Xor => {
                let (a, b) = (pop!(), pop!());
                stack.push(a.bitxor(b));
            }
            Op::Not => {
                let a = pop!();
                stack.push(a.bitnot());
            }
            Op::Shl => {
                let (shift, value) = (pop!(), pop!());
                let result = match shift.to_u64() {
                    Some(s) if s < 256 => {
                        let mut word = value;
                        let mut bytes = word.to_be_bytes().to_vec();
                        bytes.rotate_left((s / 8) as usize);
                        for slot in bytes.iter_mut().rev().take((s / 8) as usize) {
                            *slot = 0;
                        }
                        word = Word::from_be_bytes(bytes.try_into().unwrap());
                        for _ in 0..(s % 8) {
                            word = word.overflowing_add(word).0;
                        }
                        word
                    }
                    _ => Word::ZERO,
                };
                stack.push(result);
            }
            Op::Shr => {
                let (shift, value) = (pop!(), pop!());
                let result = match shift.to_u64() {
                    Some(s) if s < 256 => {
                        let mut bytes = value.to_be_bytes().to_vec();
                        bytes.rotate_right((s / 8) as usize);
                        for slot in bytes.iter_mut().take((s / 8) as usize) {
                            *slot = 0;
                        }
                        let mut word = Word::from_be_bytes(bytes.try_into().unwrap());
                        for _ in 0..(s % 8) {
                            word = word
                                .checked_div_rem(Word::from_u64(2))
                                .map(|(q, _)| q)
                                .unwrap_or(Word::ZERO);
                        }
                        word
                    }
                    _ => Word::ZERO,
                };
                stack.push(result);
            }
            Op::Hash => {
                let (offset, len) = (pop!(), pop!());
                let (offset, len) = (
                    offset.to_u64().unwrap_or(0) as usize,
                    len.to_u64().unwrap_or(0) as usize,
                );
                grow(&mut memory, offset + len);
                stack.push(scramble(&memory[offset..offset + len]));
            }
            Op::Caller => stack.push(call.caller),
            Op::CallValue => stack.push(Word::from_u64(call.value)),
            Op::CalldataLoad => {
                let offset = pop!().to_u64().unwrap_or(u64::MAX) as usize;
                let mut bytes = [0u8; 32];
                for (i, slot) in bytes.iter_mut().enumerate() {
                    *slot = call.calldata.get(offset + i).copied().unwrap_or(0);
                }
                stack.push(Word::from_be_bytes(bytes));
            }
            Op::CalldataSize => stack.push(Word::from_u64(call.calldata.len() as u64)),
            Op::CodeCopy => {
                let (dst, src, len) = (
                    pop!().to_u64().unwrap_or(0) as usize,
                    pop!().to_u64().unwrap_or(0) as usize,
                    pop!().to_u64().unwrap_or(0) as usize,
                );
                grow(&mut memory, dst + len);
                for i in 0..len {
                    memory[dst + i] = code.get(src + i).copied().unwrap_or(0);
                }
            }
            Op::Timestamp => stack.push(Word::from_u64(1_700_000_000)),
            Op::Number => stack.push(Word::from_u64(123)),
            Op::Pop => {
                pop!();
            }
            Op::MLoad => {
                let offset = pop!().to_u64().unwrap_or(0) as usize;
                let word = mem_word(&mut memory, offset);
                stack.push(word);
            }
            Op::MStore => {
                let (offset, value) = (pop!().to_u64().unwrap_or(0) as usize, pop!());
                grow(&mut memory, offset + 32);
                memory[offset..offset + 32].copy_from_slice(&value.to_be_bytes());
            }
            Op::SLoad => {
                let key = pop!();
                stack.push(storage.get(&key).copied().unwrap_or(Word::ZERO));
            }
            Op::SStore => {
                let (key, value) = (pop!(), pop!());
                storage.insert(key, value);
            }
            Op::Jump => {
                let dest = pop!().to_u64().unwrap_or(u64::MAX) as usize;
                if code.get(dest) != Some(&u8::from(Op::JumpDest)) {
                    return Outcome::Revert;
                }
                pc = dest;
            }
            Op::JumpI => {
                let (dest, cond) = (pop!().to_u64().unwrap_or(u64::MAX) as usize, pop!());
                if !cond.is_zero() {
                    if code.get(dest) != Some(&u8::from(Op::JumpDest)) {
                        return Outcome::Revert;
                    }
                    pc = dest;
                }
            }
            Op::Gas => stack.push(Word::from_u64(u64::MAX)),
            Op::JumpDest => {}
            Op::Push0 => stack.push(Word::ZERO),
            _ if op.immediate_len() > 0 => {
                let n = op.immediate_len();
                let mut bytes = [0u8; 32];
                for i in 0..n {
                    bytes[32 - n + i] = code.get(pc + i).copied().unwrap_or(0);
                }
                pc += n;
                stack.push(Word::from_be_bytes(bytes));
            }
            Op::Dup1
            | Op::Dup2
            | Op::Dup3
            | Op::Dup4
            | Op::Dup5
            | Op::Dup6
            | Op::Dup7
            | Op::Dup8 => {
                let depth = (u8::from(op) - u8::from(Op::Dup1) + 1) as usize;
                if stack.len() < depth {
                    return Outcome::Revert;
                }
                stack.push(stack[stack.len() - depth]);
            }
            Op::Swap1
            | Op::Swap2
            | Op::Swap3
            | Op::Swap4
            | Op::Swap5
            | Op::Swap6
            | Op::Swap7
            | Op::Swap8 => {
                let depth = (u8::from(op) - u8::from(Op::Swap1) + 1) as usize;
                let top = stack.len();
                if top < depth + 1 {
                    return Outcome::Revert;
                }
                stack.swap(top - 1, top - 1 - depth);
            }
            Op::Log0 | Op::Log1 | Op::Log2 | Op::Log3 | Op::Log4 => {
                let topic_count = (u8::from(op) - u8::from(Op::Log0)) as usize;
                let (offset, len) = (
                    pop!().to_u64().unwrap_or(0) as usize,
                    pop!().to_u64().unwrap_or(0) as usize,
                );
                let mut topics = Vec::with_capacity(topic_count);
                for _ in 0..topic_count {
                    topics.push(pop!());
                }
                grow(&mut memory, offset + len);
                logs.push(LogRecord {
                    topics,
                    data: memory[offset..offset + len].to_vec(),
                });
            }
            Op::Call | Op::StaticCall => {
                // No external world in the reference machine: pop the
                // window, report failure.
                let pops = if op == Op::Call { 7 } else { 6 };
                for _ in 0..pops {
                    pop!();
                }
                stack.push(Word::ZERO);
            }
            Op::Return => {
                let (offset, len) = (
                    pop!().to_u64().unwrap_or(0) as usize,
                    pop!().to_u64().unwrap_or(0) as usize,
                );
                grow(&mut memory, offset + len);
                env.storage = storage;
                env.logs.extend(logs);
                return Outcome::Return(memory[offset..offset + len].to_vec());
            }
            Op::Revert => return Outcome::Revert,
            _ => return Outcome::Revert,
        }
    }
    panic!("step limit exceeded");
}

// ============================================================================
// Harness helpers
// ============================================================================

fn selector_of(compilation: &covenant::Compilation, name: &str) -> [u8; 4] {
    compilation
        .contract
        .abi
        .iter()
        .find(|entry| entry.name == name)
        .unwrap_or_else(|| panic!("no abi entry for {name}"))
        .selector
}

fn calldata(selector: [u8; 4], args: &[Word]) -> Vec<u8> {
    let mut data = selector.to_vec();
    for arg in args {
        data.extend_from_slice(&arg.to_be_bytes());
    }
    data
}

/// Simulate deployment: run the deploy blob as a constructor and check
/// it returns the runtime blob.
fn deploy(compilation: &covenant::Compilation, env: &mut Env) -> Vec<u8> {
    let ctx = CallCtx {
        calldata: &[],
        value: 0,
        caller: Word::from_u64(0xCAFE),
    };
    match execute(&compilation.contract.deploy, env, &ctx) {
        Outcome::Return(runtime) => runtime,
        other => panic!("constructor did not return code: {other:?}"),
    }
}

fn call(
    compilation: &covenant::Compilation,
    env: &mut Env,
    name: &str,
    args: &[Word],
) -> Outcome {
    let data = calldata(selector_of(compilation, name), args);
    let ctx = CallCtx {
        calldata: &data,
        value: 0,
        caller: Word::from_u64(0xCAFE),
    };
    execute(&compilation.contract.runtime, env, &ctx)
}

/// Disassemble a blob into its opcode bytes, skipping push immediates
/// (raw byte scans would also hit immediate data).
fn opcodes_of(code: &[u8]) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        match Op::try_from(code[pc]) {
            Ok(op) => {
                ops.push(op);
                pc += 1 + op.immediate_len();
            }
            Err(_) => pc += 1,
        }
    }
    ops
}

fn word_result(outcome: Outcome) -> Word {
    match outcome {
        Outcome::Return(bytes) if bytes.len() == 32 => {
            Word::from_be_bytes(bytes.try_into().unwrap())
        }
        other => panic!("expected a word result, got {other:?}"),
    }
}

/// The storage counter module: `set(v)` writes, `get()` reads.
fn counter_module(b: &Build) -> Module {
    b.module(vec![
        b.storage("x", "uint256"),
        b.function(
            "set",
            Visibility::External,
            None,
            false,
            &[("v", "uint256")],
            None,
            vec![b.assign(b.self_field("x"), b.name("v"))],
        ),
        b.function(
            "get",
            Visibility::External,
            None,
            false,
            &[],
            Some("uint256"),
            vec![b.ret(Some(b.self_field("x")))],
        ),
    ])
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn deploy_blob_returns_runtime_blob() {
    let b = Build::new();
    let compilation = compile(&counter_module(&b)).expect("compiles");
    let mut env = Env::default();
    let returned = deploy(&compilation, &mut env);
    assert_eq!(returned, compilation.contract.runtime);
}

#[test]
fn set_then_get_observes_the_value() {
    let b = Build::new();
    let compilation = compile(&counter_module(&b)).expect("compiles");

    // Mutability inference per the scenario: set is nonpayable, get view.
    let abi: HashMap<&str, Mutability> = compilation
        .contract
        .abi
        .iter()
        .map(|e| (e.name.as_str(), e.mutability))
        .collect();
    assert_eq!(abi["set"], Mutability::Nonpayable);
    assert_eq!(abi["get"], Mutability::View);

    // Exactly one storage store in `set`, keyed to slot 0.
    let set_ir = compilation
        .ir
        .functions
        .iter()
        .find(|f| f.name == "set")
        .unwrap();
    let stores = set_ir
        .body
        .count_matching(&|op| matches!(op, covenant_compiler::ir::IrOp::StorStore));
    assert_eq!(stores, 1);

    let mut env = Env::default();
    deploy(&compilation, &mut env);
    assert_eq!(call(&compilation, &mut env, "set", &[Word::from_u64(5)]), Outcome::Stop);
    let got = word_result(call(&compilation, &mut env, "get", &[]));
    assert_eq!(got, Word::from_u64(5));
    assert_eq!(env.storage.get(&Word::ZERO), Some(&Word::from_u64(5)));
}

#[test]
fn dispatcher_rejects_unknown_selectors_and_short_calldata() {
    let b = Build::new();
    let compilation = compile(&counter_module(&b)).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);

    let bogus = CallCtx {
        calldata: &[0xde, 0xad, 0xbe, 0xef],
        value: 0,
        caller: Word::ZERO,
    };
    assert_eq!(
        execute(&compilation.contract.runtime, &mut env, &bogus),
        Outcome::Revert
    );
    let short = CallCtx {
        calldata: &[0x01],
        value: 0,
        caller: Word::ZERO,
    };
    assert_eq!(
        execute(&compilation.contract.runtime, &mut env, &short),
        Outcome::Revert
    );
}

#[test]
fn nonpayable_function_rejects_attached_value() {
    let b = Build::new();
    let compilation = compile(&counter_module(&b)).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    let data = calldata(selector_of(&compilation, "set"), &[Word::from_u64(9)]);
    let ctx = CallCtx {
        calldata: &data,
        value: 5,
        caller: Word::ZERO,
    };
    assert_eq!(
        execute(&compilation.contract.runtime, &mut env, &ctx),
        Outcome::Revert
    );
    assert!(env.storage.is_empty());
}

#[test]
fn checked_addition_aborts_on_overflow() {
    let b = Build::new();
    // bump(v: uint8) -> uint8 { return v + 1 }
    let module = b.module(vec![b.function(
        "bump",
        Visibility::External,
        None,
        false,
        &[("v", "uint8")],
        Some("uint8"),
        vec![b.ret(Some(b.binary(BinOp::Add, b.name("v"), b.int(1))))],
    )]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);

    let ok = word_result(call(&compilation, &mut env, "bump", &[Word::from_u64(41)]));
    assert_eq!(ok, Word::from_u64(42));
    assert_eq!(
        call(&compilation, &mut env, "bump", &[Word::from_u64(255)]),
        Outcome::Revert
    );
}

#[test]
fn runtime_range_bound_aborts_before_the_body() {
    let b = Build::new();
    // fill(n): for i in range(n, bound=4): self.x += 1
    let module = b.module(vec![
        b.storage("x", "uint256"),
        b.function(
            "fill",
            Visibility::External,
            None,
            false,
            &[("n", "uint256")],
            None,
            vec![b.for_range(
                "i",
                b.name("n"),
                Some(b.int(4)),
                vec![b.aug(BinOp::Add, b.self_field("x"), b.int(1))],
            )],
        ),
        b.function(
            "get",
            Visibility::External,
            None,
            false,
            &[],
            Some("uint256"),
            vec![b.ret(Some(b.self_field("x")))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);

    assert_eq!(
        call(&compilation, &mut env, "fill", &[Word::from_u64(3)]),
        Outcome::Stop
    );
    assert_eq!(
        word_result(call(&compilation, &mut env, "get", &[])),
        Word::from_u64(3)
    );

    // Bound exceeded: abort with no storage effect at all.
    assert_eq!(
        call(&compilation, &mut env, "fill", &[Word::from_u64(9)]),
        Outcome::Revert
    );
    assert_eq!(
        word_result(call(&compilation, &mut env, "get", &[])),
        Word::from_u64(3)
    );
}

#[test]
fn reentrancy_guard_clears_on_successful_exit() {
    let b = Build::new();
    let module = b.module(vec![
        b.storage("x", "uint256"),
        b.function(
            "locked_set",
            Visibility::External,
            None,
            true,
            &[("v", "uint256")],
            None,
            vec![b.assign(b.self_field("x"), b.name("v"))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    // Guard slot trails user storage.
    assert_eq!(compilation.analysis.registry.reentrancy_slot(), Some(1));

    let mut env = Env::default();
    deploy(&compilation, &mut env);
    assert_eq!(
        call(&compilation, &mut env, "locked_set", &[Word::from_u64(7)]),
        Outcome::Stop
    );
    assert_eq!(env.storage.get(&Word::ZERO), Some(&Word::from_u64(7)));
    // No successful transaction leaves the guard set.
    assert_eq!(
        env.storage.get(&Word::ONE).copied().unwrap_or(Word::ZERO),
        Word::ZERO
    );

    // A pre-held guard blocks entry.
    env.storage.insert(Word::ONE, Word::ONE);
    assert_eq!(
        call(&compilation, &mut env, "locked_set", &[Word::from_u64(8)]),
        Outcome::Revert
    );
    assert_eq!(env.storage.get(&Word::ZERO), Some(&Word::from_u64(7)));
}

#[test]
fn internal_calls_cross_the_jump_convention() {
    let b = Build::new();
    // double(v) internal; quad(v) external returns double(double(v)).
    let module = b.module(vec![
        b.function(
            "double",
            Visibility::Internal,
            Some(Mutability::Pure),
            false,
            &[("v", "uint256")],
            Some("uint256"),
            vec![b.ret(Some(b.binary(BinOp::Mul, b.name("v"), b.int(2))))],
        ),
        b.function(
            "quad",
            Visibility::External,
            None,
            false,
            &[("v", "uint256")],
            Some("uint256"),
            vec![b.ret(Some(b.internal_call(
                "double",
                vec![b.internal_call("double", vec![b.name("v")])],
            )))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    assert_eq!(
        word_result(call(&compilation, &mut env, "quad", &[Word::from_u64(3)])),
        Word::from_u64(12)
    );
}

#[test]
fn mappings_store_per_key() {
    let b = Build::new();
    let module = b.module(vec![
        b.storage_map("balances", "address", "uint256"),
        b.function(
            "credit",
            Visibility::External,
            None,
            false,
            &[("who", "address"), ("amount", "uint256")],
            None,
            vec![b.aug(
                BinOp::Add,
                b.subscript(b.self_field("balances"), b.name("who")),
                b.name("amount"),
            )],
        ),
        b.function(
            "balance_of",
            Visibility::External,
            None,
            false,
            &[("who", "address")],
            Some("uint256"),
            vec![b.ret(Some(b.subscript(b.self_field("balances"), b.name("who"))))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);

    let alice = Word::from_u64(0xA11CE);
    let bob = Word::from_u64(0xB0B);
    call(&compilation, &mut env, "credit", &[alice, Word::from_u64(10)]);
    call(&compilation, &mut env, "credit", &[alice, Word::from_u64(5)]);
    call(&compilation, &mut env, "credit", &[bob, Word::from_u64(3)]);
    assert_eq!(
        word_result(call(&compilation, &mut env, "balance_of", &[alice])),
        Word::from_u64(15)
    );
    assert_eq!(
        word_result(call(&compilation, &mut env, "balance_of", &[bob])),
        Word::from_u64(3)
    );
}

#[test]
fn events_emit_topics_and_data() {
    let b = Build::new();
    let module = b.module(vec![
        b.event("Credited", &[("who", "address", true), ("amount", "uint256", false)]),
        b.function(
            "emit_one",
            Visibility::External,
            None,
            false,
            &[("who", "address")],
            None,
            vec![b.log("Credited", vec![b.name("who"), b.int(9)])],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    call(&compilation, &mut env, "emit_one", &[Word::from_u64(0xA11CE)]);

    assert_eq!(env.logs.len(), 1);
    let log = &env.logs[0];
    // Event id plus one indexed topic; one data word.
    assert_eq!(log.topics.len(), 2);
    assert_eq!(log.topics[1], Word::from_u64(0xA11CE));
    assert_eq!(log.data, Word::from_u64(9).to_be_bytes().to_vec());
    assert!(!log.topics[0].is_zero());
}

#[test]
fn immutables_land_in_the_data_segment() {
    let b = Build::new();
    let module = b.module(vec![
        b.immutable("cap", "uint256"),
        b.function(
            "setup",
            Visibility::Deploy,
            None,
            false,
            &[],
            None,
            vec![b.assign(b.name("cap"), b.int(1000))],
        ),
        b.function(
            "get_cap",
            Visibility::External,
            None,
            false,
            &[],
            Some("uint256"),
            vec![b.ret(Some(b.name("cap")))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    let deployed = deploy(&compilation, &mut env);

    // The static runtime blob carries a zeroed data segment; the
    // deployed copy has the immutable patched in.
    assert_eq!(deployed.len(), compilation.contract.runtime.len());
    assert_ne!(deployed, compilation.contract.runtime);
    let tail = &deployed[deployed.len() - 32..];
    assert_eq!(Word::from_be_bytes(tail.try_into().unwrap()), Word::from_u64(1000));

    // Reading it back goes through the deployed code's own tail.
    let data = calldata(selector_of(&compilation, "get_cap"), &[]);
    let ctx = CallCtx {
        calldata: &data,
        value: 0,
        caller: Word::ZERO,
    };
    let got = match execute(&deployed, &mut env, &ctx) {
        Outcome::Return(bytes) => Word::from_be_bytes(bytes.try_into().unwrap()),
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(got, Word::from_u64(1000));
}

#[test]
fn flags_combine_bitwise() {
    let b = Build::new();
    let module = b.module(vec![
        b.flag("Perms", &["READ", "WRITE", "ADMIN"]),
        b.function(
            "rw",
            Visibility::External,
            None,
            false,
            &[],
            Some("bool"),
            vec![
                b.let_stmt(
                    "mask",
                    Some("Perms"),
                    b.binary(
                        BinOp::BitOr,
                        b.attribute(b.name("Perms"), "READ"),
                        b.attribute(b.name("Perms"), "WRITE"),
                    ),
                ),
                b.ret(Some(b.compare(
                    CmpOp::Ne,
                    b.binary(
                        BinOp::BitAnd,
                        b.name("mask"),
                        b.attribute(b.name("Perms"), "WRITE"),
                    ),
                    b.int_as_flag(),
                ))),
            ],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    assert_eq!(
        word_result(call(&compilation, &mut env, "rw", &[])),
        Word::ONE
    );
}

impl Build {
    /// A zero constant in flag position: flags compare against their
    /// empty set spelled as a converted zero member expression.
    fn int_as_flag(&self) -> Expr {
        // `mask & Perms.WRITE != (Perms.READ ^ Perms.READ)`
        self.binary(
            BinOp::BitXor,
            self.attribute(self.name("Perms"), "READ"),
            self.attribute(self.name("Perms"), "READ"),
        )
    }
}

#[test]
fn branches_and_loops_compose() {
    let b = Build::new();
    // sum_to(n: uint256) -> uint256 with a static range and an if.
    let module = b.module(vec![b.function(
        "pick",
        Visibility::External,
        None,
        false,
        &[("flag", "uint256")],
        Some("uint256"),
        vec![
            b.let_stmt("acc", Some("uint256"), b.int(0)),
            b.for_range(
                "i",
                b.int(5),
                None,
                vec![b.aug(BinOp::Add, b.name("acc"), b.name("i"))],
            ),
            b.if_stmt(
                b.compare(CmpOp::Eq, b.name("flag"), b.int(1)),
                vec![b.ret(Some(b.name("acc")))],
                vec![b.ret(Some(b.int(0)))],
            ),
        ],
    )]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    // 0+1+2+3+4 = 10.
    assert_eq!(
        word_result(call(&compilation, &mut env, "pick", &[Word::ONE])),
        Word::from_u64(10)
    );
    assert_eq!(
        word_result(call(&compilation, &mut env, "pick", &[Word::from_u64(2)])),
        Word::ZERO
    );
}

#[test]
fn array_indexing_is_bounds_checked() {
    let b = Build::new();
    let module = b.module(vec![
        b.storage_array("vals", "uint256", 3),
        b.function(
            "put",
            Visibility::External,
            None,
            false,
            &[("i", "uint256"), ("v", "uint256")],
            None,
            vec![b.assign(
                b.subscript(b.self_field("vals"), b.name("i")),
                b.name("v"),
            )],
        ),
        b.function(
            "at",
            Visibility::External,
            None,
            false,
            &[("i", "uint256")],
            Some("uint256"),
            vec![b.ret(Some(b.subscript(b.self_field("vals"), b.name("i"))))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);

    call(&compilation, &mut env, "put", &[Word::from_u64(2), Word::from_u64(99)]);
    assert_eq!(
        word_result(call(&compilation, &mut env, "at", &[Word::from_u64(2)])),
        Word::from_u64(99)
    );
    // Element 2 lives at slot base + 2.
    assert_eq!(env.storage.get(&Word::from_u64(2)), Some(&Word::from_u64(99)));

    // One past the end aborts, reads and writes alike.
    assert_eq!(
        call(&compilation, &mut env, "put", &[Word::from_u64(3), Word::ONE]),
        Outcome::Revert
    );
    assert_eq!(
        call(&compilation, &mut env, "at", &[Word::from_u64(3)]),
        Outcome::Revert
    );
}

#[test]
fn sequence_iteration_walks_every_element() {
    let b = Build::new();
    let module = b.module(vec![
        b.storage_array("vals", "uint256", 3),
        b.storage("total", "uint256"),
        b.function(
            "put",
            Visibility::External,
            None,
            false,
            &[("i", "uint256"), ("v", "uint256")],
            None,
            vec![b.assign(
                b.subscript(b.self_field("vals"), b.name("i")),
                b.name("v"),
            )],
        ),
        b.function(
            "sum",
            Visibility::External,
            None,
            false,
            &[],
            Some("uint256"),
            vec![
                b.assign(b.self_field("total"), b.int(0)),
                b.for_seq(
                    "v",
                    b.self_field("vals"),
                    vec![b.aug(BinOp::Add, b.self_field("total"), b.name("v"))],
                ),
                b.ret(Some(b.self_field("total"))),
            ],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    call(&compilation, &mut env, "put", &[Word::ZERO, Word::from_u64(5)]);
    call(&compilation, &mut env, "put", &[Word::ONE, Word::from_u64(7)]);
    call(&compilation, &mut env, "put", &[Word::from_u64(2), Word::from_u64(8)]);
    assert_eq!(
        word_result(call(&compilation, &mut env, "sum", &[])),
        Word::from_u64(20)
    );
}

#[test]
fn struct_storage_lays_out_field_slots() {
    let b = Build::new();
    let module = b.module(vec![
        Decl::Struct(covenant::ast::StructDecl {
            id: b.id(),
            span: b.span(),
            name: "Point".to_string(),
            fields: vec![
                covenant::ast::FieldDecl {
                    span: b.span(),
                    name: "x".to_string(),
                    ty: b.ty("uint256"),
                },
                covenant::ast::FieldDecl {
                    span: b.span(),
                    name: "y".to_string(),
                    ty: b.ty("uint256"),
                },
            ],
        }),
        b.storage("origin", "Point"),
        b.function(
            "set_y",
            Visibility::External,
            None,
            false,
            &[("v", "uint256")],
            None,
            vec![b.assign(b.attribute(b.self_field("origin"), "y"), b.name("v"))],
        ),
        b.function(
            "get_y",
            Visibility::External,
            None,
            false,
            &[],
            Some("uint256"),
            vec![b.ret(Some(b.attribute(b.self_field("origin"), "y")))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    call(&compilation, &mut env, "set_y", &[Word::from_u64(11)]);
    assert_eq!(
        word_result(call(&compilation, &mut env, "get_y", &[])),
        Word::from_u64(11)
    );
    // Field `y` is the struct's second slot.
    assert_eq!(env.storage.get(&Word::ONE), Some(&Word::from_u64(11)));
    assert_eq!(env.storage.get(&Word::ZERO), None);
}

#[test]
fn public_storage_variables_get_getters() {
    let b = Build::new();
    let module = b.module(vec![
        Decl::Storage(StorageDecl {
            id: b.id(),
            span: Span::default(),
            name: "total".to_string(),
            ty: b.ty("uint256"),
            public: true,
        }),
        b.function(
            "add",
            Visibility::External,
            None,
            false,
            &[("v", "uint256")],
            None,
            vec![b.aug(BinOp::Add, b.self_field("total"), b.name("v"))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    call(&compilation, &mut env, "add", &[Word::from_u64(4)]);
    call(&compilation, &mut env, "add", &[Word::from_u64(6)]);
    assert_eq!(
        word_result(call(&compilation, &mut env, "total", &[])),
        Word::from_u64(10)
    );
}

#[test]
fn optimization_levels_agree_observably() {
    let b = Build::new();
    let module = counter_module(&b);
    let unoptimized = compile_with(
        &module,
        CompilerOptions {
            vm: VmVersion::V2,
            opt: OptLevel::O0,
        },
    )
    .expect("compiles");
    let optimized = compile_with(
        &module,
        CompilerOptions {
            vm: VmVersion::V2,
            opt: OptLevel::O2,
        },
    )
    .expect("compiles");
    assert!(optimized.contract.runtime.len() <= unoptimized.contract.runtime.len());

    for compilation in [&unoptimized, &optimized] {
        let mut env = Env::default();
        deploy(compilation, &mut env);
        call(compilation, &mut env, "set", &[Word::from_u64(77)]);
        assert_eq!(
            word_result(call(compilation, &mut env, "get", &[])),
            Word::from_u64(77)
        );
    }
}

#[test]
fn vm_version_gates_push0() {
    let b = Build::new();
    let module = counter_module(&b);
    let v1 = compile_with(
        &module,
        CompilerOptions {
            vm: VmVersion::V1,
            opt: OptLevel::O1,
        },
    )
    .expect("compiles");
    let v2 = compile_with(
        &module,
        CompilerOptions {
            vm: VmVersion::V2,
            opt: OptLevel::O1,
        },
    )
    .expect("compiles");
    assert!(!opcodes_of(&v1.contract.runtime).contains(&Op::Push0));
    assert!(opcodes_of(&v2.contract.runtime).contains(&Op::Push0));

    // Both versions behave identically.
    let mut env = Env::default();
    deploy(&v1, &mut env);
    call(&v1, &mut env, "set", &[Word::from_u64(3)]);
    assert_eq!(
        word_result(call(&v1, &mut env, "get", &[])),
        Word::from_u64(3)
    );
}

#[test]
fn source_map_points_into_the_runtime_blob() {
    let b = Build::new();
    let compilation = compile(&counter_module(&b)).expect("compiles");
    assert!(!compilation.contract.source_map.is_empty());
    // Code length excludes the (empty) data segment here.
    let len = compilation.contract.runtime.len() as u32;
    for entry in &compilation.contract.source_map {
        assert!(entry.offset < len);
    }
}

#[test]
fn listing_reads_as_assembly() {
    let b = Build::new();
    let compilation = compile(&counter_module(&b)).expect("compiles");
    let listing = &compilation.contract.listing;
    assert!(listing.contains("CALLDATALOAD"));
    assert!(listing.contains("SSTORE"));
    assert!(listing.contains("JUMPI"));
    assert!(listing.contains("==== runtime segment ===="));
}

#[test]
fn analysis_errors_surface_as_diagnostics() {
    let b = Build::new();
    // A pure function that reads storage.
    let module = b.module(vec![
        b.storage("x", "uint256"),
        b.function(
            "peek",
            Visibility::External,
            Some(Mutability::Pure),
            false,
            &[],
            Some("uint256"),
            vec![b.ret(Some(b.self_field("x")))],
        ),
    ]);
    let diagnostics = compile(&module).unwrap_err();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("state access"));
    assert_eq!(diagnostics[0].phase, covenant::Phase::LocalPass);
}

#[test]
fn loop_variable_does_not_escape_its_scope() {
    let b = Build::new();
    let module = b.module(vec![b.function(
        "f",
        Visibility::External,
        None,
        false,
        &[],
        Some("uint256"),
        vec![
            b.for_range("i", b.int(3), None, vec![b.pass()]),
            b.ret(Some(b.name("i"))),
        ],
    )]);
    let diagnostics = compile(&module).unwrap_err();
    assert!(diagnostics[0].message.contains("undeclared name 'i'"));
}

#[test]
fn external_call_lowering_marshals_through_the_buffer() {
    let b = Build::new();
    // The reference machine has no external world, so exercise the shape
    // of the emitted code rather than a live call.
    let module = b.module(vec![
        b.interface(
            "Oracle",
            vec![InterfaceMethodDecl {
                span: Span::default(),
                name: "peek".to_string(),
                params: vec![],
                ret: Some(b.ty("uint256")),
                mutability: Mutability::View,
            }],
        ),
        b.function(
            "read",
            Visibility::External,
            None,
            false,
            &[("oracle", "address")],
            Some("uint256"),
            vec![b.ret(Some(Expr::ExtCall {
                id: b.id(),
                span: Span::default(),
                interface: "Oracle".to_string(),
                address: Box::new(b.name("oracle")),
                method: "peek".to_string(),
                args: vec![],
                tolerant: false,
            }))],
        ),
    ]);
    let compilation = compile(&module).expect("compiles");
    // A view method goes through the read-only call instruction.
    let ops = opcodes_of(&compilation.contract.runtime);
    assert!(ops.contains(&Op::StaticCall));
    assert!(!ops.contains(&Op::Call));
    // The reference machine fails all external calls: the non-tolerant
    // call site must propagate that as an abort.
    let mut env = Env::default();
    deploy(&compilation, &mut env);
    assert_eq!(
        call(&compilation, &mut env, "read", &[Word::from_u64(1)]),
        Outcome::Revert
    );
}
