//! The code generator proper.
//!
//! Top-level names are declared in a first pass before any body is
//! emitted, so calls to forward-declared targets simply record call
//! patches that resolve at layout time (this is also what makes mutual
//! recursion work). Bodies are then emitted one function at a time;
//! unreachable callables are dropped using the dependency graph.

pub mod expr;
pub mod ffi;
pub mod matches;
pub mod stmt;

use crate::error::{CompileError, CompileResult};
use crate::regalloc::RegAlloc;
use crate::runtime;
use crate::symbols::{Section, SymbolTable};
use crate::{CodegenOptions, CodegenOutput, GenFlags};
use rustc_hash::FxHashMap;
use velo_isa::{Asm, BranchFixup, Fpr, Gpr};
use velo_parser::ast::*;
use velo_parser::depgraph::DepGraph;
use velo_parser::token::Span;

/// Number of 8-byte temp slots reserved per frame for call staging.
const TEMP_SLOTS: i32 = 40;

/// Maximum arguments passed in registers (the float arg register count
/// on every supported ABI).
pub const MAX_ARGS: usize = 8;

/// Static type knowledge used to pick value representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticTy {
    Num,
    Str,
    List,
    Map,
    Fn,
    Unknown,
}

impl From<TypeTag> for StaticTy {
    fn from(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Num | TypeTag::Bool | TypeTag::I32 | TypeTag::I64 | TypeTag::F64 => {
                StaticTy::Num
            }
            TypeTag::Str | TypeTag::CStr => StaticTy::Str,
            TypeTag::List => StaticTy::List,
            TypeTag::Map | TypeTag::CPtr => StaticTy::Map,
        }
    }
}

/// Where an expression's value currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// f64 in a float register.
    Num(Fpr),
    /// Pointer (string/list/map/closure) in an integer register.
    Ptr(Gpr),
    /// Raw integer (counters, flags, FFI results) in an integer register.
    Int(Gpr),
}

/// A known callable.
#[derive(Debug, Clone)]
pub struct FnInfo {
    pub label: String,
    pub arity: usize,
    pub variadic: bool,
    pub captures: Vec<String>,
    /// Statically inferred result type, for call-site representation.
    pub ret_ty: StaticTy,
}

/// Infer a callable's result type from its clause bodies: every body
/// must agree on a pointer-shaped type for the call site to treat the
/// result as one; anything unclear stays numeric.
pub fn lambda_ret_ty(lambda: &LambdaExpression) -> StaticTy {
    let mut ty = None;
    for clause in &lambda.clauses {
        let body = body_ty(&clause.body);
        match ty {
            None => ty = Some(body),
            Some(t) if t == body => {}
            Some(_) => return StaticTy::Num,
        }
    }
    ty.unwrap_or(StaticTy::Num)
}

fn body_ty(expr: &Expression) -> StaticTy {
    match expr {
        Expression::Str(_) | Expression::FString(_) => StaticTy::Str,
        Expression::List(_) | Expression::Vector(_) => StaticTy::List,
        Expression::Map(_) => StaticTy::Map,
        Expression::Match(m) => {
            let mut ty = None;
            for clause in &m.clauses {
                let body = body_ty(&clause.body);
                match ty {
                    None => ty = Some(body),
                    Some(t) if t == body => {}
                    Some(_) => return StaticTy::Num,
                }
            }
            ty.unwrap_or(StaticTy::Num)
        }
        Expression::Block(b) => b
            .block
            .tail_expression()
            .map(body_ty)
            .unwrap_or(StaticTy::Num),
        _ => StaticTy::Num,
    }
}

/// Per-loop state for break/continue.
pub struct LoopCtx {
    pub start: usize,
    pub breaks: Vec<BranchFixup>,
    pub continues: Vec<BranchFixup>,
}

/// Per-function emission state.
pub struct Frame {
    pub name: String,
    pub locals: FxHashMap<String, i32>,
    pub local_tys: FxHashMap<String, StaticTy>,
    next_local: i32,
    temp_watermark: i32,
    /// fp-relative offset of the function result staging slot.
    pub result_slot: i32,
    /// Offset of the first body instruction (tail-call target).
    pub body_start: usize,
    /// Param slot offsets in declaration order (tail-call marshalling).
    pub param_slots: Vec<i32>,
    /// Armed-flag slot + deferred expression, in declaration order.
    pub defers: Vec<(i32, Expression)>,
    /// Jumps from `ret` sites to the epilogue.
    pub ret_jumps: Vec<BranchFixup>,
    pub loop_stack: Vec<LoopCtx>,
    pub arena_depth: u32,
    pub ra: RegAlloc,
}

impl Frame {
    /// Allocate (or find) the slot for a named local.
    pub fn slot(&mut self, name: &str) -> i32 {
        if let Some(off) = self.locals.get(name) {
            return *off;
        }
        let off = self.alloc_slot();
        self.locals.insert(name.to_string(), off);
        off
    }

    fn alloc_slot(&mut self) -> i32 {
        self.next_local -= 8;
        self.next_local
    }

    /// An anonymous named-slot-area slot (loop counters, defer flags).
    pub fn scratch_slot(&mut self) -> i32 {
        self.alloc_slot()
    }

    /// Allocate a temp slot below the locals area.
    pub fn alloc_temp(&mut self) -> i32 {
        self.temp_watermark -= 8;
        self.temp_watermark
    }

    pub fn release_temp(&mut self, slot: i32) {
        // Temps release in LIFO order
        if slot == self.temp_watermark {
            self.temp_watermark += 8;
        }
    }
}

pub struct CodeGenerator<'a> {
    pub module: &'a Module,
    pub opts: CodegenOptions,
    pub asm: Asm,
    pub syms: SymbolTable,
    pub graph: DepGraph,
    pub funcs: FxHashMap<String, FnInfo>,
    pub globals: FxHashMap<String, StaticTy>,
    pub flags: GenFlags,
    pub frame: Option<Frame>,
    entry: usize,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(module: &'a Module, opts: CodegenOptions) -> Self {
        let mut asm = Asm::new(opts.target);
        asm.buf.set_verbose(opts.verbose);
        Self {
            module,
            opts,
            asm,
            syms: SymbolTable::new(),
            graph: DepGraph::build(module),
            funcs: FxHashMap::default(),
            globals: FxHashMap::default(),
            flags: GenFlags::default(),
            frame: None,
            entry: 0,
        }
    }

    /// The register model in effect (Win64 differs from SysV on x86-64).
    pub fn abi(&self) -> &'static velo_isa::Abi {
        self.opts.target.abi_os(self.opts.os)
    }

    pub fn generate(mut self) -> CompileResult<CodegenOutput> {
        let reachable = self.graph.reachable();
        // The module reference outlives any borrow of self.
        let module = self.module;

        // Pass 1: declare every top-level callable and global before any
        // body is emitted.
        for stmt in &module.statements {
            if let Statement::Binding(b) = stmt {
                match &b.value {
                    Expression::Lambda(lambda) => {
                        self.funcs.insert(
                            b.name.clone(),
                            FnInfo {
                                label: b.name.clone(),
                                arity: lambda.arity(),
                                variadic: lambda.is_variadic(),
                                captures: Vec::new(),
                                ret_ty: lambda_ret_ty(lambda),
                            },
                        );
                    }
                    value => {
                        self.syms.data_slot(&format!("__g_{}", b.name));
                        self.globals.insert(b.name.clone(), expr::literal_ty(value));
                    }
                }
            }
            if let Statement::ClassDecl(c) = stmt {
                self.syms.data_slot(&format!("__g_{}", c.name));
                self.globals.insert(c.name.clone(), StaticTy::Map);
            }
        }
        for lifted in &module.lambdas {
            self.funcs.entry(lifted.name.clone()).or_insert(FnInfo {
                label: lifted.name.clone(),
                arity: lifted.lambda.arity(),
                variadic: lifted.lambda.is_variadic(),
                captures: lifted.captures.clone(),
                ret_ty: lambda_ret_ty(&lifted.lambda),
            });
        }

        // Pass 2: emit function bodies for everything reachable.
        for stmt in &module.statements {
            if let Statement::Binding(b) = stmt {
                if let Expression::Lambda(lambda) = &b.value {
                    if reachable.contains(&b.name)
                        || reachable.contains(&lambda.name)
                    {
                        self.emit_function(&b.name, lambda, &[])?;
                    }
                }
            }
        }
        for lifted in &module.lambdas {
            if self.syms.is_defined(&lifted.name) {
                continue;
            }
            // Lambdas aliasing an emitted binding share its code.
            if let Some(def) = self
                .alias_of(&lifted.name)
                .and_then(|alias| self.syms.lookup(&alias))
            {
                self.syms.define(&lifted.name, def.section, def.offset);
                continue;
            }
            if reachable.contains(&lifted.name) {
                let lambda = lifted.lambda.clone();
                self.emit_function(&lifted.name, &lambda, &lifted.captures)?;
            }
        }

        // Top-level statement sequence runs as __toplevel.
        self.emit_toplevel()?;

        // Runtime blob: helpers first, then the entry stub.
        runtime::emit_runtime(&mut self)?;
        self.entry = runtime::emit_entry(&mut self)?;

        let patches = self.asm.buf.take_patches();
        let text = self.asm.buf.into_bytes();
        let (labels, rodata, data, externs) = self.syms.into_parts();

        Ok(CodegenOutput {
            text,
            rodata,
            data,
            patches,
            labels,
            externs,
            entry: self.entry,
            flags: self.flags,
        })
    }

    /// A lifted lambda that is the direct value of a top-level binding
    /// shares the binding's label.
    fn alias_of(&self, lambda_name: &str) -> Option<String> {
        for stmt in &self.module.statements {
            if let Statement::Binding(b) = stmt {
                if let Expression::Lambda(l) = &b.value {
                    if l.name == lambda_name {
                        return Some(b.name.clone());
                    }
                }
            }
        }
        None
    }

    // ========================================================================
    // Function emission
    // ========================================================================

    /// Emit one function: prologue, argument spill, clause dispatch,
    /// body, deferred replays, epilogue.
    pub fn emit_function(
        &mut self,
        label: &str,
        lambda: &LambdaExpression,
        captures: &[String],
    ) -> CompileResult<()> {
        let offset = self.asm.offset();
        self.syms.define(label, Section::Text, offset);

        // Frame sizing: named slots + defer flags + temps, 16-aligned.
        let mut slots = count_slots_lambda(lambda) as i32 + captures.len() as i32 + 2;
        slots += 2; // result + scrutinee staging
        let frame_bytes = ((slots + TEMP_SLOTS) * 8 + 15) & !15;

        let mut frame = Frame {
            name: label.to_string(),
            locals: FxHashMap::default(),
            local_tys: FxHashMap::default(),
            next_local: 0,
            temp_watermark: -(slots * 8),
            result_slot: 0,
            body_start: 0,
            param_slots: Vec::new(),
            defers: Vec::new(),
            ret_jumps: Vec::new(),
            loop_stack: Vec::new(),
            arena_depth: 0,
            ra: RegAlloc::new(self.abi()),
        };
        frame.result_slot = frame.alloc_slot();

        self.asm.frame_prologue(frame_bytes);

        let abi = self.abi();
        let fp = abi.fp;

        // Spill incoming arguments (uniform f64 slots) to locals. All
        // clauses of a pattern lambda share the same arity.
        let params = &lambda.clauses[0].params;
        for (i, p) in params.iter().enumerate() {
            let slot = frame.slot(&p.name);
            frame.param_slots.push(slot);
            if i < abi.float_args.len() {
                self.asm.fstore(fp, slot, abi.float_args[i]);
            }
            if let Some(tag) = p.ty {
                frame.local_tys.insert(p.name.clone(), tag.into());
            }
        }

        // Closures receive the environment pointer in the first integer
        // argument register; captures load from it.
        if !captures.is_empty() {
            let env = abi.int_args[0];
            for (i, cap) in captures.iter().enumerate() {
                let slot = frame.slot(cap);
                let tmp = abi.float_scratch[0];
                self.asm.fload(tmp, env, (i as i32 + 1) * 8);
                self.asm.fstore(fp, slot, tmp);
            }
        }

        frame.body_start = self.asm.offset();
        self.frame = Some(frame);

        // Zero the result slot so a fall-off with no tail yields 0.
        self.emit_zero_result()?;

        if lambda.clauses.len() == 1 && lambda.clauses[0].params.iter().all(|p| p.pattern.is_none())
        {
            let body = &lambda.clauses[0].body;
            let value = expr::emit_tail_expr(self, body)?;
            self.store_result(value)?;
        } else {
            self.emit_clause_dispatch(lambda)?;
        }

        self.emit_epilogue()?;
        self.frame = None;
        Ok(())
    }

    /// Pattern-lambda dispatch: clauses tried in order; a clause whose
    /// literal patterns all match wins.
    fn emit_clause_dispatch(&mut self, lambda: &LambdaExpression) -> CompileResult<()> {
        let abi = self.abi();
        let fp = abi.fp;
        let mut to_end: Vec<BranchFixup> = Vec::new();

        for clause in &lambda.clauses {
            let mut next_clause: Vec<BranchFixup> = Vec::new();

            // Every clause names its own parameters; they all view the
            // same argument slots.
            for (i, p) in clause.params.iter().enumerate() {
                let slot = self.frame_ref().param_slots[i];
                self.frame_ref().locals.insert(p.name.clone(), slot);
                if let Some(tag) = p.ty {
                    self.frame_ref().local_tys.insert(p.name.clone(), tag.into());
                }
            }

            for (i, p) in clause.params.iter().enumerate() {
                if let Some(pattern) = p.pattern {
                    let slot = self.frame_ref().param_slots[i];
                    let arg = abi.float_scratch[0];
                    let pat = abi.float_scratch[1];
                    let flag = abi.scratch[0];
                    self.asm.fload(arg, fp, slot);
                    self.asm.fmov_imm(pat, pattern, abi.scratch[1]);
                    self.asm.fcmp_set(velo_isa::Cond::Eq, flag, arg, pat);
                    next_clause.push(self.asm.branch_if_zero(flag));
                }
            }

            let value = expr::emit_tail_expr(self, &clause.body)?;
            self.store_result(value)?;
            to_end.push(self.asm.jump());

            for fix in next_clause {
                self.asm.bind(fix);
            }
        }

        // No clause matched: result stays zero.
        for fix in to_end {
            self.asm.bind(fix);
        }
        Ok(())
    }

    /// The common epilogue: bind all `ret` jumps, replay deferred
    /// expressions LIFO (armed flags guard each), restore the frame.
    fn emit_epilogue(&mut self) -> CompileResult<()> {
        let jumps = std::mem::take(&mut self.frame_ref().ret_jumps);
        for fix in jumps {
            self.asm.bind(fix);
        }

        let defers = std::mem::take(&mut self.frame_ref().defers);
        let abi = self.abi();
        for (flag_slot, expression) in defers.into_iter().rev() {
            let flag = abi.scratch[0];
            self.asm.load(flag, abi.fp, flag_slot);
            let skip = self.asm.branch_if_zero(flag);
            let v = expr::emit_expr(self, &expression)?;
            self.release_value(v);
            self.asm.bind(skip);
        }

        // Function result travels in the float return register.
        let result_slot = self.frame_ref().result_slot;
        self.asm.fload(abi.fret, abi.fp, result_slot);
        self.asm.frame_epilogue();
        Ok(())
    }

    fn emit_zero_result(&mut self) -> CompileResult<()> {
        let abi = self.abi();
        let slot = self.frame_ref().result_slot;
        let tmp = abi.float_scratch[0];
        self.asm.fmov_imm(tmp, 0.0, abi.scratch[0]);
        self.asm.fstore(abi.fp, slot, tmp);
        Ok(())
    }

    /// Store a value into the function result slot (as raw 64 bits).
    pub fn store_result(&mut self, value: Value) -> CompileResult<()> {
        let abi = self.abi();
        let slot = self.frame_ref().result_slot;
        match value {
            Value::Num(f) => {
                self.asm.fstore(abi.fp, slot, f);
                self.frame_ref().ra.release_fpr(f);
            }
            Value::Ptr(g) | Value::Int(g) => {
                self.asm.store(abi.fp, slot, g);
                self.frame_ref().ra.release_gpr(g);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Top level
    // ========================================================================

    /// Compile the top-level statement sequence as `__toplevel`.
    fn emit_toplevel(&mut self) -> CompileResult<()> {
        let offset = self.asm.offset();
        self.syms.define("__toplevel", Section::Text, offset);

        let mut slots = 2;
        for stmt in &self.module.statements {
            slots += count_slots_stmt(stmt) as i32;
        }
        let frame_bytes = ((slots + TEMP_SLOTS) * 8 + 15) & !15;

        let mut frame = Frame {
            name: "__toplevel".to_string(),
            locals: FxHashMap::default(),
            local_tys: FxHashMap::default(),
            next_local: 0,
            temp_watermark: -(slots * 8),
            result_slot: 0,
            body_start: 0,
            param_slots: Vec::new(),
            defers: Vec::new(),
            ret_jumps: Vec::new(),
            loop_stack: Vec::new(),
            arena_depth: 0,
            ra: RegAlloc::new(self.abi()),
        };
        frame.result_slot = frame.alloc_slot();
        self.asm.frame_prologue(frame_bytes);
        frame.body_start = self.asm.offset();
        self.frame = Some(frame);

        self.emit_zero_result()?;

        let statements = self.module.statements.clone();
        for (i, s) in statements.iter().enumerate() {
            // Function bindings became labels; everything else runs.
            if let Statement::Binding(b) = s {
                if matches!(b.value, Expression::Lambda(_)) {
                    continue;
                }
            }
            let last = i == statements.len() - 1;
            stmt::emit_statement(self, s, last)?;
        }

        self.emit_epilogue()?;
        self.frame = None;
        Ok(())
    }

    // ========================================================================
    // Frame helpers
    // ========================================================================

    pub fn frame_ref(&mut self) -> &mut Frame {
        self.frame.as_mut().expect("emission outside a function")
    }

    pub fn release_value(&mut self, value: Value) {
        match value {
            Value::Num(f) => self.frame_ref().ra.release_fpr(f),
            Value::Ptr(g) | Value::Int(g) => self.frame_ref().ra.release_gpr(g),
        }
    }

    pub fn acquire_fpr(&mut self, span: &Span) -> CompileResult<Fpr> {
        self.frame_ref()
            .ra
            .acquire_fpr()
            .ok_or(CompileError::register_pressure(span))
    }

    pub fn acquire_gpr(&mut self, span: &Span) -> CompileResult<Gpr> {
        self.frame_ref()
            .ra
            .acquire_gpr()
            .ok_or(CompileError::register_pressure(span))
    }

    /// Move a value into float (bit-pattern) form for uniform storage.
    pub fn value_to_fpr(&mut self, value: Value, span: &Span) -> CompileResult<Fpr> {
        match value {
            Value::Num(f) => Ok(f),
            Value::Ptr(g) | Value::Int(g) => {
                let f = self.acquire_fpr(span)?;
                self.asm.fmov_from_gpr(f, g);
                self.frame_ref().ra.release_gpr(g);
                Ok(f)
            }
        }
    }

    /// Move a value into an integer register (bit-pattern).
    pub fn value_to_gpr(&mut self, value: Value, span: &Span) -> CompileResult<Gpr> {
        match value {
            Value::Ptr(g) | Value::Int(g) => Ok(g),
            Value::Num(f) => {
                let g = self.acquire_gpr(span)?;
                self.asm.fmov_to_gpr(g, f);
                self.frame_ref().ra.release_fpr(f);
                Ok(g)
            }
        }
    }
}

// ============================================================================
// Frame sizing pre-scan
// ============================================================================

fn count_slots_lambda(lambda: &LambdaExpression) -> usize {
    let mut n = 0;
    for clause in &lambda.clauses {
        n += clause.params.len();
        n += count_slots_expr(&clause.body);
    }
    n
}

fn count_slots_expr(expr: &Expression) -> usize {
    match expr {
        Expression::Block(b) => b.block.statements.iter().map(count_slots_stmt).sum(),
        Expression::Match(m) => {
            let mut n = 1; // scrutinee staging
            for c in &m.clauses {
                n += count_slots_expr(&c.body);
            }
            n
        }
        Expression::LoopExpr(l) => {
            3 + l.body.statements.iter().map(count_slots_stmt).sum::<usize>()
        }
        Expression::Binary(b) => count_slots_expr(&b.left) + count_slots_expr(&b.right),
        Expression::Call(c) => {
            c.arguments.iter().map(count_slots_expr).sum::<usize>()
                + count_slots_expr(&c.callee)
        }
        _ => 0,
    }
}

fn count_slots_stmt(stmt: &Statement) -> usize {
    match stmt {
        Statement::Binding(b) => 1 + count_slots_expr(&b.value),
        Statement::Receive(_) => 1,
        Statement::Loop(l) => {
            // binder + limit + cap counter
            3 + l.body.statements.iter().map(count_slots_stmt).sum::<usize>()
        }
        Statement::Defer(_) => 1,
        Statement::ArenaBlock(a) => a.body.statements.iter().map(count_slots_stmt).sum(),
        Statement::Expression(e) => count_slots_expr(&e.expression),
        Statement::Return(r) => r.value.as_ref().map(count_slots_expr).unwrap_or(0),
        _ => 0,
    }
}
