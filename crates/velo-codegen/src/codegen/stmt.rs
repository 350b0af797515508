//! Statement emission: bindings, loops (sequential and parallel),
//! defer, arena scopes, jumps and returns.

use super::expr::{self, emit_expr, emit_num, normalize};
use super::{CodeGenerator, LoopCtx, StaticTy, Value};
use crate::error::{CompileError, CompileResult};
use crate::runtime;
use velo_isa::Cond;
use velo_parser::ast::*;

/// Emit one statement. `keep_value` marks the trailing statement of a
/// value-producing block: its expression value lands in the result slot.
pub fn emit_statement(
    g: &mut CodeGenerator,
    stmt: &Statement,
    keep_value: bool,
) -> CompileResult<()> {
    match stmt {
        Statement::Binding(b) => emit_binding(g, b),
        Statement::IndexedUpdate(u) => expr::emit_index_set(g, &u.target, &u.value),
        Statement::Loop(l) => {
            let v = emit_loop(g, l, false)?;
            g.release_value(v);
            Ok(())
        }
        Statement::Jump(j) => emit_jump(g, j),
        Statement::Return(r) => emit_return(g, r),
        Statement::Defer(d) => emit_defer(g, d),
        Statement::ArenaBlock(a) => emit_arena_block(g, a),
        Statement::ClassDecl(c) => emit_class(g, c),
        Statement::Receive(r) => emit_receive_stmt(g, r),
        Statement::Expression(e) => {
            let v = emit_expr(g, &e.expression)?;
            if keep_value {
                let v = normalize(g, v, e.expression.span())?;
                g.store_result(v)?;
            } else {
                g.release_value(v);
            }
            Ok(())
        }
        // Imports and exports resolve at the driver level; cstructs are
        // layout metadata consumed by FFI marshalling.
        Statement::Import(_) | Statement::Export(_) | Statement::CStructDecl(_) => Ok(()),
    }
}

fn emit_binding(g: &mut CodeGenerator, b: &BindingStatement) -> CompileResult<()> {
    // Function bindings at the top level were emitted as labels.
    if g.frame_ref().name == "__toplevel" && matches!(b.value, Expression::Lambda(_)) {
        return Ok(());
    }

    let ty = expr::expr_ty(g, &b.value);
    let v = emit_expr(g, &b.value)?;
    let v = normalize(g, v, b.value.span())?;

    // Module-level bindings live in .data; everything else in a frame
    // slot. Shadowing allocates a fresh slot under the same name.
    let global = g.frame_ref().name == "__toplevel" && g.globals.contains_key(&b.name);
    let abi = g.abi();

    if global {
        let addr = g.acquire_gpr(&b.span)?;
        g.asm.lea_symbol(addr, &format!("__g_{}", b.name));
        match v {
            Value::Num(f) => {
                g.asm.fstore(addr, 0, f);
                g.frame_ref().ra.release_fpr(f);
            }
            Value::Ptr(r) | Value::Int(r) => {
                g.asm.store(addr, 0, r);
                g.frame_ref().ra.release_gpr(r);
            }
        }
        g.frame_ref().ra.release_gpr(addr);
        g.globals.insert(b.name.clone(), ty);
        return Ok(());
    }

    let slot = if b.shadow {
        let fresh = {
            let frame = g.frame_ref();
            frame.locals.remove(&b.name);
            frame.slot(&b.name)
        };
        fresh
    } else {
        g.frame_ref().slot(&b.name)
    };

    match v {
        Value::Num(f) => {
            g.asm.fstore(abi.fp, slot, f);
            g.frame_ref().ra.release_fpr(f);
        }
        Value::Ptr(r) | Value::Int(r) => {
            g.asm.store(abi.fp, slot, r);
            g.frame_ref().ra.release_gpr(r);
        }
    }
    g.frame_ref().local_tys.insert(b.name.clone(), ty);
    Ok(())
}

fn emit_jump(g: &mut CodeGenerator, j: &JumpStatement) -> CompileResult<()> {
    let fix = g.asm.jump();
    let frame = g.frame_ref();
    let Some(ctx) = frame.loop_stack.last_mut() else {
        return Err(CompileError::unsupported(
            "break/continue outside a loop",
            g.opts.target,
            &j.span,
        ));
    };
    match j.kind {
        JumpKind::Break => ctx.breaks.push(fix),
        JumpKind::Continue => ctx.continues.push(fix),
    }
    Ok(())
}

fn emit_return(g: &mut CodeGenerator, r: &ReturnStatement) -> CompileResult<()> {
    if let Some(value) = &r.value {
        let v = expr::emit_tail_expr(g, value)?;
        let v = normalize(g, v, value.span())?;
        g.store_result(v)?;
    }

    // Arena scopes still open at this return unwind before the jump.
    let depth = g.frame_ref().arena_depth;
    for _ in 0..depth {
        g.asm.call_symbol(runtime::ARENA_POP, false);
    }

    let fix = g.asm.jump();
    g.frame_ref().ret_jumps.push(fix);
    Ok(())
}

/// `defer E` arms a per-function flag; the epilogue replays armed
/// defers in LIFO order.
fn emit_defer(g: &mut CodeGenerator, d: &DeferStatement) -> CompileResult<()> {
    let flag_slot = g.frame_ref().scratch_slot();
    let abi = g.abi();
    let one = abi.scratch[0];
    g.asm.mov_ri(one, 1);
    g.asm.store(abi.fp, flag_slot, one);
    g.frame_ref()
        .defers
        .push((flag_slot, d.expression.clone()));
    Ok(())
}

/// `arena { … }` brackets the body with runtime arena push/pop on all
/// exits.
fn emit_arena_block(g: &mut CodeGenerator, a: &ArenaBlockStatement) -> CompileResult<()> {
    g.flags.uses_arenas = true;
    g.asm.call_symbol(runtime::ARENA_PUSH, false);
    g.frame_ref().arena_depth += 1;

    let saved = save_scope(g);
    for stmt in &a.body.statements {
        emit_statement(g, stmt, false)?;
    }
    restore_scope(g, saved);

    g.frame_ref().arena_depth -= 1;
    g.asm.call_symbol(runtime::ARENA_POP, false);
    Ok(())
}

/// Classes desugar to a map of closures stored in a global; dispatch is
/// a map lookup at the call site.
fn emit_class(g: &mut CodeGenerator, c: &ClassDeclStatement) -> CompileResult<()> {
    g.flags.uses_arenas = true;
    let entries: Vec<(Expression, Expression)> = c
        .methods
        .iter()
        .map(|(name, lambda)| {
            (
                Expression::Str(StringLiteral {
                    value: name.clone(),
                    span: c.span,
                }),
                Expression::Lambda(lambda.clone()),
            )
        })
        .collect();
    let map = MapExpression {
        entries,
        span: c.span,
    };
    let v = emit_expr(g, &Expression::Map(map))?;
    let ptr = g.value_to_gpr(v, &c.span)?;
    let addr = g.acquire_gpr(&c.span)?;
    g.asm.lea_symbol(addr, &format!("__g_{}", c.name));
    g.asm.store(addr, 0, ptr);
    g.frame_ref().ra.release_gpr(addr);
    g.frame_ref().ra.release_gpr(ptr);
    Ok(())
}

fn emit_receive_stmt(g: &mut CodeGenerator, r: &ReceiveStatement) -> CompileResult<()> {
    let recv = Expression::Receive(ReceiveExpression {
        channel: Box::new(r.channel.clone()),
        span: r.span,
    });
    let v = emit_expr(g, &recv)?;
    let v = normalize(g, v, &r.span)?;
    let slot = g.frame_ref().slot(&r.name);
    let abi = g.abi();
    match v {
        Value::Num(f) => {
            g.asm.fstore(abi.fp, slot, f);
            g.frame_ref().ra.release_fpr(f);
        }
        Value::Ptr(p) | Value::Int(p) => {
            g.asm.store(abi.fp, slot, p);
            g.frame_ref().ra.release_gpr(p);
        }
    }
    g.frame_ref().local_tys.insert(r.name.clone(), StaticTy::Num);
    Ok(())
}

// ============================================================================
// Blocks
// ============================================================================

type ScopeSnapshot = (
    rustc_hash::FxHashMap<String, i32>,
    rustc_hash::FxHashMap<String, StaticTy>,
);

fn save_scope(g: &mut CodeGenerator) -> ScopeSnapshot {
    let frame = g.frame_ref();
    (frame.locals.clone(), frame.local_tys.clone())
}

fn restore_scope(g: &mut CodeGenerator, saved: ScopeSnapshot) {
    let frame = g.frame_ref();
    frame.locals = saved.0;
    frame.local_tys = saved.1;
}

/// A statement block in value position: run the statements, yield the
/// trailing expression (or zero).
pub fn emit_block_value(g: &mut CodeGenerator, block: &Block) -> CompileResult<Value> {
    emit_block_inner(g, block, false)
}

pub fn emit_block_value_tail(g: &mut CodeGenerator, block: &Block) -> CompileResult<Value> {
    emit_block_inner(g, block, true)
}

fn emit_block_inner(g: &mut CodeGenerator, block: &Block, tail: bool) -> CompileResult<Value> {
    let saved = save_scope(g);
    let abi = g.abi();
    let out_slot = g.frame_ref().alloc_temp();

    // Default block value is zero.
    let zf = abi.float_scratch[0];
    g.asm.fmov_imm(zf, 0.0, abi.scratch[0]);
    g.asm.fstore(abi.fp, out_slot, zf);

    let n = block.statements.len();
    for (i, stmt) in block.statements.iter().enumerate() {
        let last = i + 1 == n;
        if last {
            if let Statement::Expression(e) = stmt {
                let v = if tail {
                    expr::emit_tail_expr(g, &e.expression)?
                } else {
                    emit_expr(g, &e.expression)?
                };
                let v = normalize(g, v, e.expression.span())?;
                match v {
                    Value::Num(f) => {
                        g.asm.fstore(abi.fp, out_slot, f);
                        g.frame_ref().ra.release_fpr(f);
                    }
                    Value::Ptr(p) | Value::Int(p) => {
                        g.asm.store(abi.fp, out_slot, p);
                        g.frame_ref().ra.release_gpr(p);
                    }
                }
                continue;
            }
        }
        emit_statement(g, stmt, false)?;
    }

    restore_scope(g, saved);
    let out = g.acquire_fpr(&block.span)?;
    g.asm.fload(out, abi.fp, out_slot);
    g.frame_ref().release_temp(out_slot);
    Ok(Value::Num(out))
}

// ============================================================================
// Loops
// ============================================================================

/// Emit a loop. Counted bounds emit a fixed-trip counter; runtime caps
/// add a decrementing cap register with an abort-to-end branch.
/// Parallel loops fork one process per iteration and join at the end.
pub fn emit_loop(
    g: &mut CodeGenerator,
    l: &LoopStatement,
    keep_value: bool,
) -> CompileResult<Value> {
    let abi = g.abi();
    let fp = abi.fp;
    let saved = save_scope(g);

    // Iteration variable and limit, in f64 slots.
    let (start_slot, limit_slot) = match &l.iterable {
        Expression::Range(r) => {
            let s = emit_num(g, &r.start)?;
            let slot_s = g.frame_ref().scratch_slot();
            g.asm.fstore(fp, slot_s, s);
            g.frame_ref().ra.release_fpr(s);

            let e = emit_num(g, &r.end)?;
            let slot_e = g.frame_ref().scratch_slot();
            g.asm.fstore(fp, slot_e, e);
            g.frame_ref().ra.release_fpr(e);
            (slot_s, slot_e)
        }
        Expression::List(_) => {
            // Iterate a list by index; the binder takes each element.
            let list = emit_expr(g, &l.iterable)?;
            let ptr = g.value_to_gpr(list, l.iterable.span())?;
            let list_slot = g.frame_ref().scratch_slot();
            g.asm.store(fp, list_slot, ptr);

            let len = abi.scratch[0];
            g.asm.load(len, ptr, 0);
            g.frame_ref().ra.release_gpr(ptr);
            let lenf = abi.float_scratch[0];
            g.asm.int_to_f64(lenf, len);
            let slot_e = g.frame_ref().scratch_slot();
            g.asm.fstore(fp, slot_e, lenf);

            let zf = abi.float_scratch[0];
            g.asm.fmov_imm(zf, 0.0, abi.scratch[0]);
            let slot_s = g.frame_ref().scratch_slot();
            g.asm.fstore(fp, slot_s, zf);

            return emit_list_loop(g, l, list_slot, slot_s, slot_e, saved, keep_value);
        }
        other => {
            // Bare count: 0 .. n
            let zf = abi.float_scratch[0];
            g.asm.fmov_imm(zf, 0.0, abi.scratch[0]);
            let slot_s = g.frame_ref().scratch_slot();
            g.asm.fstore(fp, slot_s, zf);

            let e = emit_num(g, other)?;
            let slot_e = g.frame_ref().scratch_slot();
            g.asm.fstore(fp, slot_e, e);
            g.frame_ref().ra.release_fpr(e);
            (slot_s, slot_e)
        }
    };

    let result = emit_counted_loop(g, l, start_slot, limit_slot, None, keep_value)?;
    restore_scope(g, saved);
    Ok(result)
}

fn emit_list_loop(
    g: &mut CodeGenerator,
    l: &LoopStatement,
    list_slot: i32,
    start_slot: i32,
    limit_slot: i32,
    saved: ScopeSnapshot,
    keep_value: bool,
) -> CompileResult<Value> {
    let result = emit_counted_loop(g, l, start_slot, limit_slot, Some(list_slot), keep_value)?;
    restore_scope(g, saved);
    Ok(result)
}

fn emit_counted_loop(
    g: &mut CodeGenerator,
    l: &LoopStatement,
    idx_slot: i32,
    limit_slot: i32,
    list_slot: Option<i32>,
    keep_value: bool,
) -> CompileResult<Value> {
    let abi = g.abi();
    let fp = abi.fp;
    let parallel = l.parallel != Parallelism::None;

    // Binder slot: the index, or the current list element.
    let binder_slot = l.binder.as_ref().map(|name| {
        let frame = g.frame_ref();
        frame.locals.remove(name);
        let slot = frame.slot(name);
        frame.local_tys.insert(name.clone(), StaticTy::Num);
        slot
    });

    // Runtime cap counter.
    let cap_slot = match l.cap {
        LoopCap::Explicit(n) => {
            let cf = abi.float_scratch[0];
            g.asm.fmov_imm(cf, n as f64, abi.scratch[0]);
            let slot = g.frame_ref().scratch_slot();
            g.asm.fstore(fp, slot, cf);
            Some(slot)
        }
        LoopCap::Proved(_) => None,
    };

    let loop_start = g.asm.offset();
    g.frame_ref().loop_stack.push(LoopCtx {
        start: loop_start,
        breaks: Vec::new(),
        continues: Vec::new(),
    });

    // while idx < limit
    let idx_f = abi.float_scratch[0];
    let lim_f = abi.float_scratch[1];
    let flag = abi.scratch[0];
    g.asm.fload(idx_f, fp, idx_slot);
    g.asm.fload(lim_f, fp, limit_slot);
    g.asm.fcmp_set(Cond::Lt, flag, idx_f, lim_f);
    let exit = g.asm.branch_if_zero(flag);

    // Cap counter: decrement, abort-to-end on zero.
    let cap_exit = if let Some(slot) = cap_slot {
        let cf = abi.float_scratch[0];
        let zero = abi.float_scratch[1];
        g.asm.fload(cf, fp, slot);
        g.asm.fmov_imm(zero, 0.0, abi.scratch[1]);
        g.asm.fcmp_set(Cond::Gt, flag, cf, zero);
        let out = g.asm.branch_if_zero(flag);
        let one = abi.float_scratch[1];
        g.asm.fmov_imm(one, 1.0, abi.scratch[1]);
        g.asm.fsub(cf, cf, one);
        g.asm.fstore(fp, slot, cf);
        Some(out)
    } else {
        None
    };

    // Bind the iteration variable.
    if let Some(slot) = binder_slot {
        match list_slot {
            Some(ls) => {
                // element = list[idx]
                let idxf = abi.float_scratch[0];
                g.asm.fload(idxf, fp, idx_slot);
                g.asm.f64_to_int(abi.int_args[1], idxf);
                g.asm.load(abi.int_args[0], fp, ls);
                g.asm.call_symbol(runtime::LIST_GET, false);
                g.asm.fstore(fp, slot, abi.fret);
            }
            None => {
                let idxf = abi.float_scratch[0];
                g.asm.fload(idxf, fp, idx_slot);
                g.asm.fstore(fp, slot, idxf);
            }
        }
    }

    if parallel {
        emit_parallel_body(g, l)?;
    } else {
        let n = l.body.statements.len();
        for (i, stmt) in l.body.statements.iter().enumerate() {
            emit_statement(g, stmt, keep_value && i + 1 == n)?;
        }
    }

    // continue lands at the increment.
    let ctx_continues = {
        let ctx = g.frame_ref().loop_stack.last_mut().unwrap();
        std::mem::take(&mut ctx.continues)
    };
    for fix in ctx_continues {
        g.asm.bind(fix);
    }

    // idx += 1; loop
    let one = abi.float_scratch[1];
    g.asm.fload(idx_f, fp, idx_slot);
    g.asm.fmov_imm(one, 1.0, abi.scratch[0]);
    g.asm.fadd(idx_f, idx_f, one);
    g.asm.fstore(fp, idx_slot, idx_f);
    g.asm.jump_to(loop_start);

    g.asm.bind(exit);
    if let Some(fix) = cap_exit {
        g.asm.bind(fix);
    }
    let ctx = g.frame_ref().loop_stack.pop().unwrap();
    for fix in ctx.breaks {
        g.asm.bind(fix);
    }

    if parallel {
        emit_join_children(g)?;
        if let Some(reducer) = &l.reducer {
            // The reducer folds per-worker results delivered over the
            // runtime's result pipe; workers are gone by now.
            let v = emit_expr(g, reducer)?;
            g.release_value(v);
        }
    }

    // A loop expression yields its result slot (set by keep_value
    // bodies), zero otherwise.
    if keep_value {
        let out = g.acquire_fpr(&l.span)?;
        let slot = g.frame_ref().result_slot;
        g.asm.fload(out, fp, slot);
        Ok(Value::Num(out))
    } else {
        let out = g.acquire_fpr(&l.span)?;
        g.asm.fmov_imm(out, 0.0, abi.scratch[0]);
        Ok(Value::Num(out))
    }
}

/// One forked process per iteration: clone, run the body in the child,
/// exit; the parent continues iterating.
fn emit_parallel_body(g: &mut CodeGenerator, l: &LoopStatement) -> CompileResult<()> {
    let abi = g.abi();
    let target = g.opts.target;

    g.asm.mov_ri(abi.sys_args[0], 17); // SIGCHLD
    g.asm.mov_ri(abi.sys_args[1], 0);
    g.asm.mov_ri(abi.sys_args[2], 0);
    g.asm.mov_ri(abi.sys_args[3], 0);
    g.asm.mov_ri(abi.sys_args[4], 0);
    g.asm.mov_ri(abi.sysno, target.sys_clone());
    g.asm.syscall();

    let in_parent = g.asm.branch_if_nonzero(abi.ret);

    for stmt in &l.body.statements {
        emit_statement(g, stmt, false)?;
    }
    g.asm.mov_ri(abi.sys_args[0], 0);
    g.asm.mov_ri(abi.sysno, target.sys_exit());
    g.asm.syscall();

    g.asm.bind(in_parent);
    Ok(())
}

/// wait4 until no children remain.
fn emit_join_children(g: &mut CodeGenerator) -> CompileResult<()> {
    let abi = g.abi();
    let target = g.opts.target;

    let again = g.asm.offset();
    g.asm.mov_ri(abi.sys_args[0], -1);
    g.asm.mov_ri(abi.sys_args[1], 0);
    g.asm.mov_ri(abi.sys_args[2], 0);
    g.asm.mov_ri(abi.sys_args[3], 0);
    g.asm.mov_ri(abi.sysno, target.sys_wait4());
    g.asm.syscall();

    // wait4 returns -ECHILD when the last child is reaped.
    let zero = abi.scratch[0];
    g.asm.mov_ri(zero, 0);
    let done = g.asm.branch_cmp(Cond::Lt, abi.ret, zero);
    g.asm.jump_to(again);
    g.asm.bind(done);
    Ok(())
}
