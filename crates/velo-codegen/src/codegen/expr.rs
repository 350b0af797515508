//! Expression emission.
//!
//! Values are 64-bit: numbers travel in float registers, pointers
//! (strings, lists, maps, closures) in integer registers, with
//! bit-pattern moves between the two where a uniform slot is needed.
//! Static type tags from the parser pick the representation; the only
//! dynamic check generated code performs is the NaN error probe.

use super::{CodeGenerator, StaticTy, Value, MAX_ARGS};
use crate::error::{CompileError, CompileResult};
use crate::runtime;
use velo_isa::{Cond, Fpr, Gpr};
use velo_parser::ast::*;
use velo_parser::token::Span;

/// Quiet-NaN base for error values; the low 32 bits carry the 4-byte
/// ASCII error code.
pub const ERROR_NAN_BASE: u64 = 0x7FF8_0000_0000_0000;

/// The standard error tags. Testing for error is a NaN test;
/// extraction is a mask over the low 32 bits.
pub const ERROR_CODES: [&[u8; 4]; 12] = [
    b"dv0 ", // division by zero
    b"idx ", // index out of range
    b"key ", // key not in map
    b"typ ", // type mismatch
    b"nil ", // null pointer
    b"mem ", // allocation failed
    b"arg ", // invalid argument
    b"io  ", // I/O error
    b"net ", // network error
    b"prs ", // parse error
    b"ovf ", // overflow
    b"udf ", // undefined
];

pub fn error_bits(code: &[u8; 4]) -> u64 {
    ERROR_NAN_BASE | u64::from(u32::from_le_bytes(*code))
}

/// Emit an expression, producing its value.
pub fn emit_expr(g: &mut CodeGenerator, expr: &Expression) -> CompileResult<Value> {
    match expr {
        Expression::Number(n) => {
            let f = g.acquire_fpr(&n.span)?;
            let scratch = g.abi().scratch[0];
            g.asm.fmov_imm(f, n.value, scratch);
            Ok(Value::Num(f))
        }
        Expression::Str(s) => {
            let label = g.syms.intern_string(&s.value);
            let reg = g.acquire_gpr(&s.span)?;
            g.asm.lea_symbol(reg, &label);
            Ok(Value::Ptr(reg))
        }
        Expression::FString(f) => emit_fstring_value(g, f),
        Expression::Identifier(id) => emit_identifier(g, id),
        Expression::Namespaced(n) => Err(CompileError::AmbiguousCall {
            name: format!("{}.{}", n.namespace, n.name),
            line: n.span.line,
            column: n.span.column,
        }),
        Expression::Call(c) => emit_call(g, c, false),
        Expression::Binary(b) => emit_binary(g, b),
        Expression::Unary(u) => emit_unary(g, u),
        Expression::Postfix(p) => emit_postfix(g, p),
        Expression::Index(i) => emit_index_get(g, i),
        Expression::Range(r) => Err(CompileError::unsupported(
            "range value outside a loop header",
            g.opts.target,
            &r.span,
        )),
        Expression::List(l) => emit_list_literal(g, l),
        Expression::Map(m) => emit_map_literal(g, m),
        Expression::Match(m) => super::matches::emit_match(g, m, false),
        Expression::Block(b) => super::stmt::emit_block_value(g, &b.block),
        Expression::Lambda(l) => emit_lambda_value(g, l),
        Expression::Send(s) => emit_send(g, s),
        Expression::Receive(r) => emit_receive(g, r),
        Expression::Spawn(s) => emit_spawn(g, s),
        Expression::Cast(c) => emit_cast(g, c),
        Expression::Move(m) => emit_expr(g, &m.operand),
        Expression::Length(l) => emit_length(g, l),
        Expression::LoopExpr(l) => super::stmt::emit_loop(g, l, true),
        Expression::Vector(v) => emit_vector(g, v),
        Expression::Fma(f) => emit_fma(g, f),
        Expression::UnsafeBlock(u) => emit_unsafe(g, u),
    }
}

/// Tail-position emission: self-recursive calls become jumps back to
/// the function head (argument re-marshalling included), match arms
/// propagate tail position.
pub fn emit_tail_expr(g: &mut CodeGenerator, expr: &Expression) -> CompileResult<Value> {
    match expr {
        Expression::Call(c) => emit_call(g, c, true),
        Expression::Match(m) => super::matches::emit_match(g, m, true),
        Expression::Block(b) => super::stmt::emit_block_value_tail(g, &b.block),
        other => emit_expr(g, other),
    }
}

// ============================================================================
// Identifiers and static types
// ============================================================================

/// Static type of a literal (globals declaration pass).
pub fn literal_ty(expr: &Expression) -> StaticTy {
    match expr {
        Expression::Number(_) => StaticTy::Num,
        Expression::Str(_) | Expression::FString(_) => StaticTy::Str,
        Expression::List(_) | Expression::Vector(_) => StaticTy::List,
        Expression::Map(_) => StaticTy::Map,
        Expression::Lambda(_) => StaticTy::Fn,
        _ => StaticTy::Unknown,
    }
}

/// Best-effort static type of an expression in the current frame.
pub fn expr_ty(g: &mut CodeGenerator, expr: &Expression) -> StaticTy {
    match expr {
        Expression::Number(_) => StaticTy::Num,
        Expression::Str(_) | Expression::FString(_) => StaticTy::Str,
        Expression::List(_) | Expression::Vector(_) => StaticTy::List,
        Expression::Map(_) => StaticTy::Map,
        Expression::Lambda(_) => StaticTy::Fn,
        Expression::Identifier(id) => {
            if let Some(frame) = g.frame.as_ref() {
                if let Some(ty) = frame.local_tys.get(&id.name) {
                    return *ty;
                }
                if frame.locals.contains_key(&id.name) {
                    return StaticTy::Num;
                }
            }
            if g.funcs.contains_key(&id.name) {
                return StaticTy::Fn;
            }
            if let Some(ty) = g.globals.get(&id.name) {
                return *ty;
            }
            g.module
                .var_types
                .iter()
                .find(|(n, _)| n == &id.name)
                .map(|(_, t)| StaticTy::from(*t))
                .unwrap_or(StaticTy::Unknown)
        }
        Expression::Binary(b) => match b.op {
            BinaryOp::Add => {
                if expr_ty(g, &b.left) == StaticTy::Str || expr_ty(g, &b.right) == StaticTy::Str {
                    StaticTy::Str
                } else {
                    StaticTy::Num
                }
            }
            BinaryOp::Pipe | BinaryOp::OrElse => StaticTy::Unknown,
            _ => StaticTy::Num,
        },
        Expression::Cast(c) => StaticTy::from(c.ty),
        Expression::Call(c) => {
            // Known callables carry an inferred result type.
            if let Expression::Identifier(id) = c.callee.as_ref() {
                if let Some(info) = g.funcs.get(&id.name) {
                    return info.ret_ty;
                }
            }
            StaticTy::Unknown
        }
        Expression::Unary(_) | Expression::Postfix(_) | Expression::Length(_) => StaticTy::Num,
        _ => StaticTy::Unknown,
    }
}

fn emit_identifier(g: &mut CodeGenerator, id: &Identifier) -> CompileResult<Value> {
    let abi = g.abi();
    let fp = abi.fp;

    // Frame local?
    let local = g
        .frame
        .as_ref()
        .and_then(|f| f.locals.get(&id.name).copied());
    if let Some(slot) = local {
        let ty = g
            .frame_ref()
            .local_tys
            .get(&id.name)
            .copied()
            .unwrap_or(StaticTy::Num);
        return match ty {
            StaticTy::Str | StaticTy::List | StaticTy::Map | StaticTy::Fn => {
                let reg = g.acquire_gpr(&id.span)?;
                g.asm.load(reg, fp, slot);
                Ok(Value::Ptr(reg))
            }
            _ => {
                let f = g.acquire_fpr(&id.span)?;
                g.asm.fload(f, fp, slot);
                Ok(Value::Num(f))
            }
        };
    }

    // Known function → its address as a first-class value.
    if g.funcs.contains_key(&id.name) {
        let reg = g.acquire_gpr(&id.span)?;
        g.asm.lea_symbol(reg, &id.name);
        return Ok(Value::Ptr(reg));
    }

    // Module-level global?
    if let Some(ty) = g.globals.get(&id.name).copied() {
        let addr = g.acquire_gpr(&id.span)?;
        g.asm.lea_symbol(addr, &format!("__g_{}", id.name));
        return match ty {
            StaticTy::Str | StaticTy::List | StaticTy::Map | StaticTy::Fn => {
                g.asm.load(addr, addr, 0);
                Ok(Value::Ptr(addr))
            }
            _ => {
                let f = g.acquire_fpr(&id.span)?;
                g.asm.fload(f, addr, 0);
                g.frame_ref().ra.release_gpr(addr);
                Ok(Value::Num(f))
            }
        };
    }

    Err(CompileError::undefined(&id.name, &id.span))
}

// ============================================================================
// Calls
// ============================================================================

pub fn emit_call(g: &mut CodeGenerator, call: &CallExpression, tail: bool) -> CompileResult<Value> {
    // Builtins first.
    if let Expression::Identifier(id) = call.callee.as_ref() {
        if let Some(v) = emit_builtin(g, &id.name, call)? {
            return Ok(v);
        }
    }

    // FFI: namespaced callee.
    if let Expression::Namespaced(ns) = call.callee.as_ref() {
        return super::ffi::emit_ffi_call(g, ns, &call.arguments, &call.span);
    }

    let arg_limit = MAX_ARGS.min(g.abi().float_args.len());
    if call.arguments.len() > arg_limit {
        return Err(CompileError::TooManyArguments {
            count: call.arguments.len(),
            limit: arg_limit,
            line: call.span.line,
            column: call.span.column,
        });
    }

    // Direct call to a known function?
    if let Expression::Identifier(id) = call.callee.as_ref() {
        if let Some(info) = g.funcs.get(&id.name).cloned() {
            let self_call = g
                .frame
                .as_ref()
                .is_some_and(|f| f.name == info.label);

            // Tail-call optimisation: self-recursion in tail position
            // becomes argument re-marshalling plus a jump to the head.
            if tail && self_call && info.captures.is_empty() {
                return emit_self_tail_call(g, call);
            }

            return emit_direct_call(g, &info, call);
        }
    }

    // Otherwise the callee is a value: closure or function address.
    emit_indirect_call(g, call)
}

/// Evaluate arguments left to right into temp slots. Returns the slots.
fn emit_args_to_temps(
    g: &mut CodeGenerator,
    args: &[Expression],
) -> CompileResult<Vec<i32>> {
    let abi = g.abi();
    let fp = abi.fp;
    let mut slots = Vec::with_capacity(args.len());
    for arg in args {
        let value = emit_expr(g, arg)?;
        let value = normalize(g, value, arg.span())?;
        let slot = g.frame_ref().alloc_temp();
        match value {
            Value::Num(f) => {
                g.asm.fstore(fp, slot, f);
                g.frame_ref().ra.release_fpr(f);
            }
            Value::Ptr(r) | Value::Int(r) => {
                g.asm.store(fp, slot, r);
                g.frame_ref().ra.release_gpr(r);
            }
        }
        slots.push(slot);
    }
    Ok(slots)
}

fn release_temps(g: &mut CodeGenerator, slots: &[i32]) {
    for slot in slots.iter().rev() {
        g.frame_ref().release_temp(*slot);
    }
}

/// Save every live register, run `call`, restore. This is the
/// unconditional save/restore across nested call sites; argument
/// registers of an outer call in flight are always among the live set.
fn with_saved_live<F>(g: &mut CodeGenerator, call: F) -> CompileResult<()>
where
    F: FnOnce(&mut CodeGenerator) -> CompileResult<()>,
{
    let (gprs, fprs) = g.frame_ref().ra.live();
    for r in &gprs {
        g.asm.push(*r);
    }
    for f in &fprs {
        g.asm.push_f(*f);
    }
    // Keep 16-byte call alignment on x86 (pushes are 8 bytes there).
    let misaligned = g.opts.target == velo_isa::Target::X86_64
        && (gprs.len() + fprs.len()) % 2 == 1;
    if misaligned {
        let sp = g.abi().sp;
        g.asm.add_ri(sp, sp, -8);
    }

    call(g)?;

    if misaligned {
        let sp = g.abi().sp;
        g.asm.add_ri(sp, sp, 8);
    }
    for f in fprs.iter().rev() {
        g.asm.pop_f(*f);
    }
    for r in gprs.iter().rev() {
        g.asm.pop(*r);
    }
    Ok(())
}

/// Load staged argument slots into the float argument registers.
fn load_args_from_temps(g: &mut CodeGenerator, slots: &[i32]) {
    let abi = g.abi();
    for (i, slot) in slots.iter().enumerate() {
        g.asm.fload(abi.float_args[i], abi.fp, *slot);
    }
}

/// Move the float return register into a fresh value register.
fn capture_result(g: &mut CodeGenerator, span: &Span) -> CompileResult<Value> {
    let abi = g.abi();
    let f = g.acquire_fpr(span)?;
    g.asm.fmov_rr(f, abi.fret);
    Ok(Value::Num(f))
}

fn emit_direct_call(
    g: &mut CodeGenerator,
    info: &super::FnInfo,
    call: &CallExpression,
) -> CompileResult<Value> {
    let slots = emit_args_to_temps(g, &call.arguments)?;

    // Closures get their environment pointer in the first integer
    // argument register.
    let env_slot = if info.captures.is_empty() {
        None
    } else {
        Some(emit_env_alloc(g, &info.captures, &call.span)?)
    };

    let cap = emit_cap_check_enter(g, call)?;

    with_saved_live(g, |g| {
        load_args_from_temps(g, &slots);
        if let Some(env) = env_slot {
            let abi = g.abi();
            g.asm.load(abi.int_args[0], abi.fp, env);
        }
        g.asm.call_symbol(&info.label, false);
        Ok(())
    })?;

    emit_cap_check_leave(g, cap)?;
    if let Some(env) = env_slot {
        g.frame_ref().release_temp(env);
    }
    release_temps(g, &slots);
    capture_result(g, &call.span)
}

/// Allocate a closure environment in the arena: [fnptr][captures...].
/// Captures are copied by value from the current frame.
fn emit_env_alloc(
    g: &mut CodeGenerator,
    captures: &[String],
    span: &Span,
) -> CompileResult<i32> {
    g.flags.uses_arenas = true;
    let abi = g.abi();
    let fp = abi.fp;
    let size = (captures.len() + 1) * 8;

    with_saved_live(g, |g| {
        let abi = g.abi();
        g.asm.mov_ri(abi.int_args[0], size as i64);
        g.asm.call_symbol(runtime::ARENA_ALLOC, false);
        Ok(())
    })?;

    let env_slot = g.frame_ref().alloc_temp();
    g.asm.store(fp, env_slot, abi.ret);

    // Copy captured slots into the environment.
    let tmp_f = abi.float_scratch[0];
    let env = abi.scratch[0];
    g.asm.load(env, fp, env_slot);
    for (i, cap) in captures.iter().enumerate() {
        let src = g
            .frame_ref()
            .locals
            .get(cap)
            .copied()
            .ok_or_else(|| CompileError::undefined(cap, span))?;
        g.asm.fload(tmp_f, fp, src);
        g.asm.fstore(env, (i as i32 + 1) * 8, tmp_f);
    }
    Ok(env_slot)
}

/// Recursion cap: a per-call-site depth counter in `.data`. Entry
/// increments it and skips the call once the bound is crossed; the
/// skipped path yields the `ovf ` error value instead.
struct CapState {
    label: String,
    skip: velo_isa::BranchFixup,
}

fn emit_cap_check_enter(
    g: &mut CodeGenerator,
    call: &CallExpression,
) -> CompileResult<Option<CapState>> {
    let Some(RecursionCap::Bounded(bound)) = call.cap else {
        return Ok(None);
    };
    let label = g.syms.fresh_slot("cap");
    let abi = g.abi();
    let addr = abi.scratch[0];
    let cnt = abi.scratch[1];
    let lim = abi.scratch[2];
    g.asm.lea_symbol(addr, &label);
    g.asm.load(cnt, addr, 0);
    g.asm.add_ri(cnt, cnt, 1);
    g.asm.store(addr, 0, cnt);
    g.asm.mov_ri(lim, bound as i64);
    let skip = g.asm.branch_cmp(Cond::Gt, cnt, lim);
    Ok(Some(CapState { label, skip }))
}

fn emit_cap_check_leave(g: &mut CodeGenerator, cap: Option<CapState>) -> CompileResult<()> {
    let Some(cap) = cap else { return Ok(()) };
    let abi = g.abi();
    let addr = abi.scratch[0];
    let cnt = abi.scratch[1];

    // Normal path: wind the counter back down.
    g.asm.lea_symbol(addr, &cap.label);
    g.asm.load(cnt, addr, 0);
    g.asm.add_ri(cnt, cnt, -1);
    g.asm.store(addr, 0, cnt);
    let done = g.asm.jump();

    // Capped path: undo the increment, substitute the overflow error.
    g.asm.bind(cap.skip);
    g.asm.lea_symbol(addr, &cap.label);
    g.asm.load(cnt, addr, 0);
    g.asm.add_ri(cnt, cnt, -1);
    g.asm.store(addr, 0, cnt);
    g.asm.mov_ri(cnt, error_bits(b"ovf ") as i64);
    g.asm.fmov_from_gpr(abi.fret, cnt);
    g.asm.bind(done);
    Ok(())
}

/// Self tail call: stage new arguments, overwrite the parameter slots,
/// jump back to the function head.
fn emit_self_tail_call(g: &mut CodeGenerator, call: &CallExpression) -> CompileResult<Value> {
    let slots = emit_args_to_temps(g, &call.arguments)?;
    let abi = g.abi();
    let fp = abi.fp;
    let tmp = abi.float_scratch[0];

    let param_slots = g.frame_ref().param_slots.clone();
    for (slot, param) in slots.iter().zip(param_slots.iter()) {
        g.asm.fload(tmp, fp, *slot);
        g.asm.fstore(fp, *param, tmp);
    }
    release_temps(g, &slots);

    let target = g.frame_ref().body_start;
    g.asm.jump_to(target);

    // Unreachable continuation value; the result slot is what returns.
    let f = g.acquire_fpr(&call.span)?;
    Ok(Value::Num(f))
}

fn emit_indirect_call(g: &mut CodeGenerator, call: &CallExpression) -> CompileResult<Value> {
    let slots = emit_args_to_temps(g, &call.arguments)?;

    let callee = emit_expr(g, &call.callee)?;
    let target = g.value_to_gpr(callee, &call.span)?;
    let target_slot = g.frame_ref().alloc_temp();
    let abi = g.abi();
    g.asm.store(abi.fp, target_slot, target);
    g.frame_ref().ra.release_gpr(target);

    with_saved_live(g, |g| {
        let abi = g.abi();
        load_args_from_temps(g, &slots);
        let scratch = abi.scratch[0];
        g.asm.load(scratch, abi.fp, target_slot);
        g.asm.call_reg(scratch);
        Ok(())
    })?;

    g.frame_ref().release_temp(target_slot);
    release_temps(g, &slots);
    capture_result(g, &call.span)
}

// ============================================================================
// Builtins
// ============================================================================

/// Calls handled by the compiler itself. Returns None when `name` is an
/// ordinary function.
fn emit_builtin(
    g: &mut CodeGenerator,
    name: &str,
    call: &CallExpression,
) -> CompileResult<Option<Value>> {
    // A local or user function shadows any builtin.
    let shadowed = g
        .frame
        .as_ref()
        .is_some_and(|f| f.locals.contains_key(name))
        || g.funcs.contains_key(name);
    if shadowed {
        return Ok(None);
    }

    match name {
        "println" => {
            emit_print_call(g, call, 1, true)?;
            Ok(Some(zero_value(g, &call.span)?))
        }
        "print" => {
            emit_print_call(g, call, 1, false)?;
            Ok(Some(zero_value(g, &call.span)?))
        }
        "printf" => {
            emit_printf(g, call, 1, false)?;
            Ok(Some(zero_value(g, &call.span)?))
        }
        "eprintf" => {
            emit_printf(g, call, 2, false)?;
            Ok(Some(zero_value(g, &call.span)?))
        }
        "exitf" => {
            emit_printf(g, call, 2, true)?;
            // exitf never returns; the value is for form's sake
            Ok(Some(zero_value(g, &call.span)?))
        }
        "exit" => {
            let status = call.arguments.first();
            let abi = g.abi();
            if let Some(arg) = status {
                let v = emit_expr(g, arg)?;
                let f = g.value_to_fpr(v, &call.span)?;
                g.asm.f64_to_int(abi.sys_args[0], f);
                g.frame_ref().ra.release_fpr(f);
            } else {
                g.asm.mov_ri(abi.sys_args[0], 0);
            }
            g.asm.mov_ri(abi.sysno, g.opts.target.sys_exit());
            g.asm.syscall();
            Ok(Some(zero_value(g, &call.span)?))
        }
        "chan" => {
            let slots = emit_args_to_temps(g, &call.arguments)?;
            with_saved_live(g, |g| {
                load_args_from_temps(g, &slots);
                g.asm.call_symbol(runtime::CHAN_MAKE, false);
                Ok(())
            })?;
            release_temps(g, &slots);
            Ok(Some(capture_result(g, &call.span)?))
        }
        "atomic_add" | "atomic_cas" => {
            Ok(Some(emit_atomic(g, name, call)?))
        }
        _ => Ok(None),
    }
}

fn zero_value(g: &mut CodeGenerator, span: &Span) -> CompileResult<Value> {
    let f = g.acquire_fpr(span)?;
    let scratch = g.abi().scratch[0];
    g.asm.fmov_imm(f, 0.0, scratch);
    Ok(Value::Num(f))
}

/// println/print: one argument, printed by static type, element-wise
/// for lists; f-strings print per part without building a string.
fn emit_print_call(
    g: &mut CodeGenerator,
    call: &CallExpression,
    fd: i64,
    newline: bool,
) -> CompileResult<()> {
    if let Some(arg) = call.arguments.first() {
        if let Expression::FString(f) = arg {
            for part in &f.parts {
                match part {
                    FStringPart::Text(text) => emit_print_literal(g, text, fd)?,
                    FStringPart::Expr(e) => emit_print_value(g, e, fd)?,
                }
            }
        } else {
            emit_print_value(g, arg, fd)?;
        }
    }
    if newline {
        emit_runtime_call0(g, runtime::PRINT_NEWLINE, fd)?;
    }
    Ok(())
}

fn emit_print_literal(g: &mut CodeGenerator, text: &str, fd: i64) -> CompileResult<()> {
    if text.is_empty() {
        return Ok(());
    }
    let label = g.syms.intern_string(text);
    with_saved_live(g, |g| {
        let abi = g.abi();
        g.asm.mov_ri(abi.int_args[0], fd);
        g.asm.lea_symbol(abi.int_args[1], &label);
        g.asm.call_symbol(runtime::PRINT_STR, false);
        Ok(())
    })
}

fn emit_print_value(g: &mut CodeGenerator, arg: &Expression, fd: i64) -> CompileResult<()> {
    let ty = expr_ty(g, arg);
    let value = emit_expr(g, arg)?;
    let span = *arg.span();

    match ty {
        StaticTy::Str => {
            let ptr = g.value_to_gpr(value, &span)?;
            let slot = g.frame_ref().alloc_temp();
            let abi = g.abi();
            g.asm.store(abi.fp, slot, ptr);
            g.frame_ref().ra.release_gpr(ptr);
            with_saved_live(g, |g| {
                let abi = g.abi();
                g.asm.mov_ri(abi.int_args[0], fd);
                g.asm.load(abi.int_args[1], abi.fp, slot);
                g.asm.call_symbol(runtime::PRINT_STR, false);
                Ok(())
            })?;
            g.frame_ref().release_temp(slot);
        }
        StaticTy::List => {
            let ptr = g.value_to_gpr(value, &span)?;
            let slot = g.frame_ref().alloc_temp();
            let abi = g.abi();
            g.asm.store(abi.fp, slot, ptr);
            g.frame_ref().ra.release_gpr(ptr);
            with_saved_live(g, |g| {
                let abi = g.abi();
                g.asm.mov_ri(abi.int_args[0], fd);
                g.asm.load(abi.int_args[1], abi.fp, slot);
                g.asm.call_symbol(runtime::PRINT_LIST, false);
                Ok(())
            })?;
            g.frame_ref().release_temp(slot);
        }
        _ => {
            let f = g.value_to_fpr(value, &span)?;
            let slot = g.frame_ref().alloc_temp();
            let abi = g.abi();
            g.asm.fstore(abi.fp, slot, f);
            g.frame_ref().ra.release_fpr(f);
            with_saved_live(g, |g| {
                let abi = g.abi();
                g.asm.mov_ri(abi.int_args[0], fd);
                g.asm.fload(abi.float_args[0], abi.fp, slot);
                g.asm.call_symbol(runtime::PRINT_NUM, false);
                Ok(())
            })?;
            g.frame_ref().release_temp(slot);
        }
    }
    Ok(())
}

fn emit_runtime_call0(g: &mut CodeGenerator, symbol: &str, fd: i64) -> CompileResult<()> {
    with_saved_live(g, |g| {
        let abi = g.abi();
        g.asm.mov_ri(abi.int_args[0], fd);
        g.asm.call_symbol(symbol, false);
        Ok(())
    })
}

/// printf/eprintf/exitf with a literal format string: the format is
/// split at compile time (%d, %f, %s, %%), so no format parser exists
/// at runtime: just per-part print calls through the write syscall.
fn emit_printf(
    g: &mut CodeGenerator,
    call: &CallExpression,
    fd: i64,
    exit_after: bool,
) -> CompileResult<()> {
    let Some(Expression::Str(fmt)) = call.arguments.first() else {
        return Err(CompileError::unsupported(
            "printf requires a literal format string",
            g.opts.target,
            &call.span,
        ));
    };

    let mut args = call.arguments[1..].iter();
    let mut text = String::new();
    let mut chars = fmt.value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => text.push('%'),
            Some(spec @ ('d' | 'f' | 's')) => {
                if !text.is_empty() {
                    emit_print_literal(g, &text, fd)?;
                    text.clear();
                }
                let Some(arg) = args.next() else {
                    return Err(CompileError::unsupported(
                        format!("missing argument for %{spec}"),
                        g.opts.target,
                        &call.span,
                    ));
                };
                emit_print_value(g, arg, fd)?;
            }
            other => {
                text.push('%');
                if let Some(o) = other {
                    text.push(o);
                }
            }
        }
    }
    if !text.is_empty() {
        emit_print_literal(g, &text, fd)?;
    }

    if exit_after {
        let abi = g.abi();
        g.asm.mov_ri(abi.sys_args[0], 1);
        g.asm.mov_ri(abi.sysno, g.opts.target.sys_exit());
        g.asm.syscall();
    }
    Ok(())
}

/// Atomic intrinsics: the only primitive allowed across processes on a
/// shared mapping. Lock-prefixed XADD/CMPXCHG on x86, LDXR/STXR on
/// ARM64, LR.D/SC.D on RISC-V.
fn emit_atomic(
    g: &mut CodeGenerator,
    name: &str,
    call: &CallExpression,
) -> CompileResult<Value> {
    use velo_isa::Target;
    let span = call.span;
    let slots = emit_args_to_temps(g, &call.arguments)?;
    let abi = g.abi();
    let fp = abi.fp;

    // Arguments were staged to slots, so the integer argument registers
    // double as work registers here.
    let addr = abi.scratch[0];
    let val = abi.scratch[1];
    let status = abi.scratch[2];
    let old = abi.int_args[2];
    let expected = abi.int_args[3];
    let tmpf = abi.float_scratch[0];

    // Address argument arrives as a number carrying pointer bits.
    g.asm.fload(tmpf, fp, slots[0]);
    g.asm.fmov_to_gpr(addr, tmpf);
    g.asm.fload(tmpf, fp, slots[1]);
    g.asm.f64_to_int(val, tmpf);

    // `old` ends up holding the previously stored value on every path.
    match (name, g.opts.target) {
        ("atomic_add", Target::X86_64) => {
            velo_isa::x86_64::lock_xadd(&mut g.asm.buf, addr, 0, val);
            g.asm.mov_rr(old, val);
        }
        ("atomic_add", Target::Arm64) => {
            let retry = g.asm.offset();
            velo_isa::arm64::ldxr(&mut g.asm.buf, old, addr);
            let sum = abi.int_args[3];
            velo_isa::arm64::add_rr(&mut g.asm.buf, sum, old, val);
            velo_isa::arm64::stxr(&mut g.asm.buf, status, sum, addr);
            let done = g.asm.branch_if_zero(status);
            g.asm.jump_to(retry);
            g.asm.bind(done);
        }
        ("atomic_add", Target::RiscV64) => {
            let retry = g.asm.offset();
            velo_isa::riscv64::lr_d(&mut g.asm.buf, old, addr);
            let sum = abi.int_args[3];
            velo_isa::riscv64::add(&mut g.asm.buf, sum, old, val);
            velo_isa::riscv64::sc_d(&mut g.asm.buf, status, sum, addr);
            let done = g.asm.branch_if_zero(status);
            g.asm.jump_to(retry);
            g.asm.bind(done);
        }
        ("atomic_cas", Target::X86_64) => {
            // Compare value travels through rax; `val` is the new value.
            g.asm.fload(tmpf, fp, slots[2]);
            g.asm.f64_to_int(Gpr(0), tmpf);
            velo_isa::x86_64::lock_cmpxchg(&mut g.asm.buf, addr, 0, val);
            g.asm.mov_rr(old, Gpr(0));
        }
        ("atomic_cas", _) => {
            g.asm.fload(tmpf, fp, slots[2]);
            g.asm.f64_to_int(expected, tmpf);
            let retry = g.asm.offset();
            match g.opts.target {
                Target::Arm64 => velo_isa::arm64::ldxr(&mut g.asm.buf, old, addr),
                _ => velo_isa::riscv64::lr_d(&mut g.asm.buf, old, addr),
            }
            let fail = g.asm.branch_cmp(Cond::Ne, old, expected);
            match g.opts.target {
                Target::Arm64 => {
                    velo_isa::arm64::stxr(&mut g.asm.buf, status, val, addr)
                }
                _ => velo_isa::riscv64::sc_d(&mut g.asm.buf, status, val, addr),
            }
            let done = g.asm.branch_if_zero(status);
            g.asm.jump_to(retry);
            g.asm.bind(done);
            g.asm.bind(fail);
        }
        _ => {
            return Err(CompileError::unsupported(
                format!("intrinsic {name}"),
                g.opts.target,
                &span,
            ))
        }
    }

    release_temps(g, &slots);
    // Result: the value observed before the operation.
    let out = g.acquire_fpr(&span)?;
    g.asm.int_to_f64(out, old);
    Ok(Value::Num(out))
}

// ============================================================================
// Operators
// ============================================================================

fn emit_binary(g: &mut CodeGenerator, b: &BinaryExpression) -> CompileResult<Value> {
    match b.op {
        BinaryOp::Pipe => {
            // x | f  ≡  f(x)
            let call = CallExpression {
                callee: b.right.clone(),
                arguments: vec![(*b.left).clone()],
                cap: None,
                span: b.span,
            };
            return emit_call(g, &call, false);
        }
        BinaryOp::OrElse => return emit_or_else(g, b),
        BinaryOp::And | BinaryOp::Or => return emit_logical(g, b),
        _ => {}
    }

    // String concatenation routes through the runtime.
    if b.op == BinaryOp::Add
        && (expr_ty(g, &b.left) == StaticTy::Str || expr_ty(g, &b.right) == StaticTy::Str)
    {
        g.flags.uses_arenas = true;
        return emit_runtime_call2(g, runtime::STRING_CONCAT, &b.left, &b.right, &b.span);
    }

    match b.op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let left = emit_num(g, &b.left)?;
            let right = emit_num(g, &b.right)?;
            match b.op {
                BinaryOp::Add => g.asm.fadd(left, left, right),
                BinaryOp::Sub => g.asm.fsub(left, left, right),
                BinaryOp::Mul => g.asm.fmul(left, left, right),
                BinaryOp::Div => {
                    // Division by zero produces the `dv0 ` error NaN.
                    emit_div_guarded(g, left, right, &b.span)?;
                }
                _ => unreachable!(),
            }
            g.frame_ref().ra.release_fpr(right);
            Ok(Value::Num(left))
        }
        BinaryOp::Mod => {
            // a - trunc(a/b) * b
            let a = emit_num(g, &b.left)?;
            let bb = emit_num(g, &b.right)?;
            let q = g.acquire_fpr(&b.span)?;
            let abi = g.abi();
            let tmp = abi.scratch[0];
            g.asm.fmov_rr(q, a);
            g.asm.fdiv(q, q, bb);
            g.asm.f64_to_int(tmp, q);
            g.asm.int_to_f64(q, tmp);
            g.asm.fmul(q, q, bb);
            g.asm.fsub(a, a, q);
            g.frame_ref().ra.release_fpr(q);
            g.frame_ref().ra.release_fpr(bb);
            Ok(Value::Num(a))
        }
        BinaryOp::Pow => {
            emit_runtime_call2(g, runtime::POW, &b.left, &b.right, &b.span)
        }
        BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Less | BinaryOp::LessEq
        | BinaryOp::Greater | BinaryOp::GreaterEq => {
            let cond = match b.op {
                BinaryOp::Eq => Cond::Eq,
                BinaryOp::NotEq => Cond::Ne,
                BinaryOp::Less => Cond::Lt,
                BinaryOp::LessEq => Cond::Le,
                BinaryOp::Greater => Cond::Gt,
                _ => Cond::Ge,
            };
            let left = emit_num(g, &b.left)?;
            let right = emit_num(g, &b.right)?;
            let flag = g.acquire_gpr(&b.span)?;
            g.asm.fcmp_set(cond, flag, left, right);
            g.frame_ref().ra.release_fpr(left);
            g.frame_ref().ra.release_fpr(right);
            let out = g.acquire_fpr(&b.span)?;
            g.asm.int_to_f64(out, flag);
            g.frame_ref().ra.release_gpr(flag);
            Ok(Value::Num(out))
        }
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl
        | BinaryOp::Shr | BinaryOp::BitTest => {
            let left = emit_num(g, &b.left)?;
            let right = emit_num(g, &b.right)?;
            let li = g.acquire_gpr(&b.span)?;
            let ri = g.acquire_gpr(&b.span)?;
            g.asm.f64_to_int(li, left);
            g.asm.f64_to_int(ri, right);
            g.frame_ref().ra.release_fpr(left);
            g.frame_ref().ra.release_fpr(right);
            match b.op {
                BinaryOp::BitAnd => g.asm.and(li, li, ri),
                BinaryOp::BitOr => g.asm.or(li, li, ri),
                BinaryOp::BitXor => g.asm.xor(li, li, ri),
                BinaryOp::Shl => g.asm.shl(li, li, ri),
                BinaryOp::Shr => g.asm.shr(li, li, ri),
                BinaryOp::BitTest => {
                    g.asm.shr(li, li, ri);
                    g.asm.mov_ri(ri, 1);
                    g.asm.and(li, li, ri);
                }
                _ => unreachable!(),
            }
            g.frame_ref().ra.release_gpr(ri);
            let out = g.acquire_fpr(&b.span)?;
            g.asm.int_to_f64(out, li);
            g.frame_ref().ra.release_gpr(li);
            Ok(Value::Num(out))
        }
        BinaryOp::Pipe | BinaryOp::OrElse | BinaryOp::And | BinaryOp::Or => unreachable!(),
    }
}

/// Division with the `dv0 ` NaN on a zero divisor.
fn emit_div_guarded(
    g: &mut CodeGenerator,
    left: Fpr,
    right: Fpr,
    span: &Span,
) -> CompileResult<()> {
    let abi = g.abi();
    let zero = g.acquire_fpr(span)?;
    let flag = abi.scratch[0];
    g.asm.fmov_imm(zero, 0.0, flag);
    g.asm.fcmp_set(Cond::Eq, flag, right, zero);
    let nonzero = g.asm.branch_if_zero(flag);
    let bits = abi.scratch[1];
    g.asm.mov_ri(bits, error_bits(b"dv0 ") as i64);
    g.asm.fmov_from_gpr(left, bits);
    let done = g.asm.jump();
    g.asm.bind(nonzero);
    g.asm.fdiv(left, left, right);
    g.asm.bind(done);
    g.frame_ref().ra.release_fpr(zero);
    Ok(())
}

/// `or!`: lazily substitute the right side when the left is an error
/// (NaN-tagged). The right side never runs for valid values.
fn emit_or_else(g: &mut CodeGenerator, b: &BinaryExpression) -> CompileResult<Value> {
    let abi = g.abi();
    let fp = abi.fp;

    let left = emit_expr(g, &b.left)?;
    let left = g.value_to_fpr(left, &b.span)?;
    let slot = g.frame_ref().alloc_temp();
    g.asm.fstore(fp, slot, left);

    let flag = abi.scratch[0];
    g.asm.fis_nan(flag, left);
    g.frame_ref().ra.release_fpr(left);
    let valid = g.asm.branch_if_zero(flag);

    let right = emit_expr(g, &b.right)?;
    let right = g.value_to_fpr(right, &b.span)?;
    g.asm.fstore(fp, slot, right);
    g.frame_ref().ra.release_fpr(right);

    g.asm.bind(valid);
    let out = g.acquire_fpr(&b.span)?;
    g.asm.fload(out, fp, slot);
    g.frame_ref().release_temp(slot);
    Ok(Value::Num(out))
}

/// Short-circuit && and ||, yielding 0/1.
fn emit_logical(g: &mut CodeGenerator, b: &BinaryExpression) -> CompileResult<Value> {
    let abi = g.abi();
    let fp = abi.fp;
    let slot = g.frame_ref().alloc_temp();

    let left = emit_expr(g, &b.left)?;
    let flag = emit_truth(g, left, &b.span)?;
    let out_f = abi.float_scratch[0];
    g.asm.int_to_f64(out_f, flag);
    g.asm.fstore(fp, slot, out_f);

    let skip = if b.op == BinaryOp::And {
        g.asm.branch_if_zero(flag)
    } else {
        g.asm.branch_if_nonzero(flag)
    };
    g.frame_ref().ra.release_gpr(flag);

    let right = emit_expr(g, &b.right)?;
    let rflag = emit_truth(g, right, &b.span)?;
    g.asm.int_to_f64(out_f, rflag);
    g.asm.fstore(fp, slot, out_f);
    g.frame_ref().ra.release_gpr(rflag);

    g.asm.bind(skip);
    let out = g.acquire_fpr(&b.span)?;
    g.asm.fload(out, fp, slot);
    g.frame_ref().release_temp(slot);
    Ok(Value::Num(out))
}

/// Truthiness: non-zero number, non-null pointer.
pub fn emit_truth(g: &mut CodeGenerator, value: Value, span: &Span) -> CompileResult<Gpr> {
    match value {
        Value::Num(f) => {
            let zero = g.acquire_fpr(span)?;
            let flag = g.acquire_gpr(span)?;
            g.asm.fmov_imm(zero, 0.0, flag);
            g.asm.fcmp_set(Cond::Ne, flag, f, zero);
            g.frame_ref().ra.release_fpr(zero);
            g.frame_ref().ra.release_fpr(f);
            Ok(flag)
        }
        Value::Int(r) | Value::Ptr(r) => Ok(r),
    }
}

fn emit_unary(g: &mut CodeGenerator, u: &UnaryExpression) -> CompileResult<Value> {
    match u.op {
        UnaryOp::Neg => {
            let v = emit_num(g, &u.operand)?;
            let zero = g.acquire_fpr(&u.span)?;
            let scratch = g.abi().scratch[0];
            g.asm.fmov_imm(zero, 0.0, scratch);
            g.asm.fsub(zero, zero, v);
            g.frame_ref().ra.release_fpr(v);
            Ok(Value::Num(zero))
        }
        UnaryOp::Not => {
            let v = emit_expr(g, &u.operand)?;
            let flag = emit_truth(g, v, &u.span)?;
            let one = g.acquire_gpr(&u.span)?;
            g.asm.mov_ri(one, 1);
            g.asm.xor(flag, flag, one);
            g.frame_ref().ra.release_gpr(one);
            let out = g.acquire_fpr(&u.span)?;
            g.asm.int_to_f64(out, flag);
            g.frame_ref().ra.release_gpr(flag);
            Ok(Value::Num(out))
        }
        UnaryOp::BitNot => {
            let v = emit_num(g, &u.operand)?;
            let i = g.acquire_gpr(&u.span)?;
            g.asm.f64_to_int(i, v);
            g.asm.not(i, i);
            g.asm.int_to_f64(v, i);
            g.frame_ref().ra.release_gpr(i);
            Ok(Value::Num(v))
        }
    }
}

fn emit_postfix(g: &mut CodeGenerator, p: &PostfixExpression) -> CompileResult<Value> {
    let Expression::Identifier(id) = p.operand.as_ref() else {
        return Err(CompileError::unsupported(
            "postfix ++/-- on a non-identifier",
            g.opts.target,
            &p.span,
        ));
    };
    let slot = g
        .frame
        .as_mut()
        .and_then(|f| f.locals.get(&id.name).copied())
        .ok_or_else(|| CompileError::undefined(&id.name, &id.span))?;

    let abi = g.abi();
    let fp = abi.fp;
    let old = g.acquire_fpr(&p.span)?;
    let one = g.acquire_fpr(&p.span)?;
    g.asm.fload(old, fp, slot);
    g.asm.fmov_imm(one, 1.0, abi.scratch[0]);
    let new = abi.float_scratch[0];
    g.asm.fmov_rr(new, old);
    match p.op {
        PostfixOp::Increment => g.asm.fadd(new, new, one),
        PostfixOp::Decrement => g.asm.fsub(new, new, one),
    }
    g.asm.fstore(fp, slot, new);
    g.frame_ref().ra.release_fpr(one);
    // Postfix yields the previous value.
    Ok(Value::Num(old))
}

/// Evaluate an expression and coerce it into a float register.
pub fn emit_num(g: &mut CodeGenerator, expr: &Expression) -> CompileResult<Fpr> {
    let v = emit_expr(g, expr)?;
    g.value_to_fpr(v, expr.span())
}

/// Int-flag values become plain numbers before they are stored.
pub fn normalize(g: &mut CodeGenerator, value: Value, span: &Span) -> CompileResult<Value> {
    match value {
        Value::Int(r) => {
            let f = g.acquire_fpr(span)?;
            g.asm.int_to_f64(f, r);
            g.frame_ref().ra.release_gpr(r);
            Ok(Value::Num(f))
        }
        other => Ok(other),
    }
}

// ============================================================================
// Containers
// ============================================================================

fn emit_list_literal(g: &mut CodeGenerator, l: &ListExpression) -> CompileResult<Value> {
    g.flags.uses_arenas = true;
    let abi = g.abi();
    let fp = abi.fp;

    with_saved_live(g, |g| {
        let abi = g.abi();
        g.asm.mov_ri(abi.int_args[0], l.elements.len() as i64);
        g.asm.call_symbol(runtime::LIST_NEW, false);
        Ok(())
    })?;
    let list_slot = g.frame_ref().alloc_temp();
    g.asm.store(fp, list_slot, abi.ret);

    for (i, element) in l.elements.iter().enumerate() {
        let v = emit_expr(g, element)?;
        let v = normalize(g, v, element.span())?;
        let f = g.value_to_fpr(v, element.span())?;
        let vslot = g.frame_ref().alloc_temp();
        g.asm.fstore(fp, vslot, f);
        g.frame_ref().ra.release_fpr(f);

        with_saved_live(g, |g| {
            let abi = g.abi();
            g.asm.load(abi.int_args[0], abi.fp, list_slot);
            g.asm.mov_ri(abi.int_args[1], i as i64);
            g.asm.fload(abi.float_args[0], abi.fp, vslot);
            g.asm.call_symbol(runtime::LIST_SET, false);
            Ok(())
        })?;
        g.frame_ref().release_temp(vslot);
    }

    let out = g.acquire_gpr(&l.span)?;
    g.asm.load(out, fp, list_slot);
    g.frame_ref().release_temp(list_slot);
    Ok(Value::Ptr(out))
}

/// FNV-1a over the bytes, the compile-time arm of the map key hash.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

fn emit_map_literal(g: &mut CodeGenerator, m: &MapExpression) -> CompileResult<Value> {
    g.flags.uses_arenas = true;
    let abi = g.abi();
    let fp = abi.fp;

    with_saved_live(g, |g| {
        let abi = g.abi();
        g.asm.mov_ri(abi.int_args[0], (m.entries.len() * 2).max(8) as i64);
        g.asm.call_symbol(runtime::MAP_NEW, false);
        Ok(())
    })?;
    let map_slot = g.frame_ref().alloc_temp();
    g.asm.store(fp, map_slot, abi.ret);

    for (key, value) in &m.entries {
        let key_slot = emit_map_key(g, key)?;
        let v = emit_expr(g, value)?;
        let v = normalize(g, v, value.span())?;
        let f = g.value_to_fpr(v, value.span())?;
        let vslot = g.frame_ref().alloc_temp();
        g.asm.fstore(fp, vslot, f);
        g.frame_ref().ra.release_fpr(f);

        with_saved_live(g, |g| {
            let abi = g.abi();
            g.asm.load(abi.int_args[0], abi.fp, map_slot);
            g.asm.load(abi.int_args[1], abi.fp, key_slot);
            g.asm.fload(abi.float_args[0], abi.fp, vslot);
            g.asm.call_symbol(runtime::MAP_SET, false);
            Ok(())
        })?;
        g.frame_ref().release_temp(vslot);
        g.frame_ref().release_temp(key_slot);
    }

    let out = g.acquire_gpr(&m.span)?;
    g.asm.load(out, fp, map_slot);
    g.frame_ref().release_temp(map_slot);
    Ok(Value::Ptr(out))
}

/// Map keys are 64-bit: literal strings hash at compile time, runtime
/// strings via the runtime hash, numbers use their bit pattern.
fn emit_map_key(g: &mut CodeGenerator, key: &Expression) -> CompileResult<i32> {
    let abi = g.abi();
    let fp = abi.fp;
    let slot = g.frame_ref().alloc_temp();

    if let Expression::Str(s) = key {
        let k = g.acquire_gpr(&s.span)?;
        g.asm.mov_ri(k, fnv1a(s.value.as_bytes()) as i64);
        g.asm.store(fp, slot, k);
        g.frame_ref().ra.release_gpr(k);
        return Ok(slot);
    }

    let ty = expr_ty(g, key);
    let v = emit_expr(g, key)?;
    match ty {
        StaticTy::Str => {
            let ptr = g.value_to_gpr(v, key.span())?;
            let pslot = g.frame_ref().alloc_temp();
            g.asm.store(fp, pslot, ptr);
            g.frame_ref().ra.release_gpr(ptr);
            with_saved_live(g, |g| {
                let abi = g.abi();
                g.asm.load(abi.int_args[0], abi.fp, pslot);
                g.asm.call_symbol(runtime::STR_HASH, false);
                Ok(())
            })?;
            g.frame_ref().release_temp(pslot);
            g.asm.store(fp, slot, abi.ret);
        }
        _ => {
            let bits = g.value_to_gpr(v, key.span())?;
            g.asm.store(fp, slot, bits);
            g.frame_ref().ra.release_gpr(bits);
        }
    }
    Ok(slot)
}

pub fn emit_index_get(g: &mut CodeGenerator, i: &IndexExpression) -> CompileResult<Value> {
    let object_ty = expr_ty(g, &i.object);
    let helper = match object_ty {
        StaticTy::List => runtime::LIST_GET,
        _ => runtime::MAP_GET,
    };

    let abi = g.abi();
    let fp = abi.fp;

    let obj = emit_expr(g, &i.object)?;
    let obj = g.value_to_gpr(obj, i.object.span())?;
    let obj_slot = g.frame_ref().alloc_temp();
    g.asm.store(fp, obj_slot, obj);
    g.frame_ref().ra.release_gpr(obj);

    let key_slot = if object_ty == StaticTy::List {
        let idx = emit_num(g, &i.index)?;
        let k = g.acquire_gpr(&i.span)?;
        g.asm.f64_to_int(k, idx);
        g.frame_ref().ra.release_fpr(idx);
        let slot = g.frame_ref().alloc_temp();
        g.asm.store(fp, slot, k);
        g.frame_ref().ra.release_gpr(k);
        slot
    } else {
        emit_map_key(g, &i.index)?
    };

    with_saved_live(g, |g| {
        let abi = g.abi();
        g.asm.load(abi.int_args[0], abi.fp, obj_slot);
        g.asm.load(abi.int_args[1], abi.fp, key_slot);
        g.asm.call_symbol(helper, false);
        Ok(())
    })?;

    g.frame_ref().release_temp(key_slot);
    g.frame_ref().release_temp(obj_slot);
    capture_result(g, &i.span)
}

/// Indexed update `m[k] = v` / `xs[i] = v`.
pub fn emit_index_set(
    g: &mut CodeGenerator,
    target: &IndexExpression,
    value: &Expression,
) -> CompileResult<()> {
    let object_ty = expr_ty(g, &target.object);
    let helper = match object_ty {
        StaticTy::List => runtime::LIST_SET,
        _ => runtime::MAP_SET,
    };

    let abi = g.abi();
    let fp = abi.fp;

    let obj = emit_expr(g, &target.object)?;
    let obj = g.value_to_gpr(obj, target.object.span())?;
    let obj_slot = g.frame_ref().alloc_temp();
    g.asm.store(fp, obj_slot, obj);
    g.frame_ref().ra.release_gpr(obj);

    let key_slot = if object_ty == StaticTy::List {
        let idx = emit_num(g, &target.index)?;
        let k = g.acquire_gpr(&target.span)?;
        g.asm.f64_to_int(k, idx);
        g.frame_ref().ra.release_fpr(idx);
        let slot = g.frame_ref().alloc_temp();
        g.asm.store(fp, slot, k);
        g.frame_ref().ra.release_gpr(k);
        slot
    } else {
        emit_map_key(g, &target.index)?
    };

    let v = emit_expr(g, value)?;
    let v = normalize(g, v, value.span())?;
    let f = g.value_to_fpr(v, value.span())?;
    let vslot = g.frame_ref().alloc_temp();
    g.asm.fstore(fp, vslot, f);
    g.frame_ref().ra.release_fpr(f);

    with_saved_live(g, |g| {
        let abi = g.abi();
        g.asm.load(abi.int_args[0], abi.fp, obj_slot);
        g.asm.load(abi.int_args[1], abi.fp, key_slot);
        g.asm.fload(abi.float_args[0], abi.fp, vslot);
        g.asm.call_symbol(helper, false);
        Ok(())
    })?;

    g.frame_ref().release_temp(vslot);
    g.frame_ref().release_temp(key_slot);
    g.frame_ref().release_temp(obj_slot);
    Ok(())
}

// ============================================================================
// Strings, lambdas, channels
// ============================================================================

/// f-string in value position: concatenate the formatted parts.
fn emit_fstring_value(g: &mut CodeGenerator, f: &FStringLiteral) -> CompileResult<Value> {
    g.flags.uses_arenas = true;
    let abi = g.abi();
    let fp = abi.fp;

    let acc_slot = g.frame_ref().alloc_temp();
    let empty = g.syms.intern_string("");
    let tmp = abi.scratch[0];
    g.asm.lea_symbol(tmp, &empty);
    g.asm.store(fp, acc_slot, tmp);

    for part in &f.parts {
        let piece_slot = g.frame_ref().alloc_temp();
        match part {
            FStringPart::Text(text) => {
                let label = g.syms.intern_string(text);
                let r = abi.scratch[0];
                g.asm.lea_symbol(r, &label);
                g.asm.store(fp, piece_slot, r);
            }
            FStringPart::Expr(e) => {
                let ty = expr_ty(g, e);
                let v = emit_expr(g, e)?;
                match ty {
                    StaticTy::Str => {
                        let p = g.value_to_gpr(v, e.span())?;
                        g.asm.store(fp, piece_slot, p);
                        g.frame_ref().ra.release_gpr(p);
                    }
                    StaticTy::List => {
                        // Element-wise list formatting (see DESIGN.md on
                        // the list-display question).
                        let p = g.value_to_gpr(v, e.span())?;
                        let ps = g.frame_ref().alloc_temp();
                        g.asm.store(fp, ps, p);
                        g.frame_ref().ra.release_gpr(p);
                        with_saved_live(g, |g| {
                            let abi = g.abi();
                            g.asm.load(abi.int_args[0], abi.fp, ps);
                            g.asm.call_symbol(runtime::LIST_TO_STR, false);
                            Ok(())
                        })?;
                        g.frame_ref().release_temp(ps);
                        g.asm.store(fp, piece_slot, abi.ret);
                    }
                    _ => {
                        let num = g.value_to_fpr(v, e.span())?;
                        let ns = g.frame_ref().alloc_temp();
                        g.asm.fstore(fp, ns, num);
                        g.frame_ref().ra.release_fpr(num);
                        with_saved_live(g, |g| {
                            let abi = g.abi();
                            g.asm.fload(abi.float_args[0], abi.fp, ns);
                            g.asm.call_symbol(runtime::NUM_TO_STR, false);
                            Ok(())
                        })?;
                        g.frame_ref().release_temp(ns);
                        g.asm.store(fp, piece_slot, abi.ret);
                    }
                }
            }
        }

        with_saved_live(g, |g| {
            let abi = g.abi();
            g.asm.load(abi.int_args[0], abi.fp, acc_slot);
            g.asm.load(abi.int_args[1], abi.fp, piece_slot);
            g.asm.call_symbol(runtime::STRING_CONCAT, false);
            Ok(())
        })?;
        g.asm.store(fp, acc_slot, abi.ret);
        g.frame_ref().release_temp(piece_slot);
    }

    let out = g.acquire_gpr(&f.span)?;
    g.asm.load(out, fp, acc_slot);
    g.frame_ref().release_temp(acc_slot);
    Ok(Value::Ptr(out))
}

/// A lambda used as a value: non-capturing lambdas are a bare function
/// address; capturing ones allocate [fnptr][captures...] in the arena.
fn emit_lambda_value(g: &mut CodeGenerator, l: &LambdaExpression) -> CompileResult<Value> {
    let captures = g
        .funcs
        .get(&l.name)
        .map(|i| i.captures.clone())
        .unwrap_or_default();

    if captures.is_empty() {
        let reg = g.acquire_gpr(&l.span)?;
        g.asm.lea_symbol(reg, &l.name);
        return Ok(Value::Ptr(reg));
    }

    g.flags.uses_arenas = true;
    let env_slot = emit_env_alloc(g, &captures, &l.span)?;
    let abi = g.abi();
    let env = g.acquire_gpr(&l.span)?;
    g.asm.load(env, abi.fp, env_slot);
    let fnaddr = abi.scratch[0];
    g.asm.lea_symbol(fnaddr, &l.name);
    g.asm.store(env, 0, fnaddr);
    g.frame_ref().release_temp(env_slot);
    Ok(Value::Ptr(env))
}

fn emit_send(g: &mut CodeGenerator, s: &SendExpression) -> CompileResult<Value> {
    emit_runtime_call_cv(g, runtime::CHAN_SEND, &s.channel, &s.value, &s.span)
}

fn emit_receive(g: &mut CodeGenerator, r: &ReceiveExpression) -> CompileResult<Value> {
    let abi = g.abi();
    let fp = abi.fp;
    let ch = emit_num(g, &r.channel)?;
    let slot = g.frame_ref().alloc_temp();
    g.asm.fstore(fp, slot, ch);
    g.frame_ref().ra.release_fpr(ch);
    with_saved_live(g, |g| {
        let abi = g.abi();
        let f = abi.float_scratch[0];
        g.asm.fload(f, abi.fp, slot);
        g.asm.f64_to_int(abi.int_args[0], f);
        g.asm.call_symbol(runtime::CHAN_RECV, false);
        Ok(())
    })?;
    g.frame_ref().release_temp(slot);
    capture_result(g, &r.span)
}

/// spawn: clone, run the call in the child, exit; the parent keeps the
/// pid as a number.
fn emit_spawn(g: &mut CodeGenerator, s: &SpawnExpression) -> CompileResult<Value> {
    let abi = g.abi();
    let target = g.opts.target;

    // clone(SIGCHLD, child_stack = 0)
    g.asm.mov_ri(abi.sys_args[0], 17); // SIGCHLD
    g.asm.mov_ri(abi.sys_args[1], 0);
    g.asm.mov_ri(abi.sys_args[2], 0);
    g.asm.mov_ri(abi.sys_args[3], 0);
    g.asm.mov_ri(abi.sys_args[4], 0);
    g.asm.mov_ri(abi.sysno, target.sys_clone());
    g.asm.syscall();

    let in_parent = g.asm.branch_if_nonzero(abi.ret);

    // Child: run the spawned call, then exit(0).
    let v = emit_expr(g, &s.call)?;
    g.release_value(v);
    g.asm.mov_ri(abi.sys_args[0], 0);
    g.asm.mov_ri(abi.sysno, target.sys_exit());
    g.asm.syscall();

    g.asm.bind(in_parent);
    let out = g.acquire_fpr(&s.span)?;
    g.asm.int_to_f64(out, abi.ret);
    Ok(Value::Num(out))
}

fn emit_cast(g: &mut CodeGenerator, c: &CastExpression) -> CompileResult<Value> {
    let v = emit_expr(g, &c.operand)?;
    match c.ty {
        TypeTag::I32 | TypeTag::I64 => {
            let f = g.value_to_fpr(v, &c.span)?;
            let r = g.acquire_gpr(&c.span)?;
            g.asm.f64_to_int(r, f);
            g.frame_ref().ra.release_fpr(f);
            Ok(Value::Int(r))
        }
        TypeTag::CStr => {
            // Skip the length prefix: the payload is NUL-terminated.
            let p = g.value_to_gpr(v, &c.span)?;
            g.asm.add_ri(p, p, 8);
            Ok(Value::Int(p))
        }
        TypeTag::CPtr => {
            let p = g.value_to_gpr(v, &c.span)?;
            Ok(Value::Int(p))
        }
        TypeTag::Num | TypeTag::F64 | TypeTag::Bool => {
            let f = g.value_to_fpr(v, &c.span)?;
            Ok(Value::Num(f))
        }
        TypeTag::Str | TypeTag::List | TypeTag::Map => {
            let p = g.value_to_gpr(v, &c.span)?;
            Ok(Value::Ptr(p))
        }
    }
}

fn emit_length(g: &mut CodeGenerator, l: &LengthExpression) -> CompileResult<Value> {
    // Strings, lists and maps all lead with their length/count qword.
    let v = emit_expr(g, &l.operand)?;
    let p = g.value_to_gpr(v, &l.span)?;
    g.asm.load(p, p, 0);
    let out = g.acquire_fpr(&l.span)?;
    g.asm.int_to_f64(out, p);
    g.frame_ref().ra.release_gpr(p);
    Ok(Value::Num(out))
}

/// simd(...) lowers to a list value; the literal also arms the CPU
/// feature detection path in the entry stub.
fn emit_vector(g: &mut CodeGenerator, v: &VectorExpression) -> CompileResult<Value> {
    g.flags.uses_simd = true;
    let list = ListExpression {
        elements: v.elements.clone(),
        span: v.span,
    };
    emit_list_literal(g, &list)
}

fn emit_fma(g: &mut CodeGenerator, f: &FmaExpression) -> CompileResult<Value> {
    g.flags.uses_fma = true;
    let a = emit_num(g, &f.a)?;
    let b = emit_num(g, &f.b)?;
    let c = emit_num(g, &f.c)?;
    // dst = c + a*b
    g.asm.fma(c, a, b);
    g.frame_ref().ra.release_fpr(a);
    g.frame_ref().ra.release_fpr(b);
    Ok(Value::Num(c))
}

// ============================================================================
// Unsafe blocks
// ============================================================================

/// Select the arm matching the current target and emit it verbatim.
fn emit_unsafe(g: &mut CodeGenerator, u: &UnsafeBlockExpression) -> CompileResult<Value> {
    use velo_isa::Target;
    let want = match g.opts.target {
        Target::X86_64 => UnsafeArch::X86,
        Target::Arm64 => UnsafeArch::Arm64,
        Target::RiscV64 => UnsafeArch::RiscV64,
    };

    let arm = u.arms.iter().find(|a| a.arch == want).ok_or_else(|| {
        CompileError::unsupported("unsafe block has no arm for this target", g.opts.target, &u.span)
    })?;

    for instr in &arm.instructions {
        emit_asm_instr(g, instr, &arm.span)?;
    }

    // `as T` types whatever the block left in the integer return
    // register.
    let abi = g.abi();
    match u.result {
        TypeTag::Num | TypeTag::F64 => {
            let out = g.acquire_fpr(&u.span)?;
            g.asm.int_to_f64(out, abi.ret);
            Ok(Value::Num(out))
        }
        TypeTag::Bool | TypeTag::I32 | TypeTag::I64 | TypeTag::CPtr | TypeTag::CStr => {
            let out = g.acquire_gpr(&u.span)?;
            g.asm.mov_rr(out, abi.ret);
            Ok(Value::Int(out))
        }
        TypeTag::Str | TypeTag::List | TypeTag::Map => {
            let out = g.acquire_gpr(&u.span)?;
            g.asm.mov_rr(out, abi.ret);
            Ok(Value::Ptr(out))
        }
    }
}

fn resolve_reg(g: &CodeGenerator, name: &str, span: &Span) -> CompileResult<Gpr> {
    g.opts
        .target
        .parse_gpr(name)
        .ok_or_else(|| CompileError::UnknownRegister {
            name: name.to_string(),
            line: span.line,
            column: span.column,
        })
}

fn emit_asm_instr(g: &mut CodeGenerator, instr: &AsmInstr, span: &Span) -> CompileResult<()> {
    match instr {
        AsmInstr::Mov { dst, src } => {
            let AsmOperand::Reg(d) = dst else {
                return Err(CompileError::unsupported(
                    "mov destination must be a register",
                    g.opts.target,
                    span,
                ));
            };
            let d = resolve_reg(g, d, span)?;
            match src {
                AsmOperand::Reg(s) => {
                    let s = resolve_reg(g, s, span)?;
                    g.asm.mov_rr(d, s);
                }
                AsmOperand::Imm(imm) => g.asm.mov_ri(d, *imm),
                AsmOperand::Mem { base, offset } => {
                    let b = resolve_reg(g, base, span)?;
                    g.asm.load(d, b, *offset as i32);
                }
            }
        }
        AsmInstr::Load { dst, src, ty } => {
            let (AsmOperand::Reg(d), AsmOperand::Mem { base, offset }) = (dst, src) else {
                return Err(CompileError::unsupported(
                    "load needs reg = [base+off]",
                    g.opts.target,
                    span,
                ));
            };
            let d = resolve_reg(g, d, span)?;
            let b = resolve_reg(g, base, span)?;
            match ty {
                Some(TypeTag::I32) => g.asm.load32(d, b, *offset as i32),
                _ => g.asm.load(d, b, *offset as i32),
            }
        }
        AsmInstr::Store { dst, src, ty } => {
            let (AsmOperand::Mem { base, offset }, AsmOperand::Reg(s)) = (dst, src) else {
                return Err(CompileError::unsupported(
                    "store needs [base+off] = reg",
                    g.opts.target,
                    span,
                ));
            };
            let b = resolve_reg(g, base, span)?;
            let s = resolve_reg(g, s, span)?;
            match ty {
                Some(TypeTag::I32) => g.asm.store32(b, *offset as i32, s),
                _ => g.asm.store(b, *offset as i32, s),
            }
        }
        AsmInstr::Syscall => g.asm.syscall(),
    }
    Ok(())
}

// ============================================================================
// Small runtime-call helpers
// ============================================================================

/// helper(f0 = left, f1 = right) → fret.
fn emit_runtime_call2(
    g: &mut CodeGenerator,
    symbol: &str,
    left: &Expression,
    right: &Expression,
    span: &Span,
) -> CompileResult<Value> {
    let slots = emit_args_to_temps(g, std::slice::from_ref(left))?;
    let rslots = emit_args_to_temps(g, std::slice::from_ref(right))?;
    with_saved_live(g, |g| {
        let abi = g.abi();
        g.asm.fload(abi.float_args[0], abi.fp, slots[0]);
        g.asm.fload(abi.float_args[1], abi.fp, rslots[0]);
        // Pointer-style helpers read the int registers instead.
        let f0 = abi.float_args[0];
        let f1 = abi.float_args[1];
        g.asm.fmov_to_gpr(abi.int_args[0], f0);
        g.asm.fmov_to_gpr(abi.int_args[1], f1);
        g.asm.call_symbol(symbol, false);
        Ok(())
    })?;
    release_temps(g, &rslots);
    release_temps(g, &slots);
    capture_result(g, span)
}

/// helper(int0 = channel-as-int, f0 = value) → fret.
fn emit_runtime_call_cv(
    g: &mut CodeGenerator,
    symbol: &str,
    channel: &Expression,
    value: &Expression,
    span: &Span,
) -> CompileResult<Value> {
    let cslots = emit_args_to_temps(g, std::slice::from_ref(channel))?;
    let vslots = emit_args_to_temps(g, std::slice::from_ref(value))?;
    with_saved_live(g, |g| {
        let abi = g.abi();
        let f = abi.float_scratch[0];
        g.asm.fload(f, abi.fp, cslots[0]);
        g.asm.f64_to_int(abi.int_args[0], f);
        g.asm.fload(abi.float_args[0], abi.fp, vslots[0]);
        g.asm.call_symbol(symbol, false);
        Ok(())
    })?;
    release_temps(g, &vslots);
    release_temps(g, &cslots);
    capture_result(g, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_values_are_quiet_nans() {
        for code in ERROR_CODES {
            let value = f64::from_bits(error_bits(code));
            assert!(value.is_nan(), "{:?} must be NaN", code);
        }
    }

    #[test]
    fn test_error_code_extraction() {
        let bits = error_bits(b"dv0 ");
        let tag = (bits & 0xFFFF_FFFF) as u32;
        assert_eq!(&tag.to_le_bytes(), b"dv0 ");
    }

    #[test]
    fn test_fnv1a_stable() {
        // Distinct keys must hash apart; identical keys identically.
        assert_eq!(fnv1a(b"x"), fnv1a(b"x"));
        assert_ne!(fnv1a(b"x"), fnv1a(b"y"));
        assert_ne!(fnv1a(b""), fnv1a(b"\0"));
    }
}
