//! FFI call marshalling.
//!
//! Namespaced calls (`ns.func(args)`) go through the dynamic loader:
//! one PLT/IAT stub per imported function, recorded in the call-patch
//! list. Arguments are coerced per the declared/inferred type table:
//! strings become null-terminated C pointers (rodata for literals,
//! arena copies otherwise), numbers become int32/int64/double per
//! annotation, explicit `as` casts are honoured. Without annotations,
//! numeric arguments default to double: strings must be annotated or
//! they will be mis-marshalled.

use super::expr::{self, emit_expr};
use super::{CodeGenerator, StaticTy, Value};
use crate::error::CompileResult;
use crate::runtime;
use velo_parser::ast::*;
use velo_parser::token::Span;

/// How one argument travels into the foreign call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marshal {
    Double,
    Int64,
    Int32,
    CString,
    Pointer,
}

fn classify(g: &mut CodeGenerator, arg: &Expression) -> Marshal {
    if let Expression::Cast(c) = arg {
        return match c.ty {
            TypeTag::I32 => Marshal::Int32,
            TypeTag::I64 => Marshal::Int64,
            TypeTag::CStr => Marshal::CString,
            TypeTag::CPtr => Marshal::Pointer,
            _ => Marshal::Double,
        };
    }
    match expr::expr_ty(g, arg) {
        StaticTy::Str => Marshal::CString,
        StaticTy::List | StaticTy::Map | StaticTy::Fn => Marshal::Pointer,
        _ => Marshal::Double,
    }
}

pub fn emit_ffi_call(
    g: &mut CodeGenerator,
    callee: &NamespacedIdentifier,
    args: &[Expression],
    span: &Span,
) -> CompileResult<Value> {
    g.flags.use_dynamic_linking = true;
    // Only the unqualified name gets an import-table entry; qualified
    // duplicates collapse onto it.
    g.syms.require_extern(&callee.name);

    let abi = g.abi();
    let fp = abi.fp;

    // Evaluate arguments into temp slots with their marshalling class.
    let mut staged: Vec<(i32, Marshal)> = Vec::with_capacity(args.len());
    for arg in args {
        let marshal = classify(g, arg);
        let slot = g.frame_ref().alloc_temp();

        match (marshal, arg) {
            (Marshal::CString, Expression::Str(s)) => {
                // Literal strings marshal straight from rodata; the
                // interned form carries a trailing NUL after the bytes.
                let label = g.syms.intern_string(&s.value);
                let r = abi.scratch[0];
                g.asm.lea_symbol(r, &label);
                g.asm.add_ri(r, r, 8);
                g.asm.store(fp, slot, r);
            }
            (Marshal::CString, other) => {
                // Runtime strings copy into the arena with a NUL.
                g.flags.uses_arenas = true;
                let v = emit_expr(g, other)?;
                let p = g.value_to_gpr(v, other.span())?;
                let ps = g.frame_ref().alloc_temp();
                g.asm.store(fp, ps, p);
                g.frame_ref().ra.release_gpr(p);
                g.asm.load(abi.int_args[0], fp, ps);
                g.asm.call_symbol(runtime::STR_TO_CSTR, false);
                g.frame_ref().release_temp(ps);
                g.asm.store(fp, slot, abi.ret);
            }
            _ => {
                let v = emit_expr(g, arg)?;
                match v {
                    Value::Num(f) => {
                        g.asm.fstore(fp, slot, f);
                        g.frame_ref().ra.release_fpr(f);
                    }
                    Value::Ptr(r) | Value::Int(r) => {
                        g.asm.store(fp, slot, r);
                        g.frame_ref().ra.release_gpr(r);
                    }
                }
            }
        }
        staged.push((slot, marshal));
    }

    // Load into the foreign ABI registers: integers/pointers by
    // position in the int argument order, doubles in the float order.
    let mut int_idx = 0usize;
    let mut float_idx = 0usize;
    for (slot, marshal) in &staged {
        match marshal {
            Marshal::Double => {
                g.asm.fload(abi.float_args[float_idx], fp, *slot);
                float_idx += 1;
            }
            // Cast arguments were already truncated to integer bits
            // when they were staged.
            Marshal::Int64 | Marshal::Int32 | Marshal::Pointer | Marshal::CString => {
                g.asm.load(abi.int_args[int_idx], fp, *slot);
                int_idx += 1;
            }
        }
    }

    // Variadic C ABI wants the float-arg count in rax on x86-64.
    if g.opts.target == velo_isa::Target::X86_64 {
        g.asm.mov_ri(velo_isa::Gpr(0), float_idx as i64);
    }

    match g.opts.os {
        velo_isa::Os::Windows => {
            // FF 15 through the IAT slot.
            velo_isa::x86_64::call_rip_indirect(&mut g.asm.buf, &callee.name);
        }
        velo_isa::Os::Linux => {
            g.asm.call_symbol(&callee.name, true);
        }
    }

    for (slot, _) in staged.iter().rev() {
        g.frame_ref().release_temp(*slot);
    }

    // The return value is tagged per the declared return type; with no
    // declaration an integer return is assumed and promoted to num.
    let out = g.acquire_fpr(span)?;
    g.asm.int_to_f64(out, abi.ret);
    Ok(Value::Num(out))
}
