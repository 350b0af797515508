//! Match lowering.
//!
//! Value matches evaluate the scrutinee once into a frame slot and
//! compare it against each pattern; clause bodies are emitted after all
//! the tests so a `~>` clause can fall through into the next body.
//! Guard matches evaluate each guard in order and short-circuit on the
//! first truthy one. An implicit default yields zero.

use super::expr::{self, emit_expr, normalize};
use super::{CodeGenerator, Value};
use crate::error::CompileResult;
use velo_isa::{BranchFixup, Cond};
use velo_parser::ast::*;

pub fn emit_match(
    g: &mut CodeGenerator,
    m: &MatchExpression,
    tail: bool,
) -> CompileResult<Value> {
    let abi = g.abi();
    let fp = abi.fp;
    let out_slot = g.frame_ref().alloc_temp();

    // Implicit default: zero.
    let zf = abi.float_scratch[0];
    g.asm.fmov_imm(zf, 0.0, abi.scratch[0]);
    g.asm.fstore(fp, out_slot, zf);

    // Scrutinee evaluated once into a slot.
    let scrutinee_slot = if let Some(scrutinee) = &m.scrutinee {
        let v = emit_expr(g, scrutinee)?;
        let f = g.value_to_fpr(v, scrutinee.span())?;
        let slot = g.frame_ref().alloc_temp();
        g.asm.fstore(fp, slot, f);
        g.frame_ref().ra.release_fpr(f);
        Some(slot)
    } else {
        None
    };

    // Pass 1: tests. Each clause gets a fixup jumping to its body; the
    // default clause is taken when every test fails.
    let mut body_jumps: Vec<BranchFixup> = Vec::new();
    let mut default_jump: Option<BranchFixup> = None;

    for clause in &m.clauses {
        if clause.is_default() {
            // Tested last regardless of position: record after the loop.
            continue;
        }

        if let Some(slot) = scrutinee_slot {
            // Value clause: scrutinee == pattern
            let pattern = clause.pattern.as_ref().expect("value clause");
            let pv = emit_expr(g, pattern)?;
            let pf = g.value_to_fpr(pv, pattern.span())?;
            let sf = g.acquire_fpr(&clause.span)?;
            g.asm.fload(sf, fp, slot);
            let flag = abi.scratch[0];
            g.asm.fcmp_set(Cond::Eq, flag, sf, pf);
            g.frame_ref().ra.release_fpr(sf);
            g.frame_ref().ra.release_fpr(pf);
            body_jumps.push(g.asm.branch_if_nonzero(flag));
        } else {
            // Guard clause: first truthy guard wins
            let guard = clause.guard.as_ref().expect("guard clause");
            let gv = emit_expr(g, guard)?;
            let flag = expr::emit_truth(g, gv, guard.span())?;
            body_jumps.push(g.asm.branch_if_nonzero(flag));
            g.frame_ref().ra.release_gpr(flag);
        }
    }

    // All tests failed → default body (or the zero already staged).
    if m.clauses.iter().any(|c| c.is_default()) {
        default_jump = Some(g.asm.jump());
    }
    let mut end_jumps: Vec<BranchFixup> = Vec::new();
    if default_jump.is_none() {
        end_jumps.push(g.asm.jump());
    }

    // Pass 2: bodies, in clause order. `~>` bodies fall through into
    // the next body instead of jumping to the end label.
    let mut test_iter = body_jumps.into_iter();
    for clause in &m.clauses {
        if clause.is_default() {
            if let Some(fix) = default_jump.take() {
                g.asm.bind(fix);
            }
        } else if let Some(fix) = test_iter.next() {
            g.asm.bind(fix);
        }

        let v = if tail {
            expr::emit_tail_expr(g, &clause.body)?
        } else {
            emit_expr(g, &clause.body)?
        };
        let v = normalize(g, v, clause.body.span())?;
        match v {
            Value::Num(f) => {
                g.asm.fstore(fp, out_slot, f);
                g.frame_ref().ra.release_fpr(f);
            }
            Value::Ptr(p) | Value::Int(p) => {
                g.asm.store(fp, out_slot, p);
                g.frame_ref().ra.release_gpr(p);
            }
        }

        if !clause.fallthrough {
            end_jumps.push(g.asm.jump());
        }
    }

    for fix in end_jumps {
        g.asm.bind(fix);
    }

    if let Some(slot) = scrutinee_slot {
        g.frame_ref().release_temp(slot);
    }
    let out = g.acquire_fpr(&m.span)?;
    g.asm.fload(out, fp, out_slot);
    g.frame_ref().release_temp(out_slot);
    Ok(Value::Num(out))
}
