//! x86-64 instruction encoding.
//!
//! Byte-exact emission including REX, VEX and EVEX prefixes. Scalar
//! float work uses SSE2; packed work and FMA use VEX; the masked move
//! uses an EVEX k-register form. Symbol-referring instructions leave the
//! `0xDEADBEEF` placeholder and record a patch.

use crate::buffer::CodeBuffer;
use crate::patch::{PatchKind, PLACEHOLDER32};
use crate::target::{Fpr, Gpr, Target};

/// Condition codes (tttn field of Jcc/SETcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cc {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

fn rex(buf: &mut CodeBuffer, w: bool, reg: u8, index: u8, base: u8) {
    let mut b = 0x40u8;
    if w {
        b |= 8;
    }
    if reg >= 8 {
        b |= 4;
    }
    if index >= 8 {
        b |= 2;
    }
    if base >= 8 {
        b |= 1;
    }
    if b != 0x40 || w {
        buf.emit_u8(b);
    }
}

fn modrm(buf: &mut CodeBuffer, md: u8, reg: u8, rm: u8) {
    buf.emit_u8((md << 6) | ((reg & 7) << 3) | (rm & 7));
}

/// ModRM + SIB + displacement for a `[base + disp]` operand.
fn mem(buf: &mut CodeBuffer, reg: u8, base: u8, disp: i32) {
    let base_low = base & 7;
    let needs_sib = base_low == 4; // rsp/r12
    let md = if disp == 0 && base_low != 5 {
        0
    } else if (-128..=127).contains(&disp) {
        1
    } else {
        2
    };

    modrm(buf, md, reg, if needs_sib { 4 } else { base });
    if needs_sib {
        // scale=0, index=none (100), base=rsp/r12 → always 0x24
        buf.emit_u8(0x24);
    }
    match md {
        1 => buf.emit_u8(disp as u8),
        2 => buf.emit_i32(disp),
        _ => {}
    }
}

// ============================================================================
// Integer moves and arithmetic
// ============================================================================

pub fn mov_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("mov", format_args!("{}, {}", name(dst), name(src)));
    rex(buf, true, src.0, 0, dst.0);
    buf.emit_u8(0x89);
    modrm(buf, 3, src.0, dst.0);
}

pub fn mov_ri(buf: &mut CodeBuffer, dst: Gpr, imm: i64) {
    buf.note_args("mov", format_args!("{}, {imm}", name(dst)));
    if let Ok(imm32) = i32::try_from(imm) {
        rex(buf, true, 0, 0, dst.0);
        buf.emit_u8(0xC7);
        modrm(buf, 3, 0, dst.0);
        buf.emit_i32(imm32);
    } else {
        // movabs
        rex(buf, true, 0, 0, dst.0);
        buf.emit_u8(0xB8 + (dst.0 & 7));
        buf.emit_u64(imm as u64);
    }
}

pub fn load(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, disp: i32) {
    buf.note_args("mov", format_args!("{}, [{}+{disp}]", name(dst), name(base)));
    rex(buf, true, dst.0, 0, base.0);
    buf.emit_u8(0x8B);
    mem(buf, dst.0, base.0, disp);
}

pub fn store(buf: &mut CodeBuffer, base: Gpr, disp: i32, src: Gpr) {
    buf.note_args("mov", format_args!("[{}+{disp}], {}", name(base), name(src)));
    rex(buf, true, src.0, 0, base.0);
    buf.emit_u8(0x89);
    mem(buf, src.0, base.0, disp);
}

/// 32-bit load, zero-extending.
pub fn load32(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, disp: i32) {
    buf.note_args("mov", format_args!("{}d, [{}+{disp}]", name(dst), name(base)));
    rex(buf, false, dst.0, 0, base.0);
    buf.emit_u8(0x8B);
    mem(buf, dst.0, base.0, disp);
}

pub fn store32(buf: &mut CodeBuffer, base: Gpr, disp: i32, src: Gpr) {
    buf.note_args("mov", format_args!("[{}+{disp}], {}d", name(base), name(src)));
    rex(buf, false, src.0, 0, base.0);
    buf.emit_u8(0x89);
    mem(buf, src.0, base.0, disp);
}

/// Byte load, zero-extending (movzx).
pub fn load8(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, disp: i32) {
    buf.note_args("movzx", format_args!("{}, byte [{}+{disp}]", name(dst), name(base)));
    rex(buf, true, dst.0, 0, base.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xB6);
    mem(buf, dst.0, base.0, disp);
}

/// Byte store.
pub fn store8(buf: &mut CodeBuffer, base: Gpr, disp: i32, src: Gpr) {
    buf.note_args("mov", format_args!("byte [{}+{disp}], {}", name(base), name(src)));
    // A REX byte (even empty) selects the spl/dil-class byte registers
    if src.0 >= 4 || base.0 >= 8 {
        let mut b = 0x40u8;
        if src.0 >= 8 {
            b |= 4;
        }
        if base.0 >= 8 {
            b |= 1;
        }
        buf.emit_u8(b);
    }
    buf.emit_u8(0x88);
    mem(buf, src.0, base.0, disp);
}

/// `lea dst, [rip + symbol]` with a PC-relocation record.
pub fn lea_symbol(buf: &mut CodeBuffer, dst: Gpr, symbol: &str, kind: PatchKind) {
    buf.note_args("lea", format_args!("{}, [rip + {symbol}]", name(dst)));
    rex(buf, true, dst.0, 0, 0);
    buf.emit_u8(0x8D);
    modrm(buf, 0, dst.0, 5);
    let at = buf.offset();
    buf.emit_u32(PLACEHOLDER32);
    buf.add_patch(at, symbol, kind);
}

pub fn add_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("add", format_args!("{}, {}", name(dst), name(src)));
    rex(buf, true, src.0, 0, dst.0);
    buf.emit_u8(0x01);
    modrm(buf, 3, src.0, dst.0);
}

pub fn sub_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("sub", format_args!("{}, {}", name(dst), name(src)));
    rex(buf, true, src.0, 0, dst.0);
    buf.emit_u8(0x29);
    modrm(buf, 3, src.0, dst.0);
}

fn alu_ri(buf: &mut CodeBuffer, op_ext: u8, dst: Gpr, imm: i32) {
    rex(buf, true, 0, 0, dst.0);
    if (-128..=127).contains(&imm) {
        buf.emit_u8(0x83);
        modrm(buf, 3, op_ext, dst.0);
        buf.emit_u8(imm as u8);
    } else {
        buf.emit_u8(0x81);
        modrm(buf, 3, op_ext, dst.0);
        buf.emit_i32(imm);
    }
}

pub fn add_ri(buf: &mut CodeBuffer, dst: Gpr, imm: i32) {
    buf.note_args("add", format_args!("{}, {imm}", name(dst)));
    alu_ri(buf, 0, dst, imm);
}

pub fn sub_ri(buf: &mut CodeBuffer, dst: Gpr, imm: i32) {
    buf.note_args("sub", format_args!("{}, {imm}", name(dst)));
    alu_ri(buf, 5, dst, imm);
}

pub fn and_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("and", format_args!("{}, {}", name(dst), name(src)));
    rex(buf, true, src.0, 0, dst.0);
    buf.emit_u8(0x21);
    modrm(buf, 3, src.0, dst.0);
}

pub fn or_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("or", format_args!("{}, {}", name(dst), name(src)));
    rex(buf, true, src.0, 0, dst.0);
    buf.emit_u8(0x09);
    modrm(buf, 3, src.0, dst.0);
}

pub fn xor_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("xor", format_args!("{}, {}", name(dst), name(src)));
    rex(buf, true, src.0, 0, dst.0);
    buf.emit_u8(0x31);
    modrm(buf, 3, src.0, dst.0);
}

pub fn not_r(buf: &mut CodeBuffer, dst: Gpr) {
    buf.note_args("not", format_args!("{}", name(dst)));
    rex(buf, true, 0, 0, dst.0);
    buf.emit_u8(0xF7);
    modrm(buf, 3, 2, dst.0);
}

pub fn neg_r(buf: &mut CodeBuffer, dst: Gpr) {
    buf.note_args("neg", format_args!("{}", name(dst)));
    rex(buf, true, 0, 0, dst.0);
    buf.emit_u8(0xF7);
    modrm(buf, 3, 3, dst.0);
}

pub fn imul_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("imul", format_args!("{}, {}", name(dst), name(src)));
    rex(buf, true, dst.0, 0, src.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xAF);
    modrm(buf, 3, dst.0, src.0);
}

/// cqo; idiv src: rax = rdx:rax / src, rdx = remainder.
pub fn idiv(buf: &mut CodeBuffer, src: Gpr) {
    buf.note("cqo");
    buf.emit_u8(0x48);
    buf.emit_u8(0x99);
    buf.note_args("idiv", format_args!("{}", name(src)));
    rex(buf, true, 0, 0, src.0);
    buf.emit_u8(0xF7);
    modrm(buf, 3, 7, src.0);
}

/// Shift by cl: ext 4 = shl, 5 = shr, 7 = sar.
pub fn shift_cl(buf: &mut CodeBuffer, ext: u8, dst: Gpr) {
    buf.note_args("shift", format_args!("{}, cl", name(dst)));
    rex(buf, true, 0, 0, dst.0);
    buf.emit_u8(0xD3);
    modrm(buf, 3, ext, dst.0);
}

pub fn cmp_rr(buf: &mut CodeBuffer, left: Gpr, right: Gpr) {
    buf.note_args("cmp", format_args!("{}, {}", name(left), name(right)));
    rex(buf, true, right.0, 0, left.0);
    buf.emit_u8(0x39);
    modrm(buf, 3, right.0, left.0);
}

pub fn cmp_ri(buf: &mut CodeBuffer, left: Gpr, imm: i32) {
    buf.note_args("cmp", format_args!("{}, {imm}", name(left)));
    alu_ri(buf, 7, left, imm);
}

pub fn test_rr(buf: &mut CodeBuffer, left: Gpr, right: Gpr) {
    buf.note_args("test", format_args!("{}, {}", name(left), name(right)));
    rex(buf, true, right.0, 0, left.0);
    buf.emit_u8(0x85);
    modrm(buf, 3, right.0, left.0);
}

/// setcc dst_low; movzx dst, dst_low: materialise a flag as 0/1.
pub fn setcc(buf: &mut CodeBuffer, cc: Cc, dst: Gpr) {
    buf.note_args("setcc", format_args!("{}", name(dst)));
    // A REX byte (even empty) selects spl/dil-class byte registers
    if dst.0 >= 4 {
        buf.emit_u8(0x40 | u8::from(dst.0 >= 8));
    }
    buf.emit_u8(0x0F);
    buf.emit_u8(0x90 | cc as u8);
    modrm(buf, 3, 0, dst.0);
    // movzx dst, dst.b
    rex(buf, true, dst.0, 0, dst.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xB6);
    modrm(buf, 3, dst.0, dst.0);
}

// ============================================================================
// Control flow
// ============================================================================

/// jcc rel32 with a zero displacement; returns the displacement offset
/// for the local branch fixup.
pub fn jcc(buf: &mut CodeBuffer, cc: Cc) -> usize {
    buf.note("jcc");
    buf.emit_u8(0x0F);
    buf.emit_u8(0x80 | cc as u8);
    let at = buf.offset();
    buf.emit_u32(0);
    at
}

/// jmp rel32; returns the displacement offset.
pub fn jmp(buf: &mut CodeBuffer) -> usize {
    buf.note("jmp");
    buf.emit_u8(0xE9);
    let at = buf.offset();
    buf.emit_u32(0);
    at
}

/// Resolve a local rel32 branch to `target` (a buffer offset).
pub fn patch_rel32(buf: &mut CodeBuffer, disp_at: usize, target: usize) {
    let rel = target as i64 - (disp_at as i64 + 4);
    buf.patch_u32_at(disp_at, rel as i32 as u32);
}

/// Direct jmp rel32 to an already-bound offset.
pub fn jmp_to(buf: &mut CodeBuffer, target: usize) {
    let at = jmp(buf);
    patch_rel32(buf, at, target);
}

/// call rel32 to a symbol; displacement patched at layout time.
pub fn call_symbol(buf: &mut CodeBuffer, symbol: &str, kind: PatchKind) {
    buf.note_args("call", format_args!("{symbol}"));
    buf.emit_u8(0xE8);
    let at = buf.offset();
    buf.emit_u32(PLACEHOLDER32);
    buf.add_patch(at, symbol, kind);
}

/// `call [rip + symbol]`: PE IAT indirection (FF 15 disp32).
pub fn call_rip_indirect(buf: &mut CodeBuffer, symbol: &str) {
    buf.note_args("call", format_args!("[rip + {symbol}]"));
    buf.emit_u8(0xFF);
    modrm(buf, 0, 2, 5);
    let at = buf.offset();
    buf.emit_u32(PLACEHOLDER32);
    buf.add_patch(at, symbol, PatchKind::PltCall);
}

pub fn call_reg(buf: &mut CodeBuffer, target: Gpr) {
    buf.note_args("call", format_args!("{}", name(target)));
    if target.0 >= 8 {
        rex(buf, false, 0, 0, target.0);
    }
    buf.emit_u8(0xFF);
    modrm(buf, 3, 2, target.0);
}

pub fn ret(buf: &mut CodeBuffer) {
    buf.note("ret");
    buf.emit_u8(0xC3);
}

pub fn push(buf: &mut CodeBuffer, reg: Gpr) {
    buf.note_args("push", format_args!("{}", name(reg)));
    if reg.0 >= 8 {
        rex(buf, false, 0, 0, reg.0);
    }
    buf.emit_u8(0x50 + (reg.0 & 7));
}

pub fn pop(buf: &mut CodeBuffer, reg: Gpr) {
    buf.note_args("pop", format_args!("{}", name(reg)));
    if reg.0 >= 8 {
        rex(buf, false, 0, 0, reg.0);
    }
    buf.emit_u8(0x58 + (reg.0 & 7));
}

pub fn syscall(buf: &mut CodeBuffer) {
    buf.note("syscall");
    buf.emit_u8(0x0F);
    buf.emit_u8(0x05);
}

pub fn cpuid(buf: &mut CodeBuffer) {
    buf.note("cpuid");
    buf.emit_u8(0x0F);
    buf.emit_u8(0xA2);
}

// ============================================================================
// Atomics
// ============================================================================

/// lock cmpxchg [base+disp], src: compare rax, exchange with src.
pub fn lock_cmpxchg(buf: &mut CodeBuffer, base: Gpr, disp: i32, src: Gpr) {
    buf.note("lock cmpxchg");
    buf.emit_u8(0xF0);
    rex(buf, true, src.0, 0, base.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xB1);
    mem(buf, src.0, base.0, disp);
}

/// lock xadd [base+disp], src.
pub fn lock_xadd(buf: &mut CodeBuffer, base: Gpr, disp: i32, src: Gpr) {
    buf.note("lock xadd");
    buf.emit_u8(0xF0);
    rex(buf, true, src.0, 0, base.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xC1);
    mem(buf, src.0, base.0, disp);
}

// ============================================================================
// Scalar double (SSE2)
// ============================================================================

fn sse_f2(buf: &mut CodeBuffer, op: u8, reg: u8, rm: u8) {
    buf.emit_u8(0xF2);
    rex(buf, false, reg, 0, rm);
    buf.emit_u8(0x0F);
    buf.emit_u8(op);
    modrm(buf, 3, reg, rm);
}

pub fn movsd_rr(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("movsd", format_args!("xmm{}, xmm{}", dst.0, src.0));
    sse_f2(buf, 0x10, dst.0, src.0);
}

pub fn movsd_load(buf: &mut CodeBuffer, dst: Fpr, base: Gpr, disp: i32) {
    buf.note_args("movsd", format_args!("xmm{}, [{}+{disp}]", dst.0, name(base)));
    buf.emit_u8(0xF2);
    rex(buf, false, dst.0, 0, base.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x10);
    mem(buf, dst.0, base.0, disp);
}

pub fn movsd_store(buf: &mut CodeBuffer, base: Gpr, disp: i32, src: Fpr) {
    buf.note_args("movsd", format_args!("[{}+{disp}], xmm{}", name(base), src.0));
    buf.emit_u8(0xF2);
    rex(buf, false, src.0, 0, base.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x11);
    mem(buf, src.0, base.0, disp);
}

pub fn addsd(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("addsd", format_args!("xmm{}, xmm{}", dst.0, src.0));
    sse_f2(buf, 0x58, dst.0, src.0);
}

pub fn subsd(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("subsd", format_args!("xmm{}, xmm{}", dst.0, src.0));
    sse_f2(buf, 0x5C, dst.0, src.0);
}

pub fn mulsd(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("mulsd", format_args!("xmm{}, xmm{}", dst.0, src.0));
    sse_f2(buf, 0x59, dst.0, src.0);
}

pub fn divsd(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("divsd", format_args!("xmm{}, xmm{}", dst.0, src.0));
    sse_f2(buf, 0x5E, dst.0, src.0);
}

/// ucomisd: sets ZF/PF/CF; PF=1 flags an unordered (NaN) compare.
pub fn ucomisd(buf: &mut CodeBuffer, left: Fpr, right: Fpr) {
    buf.note_args("ucomisd", format_args!("xmm{}, xmm{}", left.0, right.0));
    buf.emit_u8(0x66);
    rex(buf, false, left.0, 0, right.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x2E);
    modrm(buf, 3, left.0, right.0);
}

/// cvtsi2sd dst, src: i64 → f64.
pub fn cvtsi2sd(buf: &mut CodeBuffer, dst: Fpr, src: Gpr) {
    buf.note_args("cvtsi2sd", format_args!("xmm{}, {}", dst.0, name(src)));
    buf.emit_u8(0xF2);
    rex(buf, true, dst.0, 0, src.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x2A);
    modrm(buf, 3, dst.0, src.0);
}

/// cvttsd2si dst, src: f64 → i64, truncating.
pub fn cvttsd2si(buf: &mut CodeBuffer, dst: Gpr, src: Fpr) {
    buf.note_args("cvttsd2si", format_args!("{}, xmm{}", name(dst), src.0));
    buf.emit_u8(0xF2);
    rex(buf, true, dst.0, 0, src.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x2C);
    modrm(buf, 3, dst.0, src.0);
}

/// movq xmm ← gpr (bit pattern).
pub fn movq_xr(buf: &mut CodeBuffer, dst: Fpr, src: Gpr) {
    buf.note_args("movq", format_args!("xmm{}, {}", dst.0, name(src)));
    buf.emit_u8(0x66);
    rex(buf, true, dst.0, 0, src.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x6E);
    modrm(buf, 3, dst.0, src.0);
}

/// movq gpr ← xmm (bit pattern).
pub fn movq_rx(buf: &mut CodeBuffer, dst: Gpr, src: Fpr) {
    buf.note_args("movq", format_args!("{}, xmm{}", name(dst), src.0));
    buf.emit_u8(0x66);
    rex(buf, true, src.0, 0, dst.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x7E);
    modrm(buf, 3, src.0, dst.0);
}

pub fn xorpd(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("xorpd", format_args!("xmm{}, xmm{}", dst.0, src.0));
    buf.emit_u8(0x66);
    rex(buf, false, dst.0, 0, src.0);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x57);
    modrm(buf, 3, dst.0, src.0);
}

// ============================================================================
// Packed double (VEX) and FMA
// ============================================================================

/// Two-byte VEX prefix (C5): fields R, vvvv, L, pp.
fn vex2(buf: &mut CodeBuffer, r: u8, vvvv: u8, l: bool, pp: u8) {
    buf.emit_u8(0xC5);
    let mut b = 0u8;
    if r < 8 {
        b |= 0x80; // R is inverted
    }
    b |= (!vvvv & 0xF) << 3;
    if l {
        b |= 0x04;
    }
    b |= pp & 3;
    buf.emit_u8(b);
}

/// Three-byte VEX prefix (C4): adds X/B, map select and W.
fn vex3(buf: &mut CodeBuffer, r: u8, b_reg: u8, map: u8, w: bool, vvvv: u8, l: bool, pp: u8) {
    buf.emit_u8(0xC4);
    let mut b1 = map & 0x1F;
    if r < 8 {
        b1 |= 0x80;
    }
    b1 |= 0x40; // X inverted, no index
    if b_reg < 8 {
        b1 |= 0x20;
    }
    buf.emit_u8(b1);
    let mut b2 = 0u8;
    if w {
        b2 |= 0x80;
    }
    b2 |= (!vvvv & 0xF) << 3;
    if l {
        b2 |= 0x04;
    }
    b2 |= pp & 3;
    buf.emit_u8(b2);
}

fn vex_packed(buf: &mut CodeBuffer, op: u8, dst: Fpr, a: Fpr, b: Fpr) {
    if b.0 >= 8 {
        vex3(buf, dst.0, b.0, 1, false, a.0, false, 1);
    } else {
        vex2(buf, dst.0, a.0, false, 1);
    }
    buf.emit_u8(op);
    modrm(buf, 3, dst.0, b.0);
}

pub fn vaddpd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vaddpd", format_args!("xmm{}, xmm{}, xmm{}", dst.0, a.0, b.0));
    vex_packed(buf, 0x58, dst, a, b);
}

pub fn vsubpd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vsubpd", format_args!("xmm{}, xmm{}, xmm{}", dst.0, a.0, b.0));
    vex_packed(buf, 0x5C, dst, a, b);
}

pub fn vmulpd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vmulpd", format_args!("xmm{}, xmm{}, xmm{}", dst.0, a.0, b.0));
    vex_packed(buf, 0x59, dst, a, b);
}

pub fn vdivpd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vdivpd", format_args!("xmm{}, xmm{}, xmm{}", dst.0, a.0, b.0));
    vex_packed(buf, 0x5E, dst, a, b);
}

/// Absolute value: AND with the sign-clearing mask already in `mask`.
pub fn vandpd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, mask: Fpr) {
    buf.note_args("vandpd", format_args!("xmm{}, xmm{}, xmm{}", dst.0, a.0, mask.0));
    vex_packed(buf, 0x54, dst, a, mask);
}

/// vblendvpd dst, a, b, selector: element-wise select by sign bit.
pub fn vblendvpd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr, sel: Fpr) {
    buf.note_args(
        "vblendvpd",
        format_args!("xmm{}, xmm{}, xmm{}, xmm{}", dst.0, a.0, b.0, sel.0),
    );
    vex3(buf, dst.0, b.0, 3, false, a.0, false, 1);
    buf.emit_u8(0x4B);
    modrm(buf, 3, dst.0, b.0);
    buf.emit_u8(sel.0 << 4);
}

/// vhaddpd dst, a, b: horizontal add of pairs.
pub fn vhaddpd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vhaddpd", format_args!("xmm{}, xmm{}, xmm{}", dst.0, a.0, b.0));
    vex_packed(buf, 0x7C, dst, a, b);
}

/// vfmadd231sd dst, a, b: dst = dst + a*b (FMA3, VEX.66.0F38.W1 B9).
pub fn vfmadd231sd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args(
        "vfmadd231sd",
        format_args!("xmm{}, xmm{}, xmm{}", dst.0, a.0, b.0),
    );
    vex3(buf, dst.0, b.0, 2, true, a.0, false, 1);
    buf.emit_u8(0xB9);
    modrm(buf, 3, dst.0, b.0);
}

/// EVEX-masked unaligned packed-double move: vmovupd dst {k1}, src.
/// The one EVEX consumer in the backend; k1 carries the lane mask.
pub fn vmovupd_masked(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args(
        "vmovupd",
        format_args!("xmm{} {{k1}}, xmm{}", dst.0, src.0),
    );
    buf.emit_u8(0x62);
    // P0: R X B R' 0 0 m m: map 01 (0F)
    let mut p0 = 0x01u8;
    if dst.0 < 8 {
        p0 |= 0x80;
    }
    p0 |= 0x40; // X inverted
    if src.0 < 8 {
        p0 |= 0x20;
    }
    p0 |= 0x10; // R' inverted
    buf.emit_u8(p0);
    // P1: W vvvv 1 pp: W=1, vvvv=1111 (unused), pp=01 (66)
    buf.emit_u8(0x80 | 0x78 | 0x04 | 0x01);
    // P2: z L'L b V' aaa: 128-bit, k1
    buf.emit_u8(0x08 | 0x01);
    buf.emit_u8(0x10);
    modrm(buf, 3, dst.0, src.0);
}

fn name(reg: Gpr) -> String {
    Target::X86_64.gpr_name(reg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(f: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
        let mut buf = CodeBuffer::new();
        f(&mut buf);
        buf.into_bytes()
    }

    #[test]
    fn test_cmp_rax_rbx() {
        assert_eq!(emit(|b| cmp_rr(b, Gpr(0), Gpr(3))), vec![0x48, 0x39, 0xD8]);
    }

    #[test]
    fn test_cmp_rax_imm8() {
        assert_eq!(
            emit(|b| cmp_ri(b, Gpr(0), 10)),
            vec![0x48, 0x83, 0xF8, 0x0A]
        );
    }

    #[test]
    fn test_cmp_rax_imm32() {
        assert_eq!(
            emit(|b| cmp_ri(b, Gpr(0), 1000)),
            vec![0x48, 0x81, 0xF8, 0xE8, 0x03, 0x00, 0x00]
        );
    }

    #[test]
    fn test_lea_rip_symbol() {
        let mut buf = CodeBuffer::new();
        lea_symbol(&mut buf, Gpr(7), "sym", PatchKind::PcRel32);
        let bytes = buf.bytes();
        assert_eq!(&bytes[..3], &[0x48, 0x8D, 0x3D]);
        assert_eq!(buf.read_u32_at(3), PLACEHOLDER32);
        assert_eq!(buf.patches().len(), 1);
        assert_eq!(buf.patches()[0].kind, PatchKind::PcRel32);
        assert_eq!(buf.patches()[0].symbol, "sym");
    }

    #[test]
    fn test_mov_rr() {
        // mov rdi, rax → 48 89 C7
        assert_eq!(emit(|b| mov_rr(b, Gpr(7), Gpr(0))), vec![0x48, 0x89, 0xC7]);
    }

    #[test]
    fn test_ret_and_syscall() {
        assert_eq!(emit(ret), vec![0xC3]);
        assert_eq!(emit(syscall), vec![0x0F, 0x05]);
    }

    #[test]
    fn test_push_pop_extended() {
        // push r12 → 41 54
        assert_eq!(emit(|b| push(b, Gpr(12))), vec![0x41, 0x54]);
        // pop rbp → 5D
        assert_eq!(emit(|b| pop(b, Gpr(5))), vec![0x5D]);
    }

    #[test]
    fn test_call_symbol_placeholder() {
        let mut buf = CodeBuffer::new();
        call_symbol(&mut buf, "f", PatchKind::CallRel32);
        assert_eq!(buf.bytes()[0], 0xE8);
        assert_eq!(buf.read_u32_at(1), PLACEHOLDER32);
    }

    #[test]
    fn test_local_branch_patch() {
        let mut buf = CodeBuffer::new();
        let at = jmp(&mut buf);
        // Jump to offset 16
        patch_rel32(&mut buf, at, 16);
        assert_eq!(buf.read_u32_at(at), (16i32 - 5) as u32);
    }

    #[test]
    fn test_addsd() {
        // addsd xmm0, xmm1 → F2 0F 58 C1
        assert_eq!(
            emit(|b| addsd(b, Fpr(0), Fpr(1))),
            vec![0xF2, 0x0F, 0x58, 0xC1]
        );
    }

    #[test]
    fn test_ucomisd() {
        // ucomisd xmm0, xmm1 → 66 0F 2E C1
        assert_eq!(
            emit(|b| ucomisd(b, Fpr(0), Fpr(1))),
            vec![0x66, 0x0F, 0x2E, 0xC1]
        );
    }

    #[test]
    fn test_vfmadd231sd() {
        // vfmadd231sd xmm0, xmm1, xmm2 → C4 E2 F1 B9 C2
        assert_eq!(
            emit(|b| vfmadd231sd(b, Fpr(0), Fpr(1), Fpr(2))),
            vec![0xC4, 0xE2, 0xF1, 0xB9, 0xC2]
        );
    }

    #[test]
    fn test_vaddpd_vex2() {
        // vaddpd xmm0, xmm1, xmm2 → C5 F1 58 C2
        assert_eq!(
            emit(|b| vaddpd(b, Fpr(0), Fpr(1), Fpr(2))),
            vec![0xC5, 0xF1, 0x58, 0xC2]
        );
    }

    #[test]
    fn test_movabs() {
        let bytes = emit(|b| mov_ri(b, Gpr(0), 0x1122334455667788));
        assert_eq!(bytes[0], 0x48);
        assert_eq!(bytes[1], 0xB8);
        assert_eq!(&bytes[2..], &0x1122334455667788u64.to_le_bytes());
    }

    #[test]
    fn test_mov_imm32_form() {
        // mov rax, 1 → 48 C7 C0 01 00 00 00
        assert_eq!(
            emit(|b| mov_ri(b, Gpr(0), 1)),
            vec![0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_load_store_disp() {
        // mov rax, [rbp-8] → 48 8B 45 F8
        assert_eq!(
            emit(|b| load(b, Gpr(0), Gpr(5), -8)),
            vec![0x48, 0x8B, 0x45, 0xF8]
        );
        // mov [rbp-8], rax → 48 89 45 F8
        assert_eq!(
            emit(|b| store(b, Gpr(5), -8, Gpr(0))),
            vec![0x48, 0x89, 0x45, 0xF8]
        );
    }

    #[test]
    fn test_rsp_needs_sib() {
        // mov rax, [rsp+8] → 48 8B 44 24 08
        assert_eq!(
            emit(|b| load(b, Gpr(0), Gpr(4), 8)),
            vec![0x48, 0x8B, 0x44, 0x24, 0x08]
        );
    }
}
