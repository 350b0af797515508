//! AArch64 instruction encoding.
//!
//! Every instruction is one little-endian 32-bit word. Symbol loads emit
//! an ADRP/ADD pair sharing a single patch record; calls to symbols emit
//! BL with a 26-bit displacement patch.

use crate::buffer::CodeBuffer;
use crate::patch::PatchKind;
use crate::target::{Fpr, Gpr, Target};

/// AArch64 condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq = 0x0,
    Ne = 0x1,
    Hs = 0x2,
    Lo = 0x3,
    Mi = 0x4,
    Pl = 0x5,
    Vs = 0x6,
    Vc = 0x7,
    Hi = 0x8,
    Ls = 0x9,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
    Al = 0xE,
}

impl Cond {
    pub fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Hs => Cond::Lo,
            Cond::Lo => Cond::Hs,
            Cond::Mi => Cond::Pl,
            Cond::Pl => Cond::Mi,
            Cond::Vs => Cond::Vc,
            Cond::Vc => Cond::Vs,
            Cond::Hi => Cond::Ls,
            Cond::Ls => Cond::Hi,
            Cond::Ge => Cond::Lt,
            Cond::Lt => Cond::Ge,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
            Cond::Al => Cond::Al,
        }
    }
}

const ZR: u8 = 31;

fn word(buf: &mut CodeBuffer, w: u32) {
    buf.emit_u32(w);
}

fn name(reg: Gpr) -> String {
    Target::Arm64.gpr_name(reg)
}

// ============================================================================
// Moves
// ============================================================================

/// mov Xd, Xm: ORR Xd, XZR, Xm; SP-involving moves use ADD #0.
pub fn mov_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("mov", format_args!("{}, {}", name(dst), name(src)));
    if dst.0 == 31 || src.0 == 31 {
        // add dst, src, #0 treats reg 31 as SP
        word(buf, 0x9100_0000 | u32::from(src.0) << 5 | u32::from(dst.0));
    } else {
        word(buf, 0xAA00_03E0 | u32::from(src.0) << 16 | u32::from(dst.0));
    }
}

/// Materialise a 64-bit immediate with MOVZ/MOVK (MOVN for all-ones
/// prefixes is left to the simple path; four movk words at worst).
pub fn mov_ri(buf: &mut CodeBuffer, dst: Gpr, imm: i64) {
    buf.note_args("mov", format_args!("{}, {imm}", name(dst)));
    let bits = imm as u64;
    // movz dst, #chunk0
    word(
        buf,
        0xD280_0000 | ((bits & 0xFFFF) as u32) << 5 | u32::from(dst.0),
    );
    for hw in 1..4u32 {
        let chunk = (bits >> (16 * hw)) & 0xFFFF;
        if chunk != 0 {
            word(
                buf,
                0xF280_0000 | hw << 21 | (chunk as u32) << 5 | u32::from(dst.0),
            );
        }
    }
}

// ============================================================================
// Integer arithmetic
// ============================================================================

pub fn add_rr(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("add", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, 0x8B00_0000 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0));
}

pub fn sub_rr(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("sub", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, 0xCB00_0000 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0));
}

pub fn add_ri(buf: &mut CodeBuffer, dst: Gpr, src: Gpr, imm: u16) {
    buf.note_args("add", format_args!("{}, {}, #{imm}", name(dst), name(src)));
    word(
        buf,
        0x9100_0000 | u32::from(imm & 0xFFF) << 10 | u32::from(src.0) << 5 | u32::from(dst.0),
    );
}

pub fn sub_ri(buf: &mut CodeBuffer, dst: Gpr, src: Gpr, imm: u16) {
    buf.note_args("sub", format_args!("{}, {}, #{imm}", name(dst), name(src)));
    word(
        buf,
        0xD100_0000 | u32::from(imm & 0xFFF) << 10 | u32::from(src.0) << 5 | u32::from(dst.0),
    );
}

pub fn mul_rr(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("mul", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    // madd dst, a, b, xzr
    word(
        buf,
        0x9B00_7C00 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0),
    );
}

pub fn sdiv_rr(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("sdiv", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(
        buf,
        0x9AC0_0C00 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0),
    );
}

pub fn and_rr(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("and", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, 0x8A00_0000 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0));
}

pub fn orr_rr(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("orr", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, 0xAA00_0000 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0));
}

pub fn eor_rr(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("eor", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, 0xCA00_0000 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0));
}

/// mvn: ORN Xd, XZR, Xm.
pub fn mvn_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("mvn", format_args!("{}, {}", name(dst), name(src)));
    word(buf, 0xAA20_03E0 | u32::from(src.0) << 16 | u32::from(dst.0));
}

pub fn lslv(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("lsl", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(
        buf,
        0x9AC0_2000 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0),
    );
}

pub fn lsrv(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("lsr", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(
        buf,
        0x9AC0_2400 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0),
    );
}

// ============================================================================
// Compare and conditions
// ============================================================================

/// cmp Xn, Xm: SUBS XZR, Xn, Xm.
pub fn cmp_rr(buf: &mut CodeBuffer, a: Gpr, b: Gpr) {
    buf.note_args("cmp", format_args!("{}, {}", name(a), name(b)));
    word(
        buf,
        0xEB00_0000 | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(ZR),
    );
}

/// cmp Xn, #imm12: SUBS XZR, Xn, #imm.
pub fn cmp_ri(buf: &mut CodeBuffer, a: Gpr, imm: u16) {
    buf.note_args("cmp", format_args!("{}, #{imm}", name(a)));
    word(
        buf,
        0xF100_0000 | u32::from(imm & 0xFFF) << 10 | u32::from(a.0) << 5 | u32::from(ZR),
    );
}

/// cset Xd, cond: CSINC Xd, XZR, XZR, !cond.
pub fn cset(buf: &mut CodeBuffer, dst: Gpr, cond: Cond) {
    buf.note_args("cset", format_args!("{}", name(dst)));
    word(
        buf,
        0x9A9F_07E0 | (cond.invert() as u32) << 12 | u32::from(dst.0),
    );
}

// ============================================================================
// Branches
// ============================================================================

/// b.cond with a zero displacement; returns the word offset for fixup.
pub fn bcond(buf: &mut CodeBuffer, cond: Cond) -> usize {
    buf.note("b.cond");
    let at = buf.offset();
    word(buf, 0x5400_0000 | cond as u32);
    at
}

/// Unconditional b; returns the word offset for fixup.
pub fn b(buf: &mut CodeBuffer) -> usize {
    buf.note("b");
    let at = buf.offset();
    word(buf, 0x1400_0000);
    at
}

/// cbz Xt; returns the word offset for fixup.
pub fn cbz(buf: &mut CodeBuffer, reg: Gpr) -> usize {
    buf.note_args("cbz", format_args!("{}", name(reg)));
    let at = buf.offset();
    word(buf, 0xB400_0000 | u32::from(reg.0));
    at
}

/// Resolve a b.cond/cbz (imm19) branch word at `at` to `target`.
pub fn patch_imm19(buf: &mut CodeBuffer, at: usize, target: usize) {
    let delta = (target as i64 - at as i64) / 4;
    let old = buf.read_u32_at(at);
    buf.patch_u32_at(at, old | (((delta as u32) & 0x7FFFF) << 5));
}

/// Resolve a b/bl (imm26) branch word at `at` to `target`.
pub fn patch_imm26(buf: &mut CodeBuffer, at: usize, target: usize) {
    let delta = (target as i64 - at as i64) / 4;
    let old = buf.read_u32_at(at);
    buf.patch_u32_at(at, old | ((delta as u32) & 0x03FF_FFFF));
}

/// Direct b to an already-bound offset.
pub fn b_to(buf: &mut CodeBuffer, target: usize) {
    let at = b(buf);
    patch_imm26(buf, at, target);
}

/// bl symbol: displacement patched at layout time.
pub fn bl_symbol(buf: &mut CodeBuffer, symbol: &str, kind: PatchKind) {
    buf.note_args("bl", format_args!("{symbol}"));
    let at = buf.offset();
    word(buf, 0x9400_0000);
    buf.add_patch(at, symbol, kind);
}

pub fn blr(buf: &mut CodeBuffer, target: Gpr) {
    buf.note_args("blr", format_args!("{}", name(target)));
    word(buf, 0xD63F_0000 | u32::from(target.0) << 5);
}

pub fn ret(buf: &mut CodeBuffer) {
    buf.note("ret");
    word(buf, 0xD65F_03C0);
}

pub fn svc0(buf: &mut CodeBuffer) {
    buf.note("svc #0");
    word(buf, 0xD400_0001);
}

// ============================================================================
// Loads/stores
// ============================================================================

/// ldr Xt, [Xn, #imm]: unsigned scaled when possible, LDUR otherwise.
pub fn ldr(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, offset: i32) {
    buf.note_args("ldr", format_args!("{}, [{}+{offset}]", name(dst), name(base)));
    if offset >= 0 && offset % 8 == 0 && offset <= 0x7FF8 {
        word(
            buf,
            0xF940_0000
                | ((offset as u32 / 8) & 0xFFF) << 10
                | u32::from(base.0) << 5
                | u32::from(dst.0),
        );
    } else {
        // ldur
        word(
            buf,
            0xF840_0000
                | ((offset as u32) & 0x1FF) << 12
                | u32::from(base.0) << 5
                | u32::from(dst.0),
        );
    }
}

pub fn str(buf: &mut CodeBuffer, base: Gpr, offset: i32, src: Gpr) {
    buf.note_args("str", format_args!("{}, [{}+{offset}]", name(src), name(base)));
    if offset >= 0 && offset % 8 == 0 && offset <= 0x7FF8 {
        word(
            buf,
            0xF900_0000
                | ((offset as u32 / 8) & 0xFFF) << 10
                | u32::from(base.0) << 5
                | u32::from(src.0),
        );
    } else {
        // stur
        word(
            buf,
            0xF800_0000
                | ((offset as u32) & 0x1FF) << 12
                | u32::from(base.0) << 5
                | u32::from(src.0),
        );
    }
}

/// 32-bit load (ldr Wt).
pub fn ldr32(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, offset: i32) {
    buf.note_args("ldr", format_args!("w{}, [{}+{offset}]", dst.0, name(base)));
    word(
        buf,
        0xB940_0000
            | (((offset / 4) as u32) & 0xFFF) << 10
            | u32::from(base.0) << 5
            | u32::from(dst.0),
    );
}

pub fn str32(buf: &mut CodeBuffer, base: Gpr, offset: i32, src: Gpr) {
    buf.note_args("str", format_args!("w{}, [{}+{offset}]", src.0, name(base)));
    word(
        buf,
        0xB900_0000
            | (((offset / 4) as u32) & 0xFFF) << 10
            | u32::from(base.0) << 5
            | u32::from(src.0),
    );
}

/// ldrb Wt, [Xn, #imm]: byte load, zero-extending.
pub fn ldrb(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, offset: i32) {
    buf.note_args("ldrb", format_args!("w{}, [{}+{offset}]", dst.0, name(base)));
    word(
        buf,
        0x3940_0000
            | ((offset as u32) & 0xFFF) << 10
            | u32::from(base.0) << 5
            | u32::from(dst.0),
    );
}

/// strb Wt, [Xn, #imm].
pub fn strb(buf: &mut CodeBuffer, base: Gpr, offset: i32, src: Gpr) {
    buf.note_args("strb", format_args!("w{}, [{}+{offset}]", src.0, name(base)));
    word(
        buf,
        0x3900_0000
            | ((offset as u32) & 0xFFF) << 10
            | u32::from(base.0) << 5
            | u32::from(src.0),
    );
}

/// stp Xt, Xt2, [sp, #-16]!: prologue push pair.
pub fn stp_pre(buf: &mut CodeBuffer, t1: Gpr, t2: Gpr, base: Gpr, imm: i32) {
    buf.note_args("stp", format_args!("{}, {}, [{}]!", name(t1), name(t2), name(base)));
    let imm7 = ((imm / 8) as u32) & 0x7F;
    word(
        buf,
        0xA980_0000
            | imm7 << 15
            | u32::from(t2.0) << 10
            | u32::from(base.0) << 5
            | u32::from(t1.0),
    );
}

/// ldp Xt, Xt2, [sp], #16: epilogue pop pair.
pub fn ldp_post(buf: &mut CodeBuffer, t1: Gpr, t2: Gpr, base: Gpr, imm: i32) {
    buf.note_args("ldp", format_args!("{}, {}, [{}]", name(t1), name(t2), name(base)));
    let imm7 = ((imm / 8) as u32) & 0x7F;
    word(
        buf,
        0xA8C0_0000
            | imm7 << 15
            | u32::from(t2.0) << 10
            | u32::from(base.0) << 5
            | u32::from(t1.0),
    );
}

// ============================================================================
// Symbol addressing
// ============================================================================

/// adrp + add lo12 pair sharing one patch record.
pub fn adrp_add_symbol(buf: &mut CodeBuffer, dst: Gpr, symbol: &str) {
    buf.note_args("adrp+add", format_args!("{}, {symbol}", name(dst)));
    let at = buf.offset();
    word(buf, 0x9000_0000 | u32::from(dst.0));
    word(buf, 0x9100_0000 | u32::from(dst.0) << 5 | u32::from(dst.0));
    buf.add_patch(at, symbol, PatchKind::AdrpAddLo12);
}

// ============================================================================
// Scalar double
// ============================================================================

pub fn fmov_rr(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("fmov", format_args!("d{}, d{}", dst.0, src.0));
    word(buf, 0x1E60_4000 | u32::from(src.0) << 5 | u32::from(dst.0));
}

/// fmov Dd ← Xn.
pub fn fmov_dx(buf: &mut CodeBuffer, dst: Fpr, src: Gpr) {
    buf.note_args("fmov", format_args!("d{}, {}", dst.0, name(src)));
    word(buf, 0x9E67_0000 | u32::from(src.0) << 5 | u32::from(dst.0));
}

/// fmov Xd ← Dn.
pub fn fmov_xd(buf: &mut CodeBuffer, dst: Gpr, src: Fpr) {
    buf.note_args("fmov", format_args!("{}, d{}", name(dst), src.0));
    word(buf, 0x9E66_0000 | u32::from(src.0) << 5 | u32::from(dst.0));
}

fn fp_binop(buf: &mut CodeBuffer, base: u32, dst: Fpr, a: Fpr, b: Fpr) {
    word(
        buf,
        base | u32::from(b.0) << 16 | u32::from(a.0) << 5 | u32::from(dst.0),
    );
}

pub fn fadd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fadd", format_args!("d{}, d{}, d{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x1E60_2800, dst, a, b);
}

pub fn fsub(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fsub", format_args!("d{}, d{}, d{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x1E60_3800, dst, a, b);
}

pub fn fmul(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fmul", format_args!("d{}, d{}, d{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x1E60_0800, dst, a, b);
}

pub fn fdiv(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fdiv", format_args!("d{}, d{}, d{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x1E60_1800, dst, a, b);
}

/// fcmp Dn, Dm.
pub fn fcmp(buf: &mut CodeBuffer, a: Fpr, b: Fpr) {
    buf.note_args("fcmp", format_args!("d{}, d{}", a.0, b.0));
    word(buf, 0x1E60_2000 | u32::from(b.0) << 16 | u32::from(a.0) << 5);
}

/// fmadd Dd, Dn, Dm, Da: Dd = Da + Dn*Dm.
pub fn fmadd(buf: &mut CodeBuffer, dst: Fpr, n: Fpr, m: Fpr, a: Fpr) {
    buf.note_args(
        "fmadd",
        format_args!("d{}, d{}, d{}, d{}", dst.0, n.0, m.0, a.0),
    );
    word(
        buf,
        0x1F40_0000
            | u32::from(m.0) << 16
            | u32::from(a.0) << 10
            | u32::from(n.0) << 5
            | u32::from(dst.0),
    );
}

/// scvtf Dd, Xn: i64 → f64.
pub fn scvtf(buf: &mut CodeBuffer, dst: Fpr, src: Gpr) {
    buf.note_args("scvtf", format_args!("d{}, {}", dst.0, name(src)));
    word(buf, 0x9E62_0000 | u32::from(src.0) << 5 | u32::from(dst.0));
}

/// fcvtzs Xd, Dn: f64 → i64, truncating.
pub fn fcvtzs(buf: &mut CodeBuffer, dst: Gpr, src: Fpr) {
    buf.note_args("fcvtzs", format_args!("{}, d{}", name(dst), src.0));
    word(buf, 0x9E78_0000 | u32::from(src.0) << 5 | u32::from(dst.0));
}

pub fn fldr(buf: &mut CodeBuffer, dst: Fpr, base: Gpr, offset: i32) {
    buf.note_args("ldr", format_args!("d{}, [{}+{offset}]", dst.0, name(base)));
    word(
        buf,
        0xFD40_0000
            | (((offset / 8) as u32) & 0xFFF) << 10
            | u32::from(base.0) << 5
            | u32::from(dst.0),
    );
}

pub fn fstr(buf: &mut CodeBuffer, base: Gpr, offset: i32, src: Fpr) {
    buf.note_args("str", format_args!("d{}, [{}+{offset}]", src.0, name(base)));
    word(
        buf,
        0xFD00_0000
            | (((offset / 8) as u32) & 0xFFF) << 10
            | u32::from(base.0) << 5
            | u32::from(src.0),
    );
}

// ============================================================================
// SIMD (2×f64 vectors)
// ============================================================================

pub fn vfadd2d(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fadd.2d", format_args!("v{}, v{}, v{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x4E60_D400, dst, a, b);
}

pub fn vfsub2d(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fsub.2d", format_args!("v{}, v{}, v{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x4EE0_D400, dst, a, b);
}

pub fn vfmul2d(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fmul.2d", format_args!("v{}, v{}, v{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x6E60_DC00, dst, a, b);
}

pub fn vfdiv2d(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fdiv.2d", format_args!("v{}, v{}, v{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x6E60_FC00, dst, a, b);
}

pub fn vfabs2d(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("fabs.2d", format_args!("v{}, v{}", dst.0, src.0));
    word(buf, 0x4EE0_F800 | u32::from(src.0) << 5 | u32::from(dst.0));
}

/// bsl: bitwise select, the blend/mask-move primitive.
pub fn vbsl(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("bsl", format_args!("v{}, v{}, v{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x6E60_1C00, dst, a, b);
}

/// faddp: pairwise (horizontal) add.
pub fn vfaddp2d(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("faddp.2d", format_args!("v{}, v{}, v{}", dst.0, a.0, b.0));
    fp_binop(buf, 0x6E60_D400, dst, a, b);
}

// ============================================================================
// Atomics
// ============================================================================

/// ldxr Xt, [Xn].
pub fn ldxr(buf: &mut CodeBuffer, dst: Gpr, base: Gpr) {
    buf.note_args("ldxr", format_args!("{}, [{}]", name(dst), name(base)));
    word(buf, 0xC85F_7C00 | u32::from(base.0) << 5 | u32::from(dst.0));
}

/// stxr Ws, Xt, [Xn]: Ws receives 0 on success.
pub fn stxr(buf: &mut CodeBuffer, status: Gpr, src: Gpr, base: Gpr) {
    buf.note_args(
        "stxr",
        format_args!("w{}, {}, [{}]", status.0, name(src), name(base)),
    );
    word(
        buf,
        0xC800_7C00 | u32::from(status.0) << 16 | u32::from(base.0) << 5 | u32::from(src.0),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(f: impl FnOnce(&mut CodeBuffer)) -> u32 {
        let mut buf = CodeBuffer::new();
        f(&mut buf);
        assert_eq!(buf.bytes().len(), 4);
        buf.read_u32_at(0)
    }

    #[test]
    fn test_cmp_x0_x1_fields() {
        let w = emit(|b| cmp_rr(b, Gpr(0), Gpr(1)));
        // bits [31:21] = 11101011000
        assert_eq!(w >> 21, 0b111_0101_1000);
        assert_eq!((w >> 16) & 0x1F, 1); // Rm
        assert_eq!((w >> 5) & 0x1F, 0); // Rn
        assert_eq!(w & 0x1F, 31); // Rd = XZR
    }

    #[test]
    fn test_cmp_x0_imm42() {
        let w = emit(|b| cmp_ri(b, Gpr(0), 42));
        assert_eq!((w >> 10) & 0xFFF, 42); // imm12
        assert_eq!(w & 0x1F, 31); // Rd = XZR
    }

    #[test]
    fn test_adrp_pattern() {
        let mut buf = CodeBuffer::new();
        adrp_add_symbol(&mut buf, Gpr(2), "sym");
        let w = buf.read_u32_at(0);
        assert_eq!(w & 0x9F00_0000, 0x9000_0000); // ADRP opcode
        assert_eq!(w & 0x1F, 2); // Rd
        assert_eq!(buf.patches().len(), 1);
        assert_eq!(buf.patches()[0].kind, PatchKind::AdrpAddLo12);
    }

    #[test]
    fn test_ret_word() {
        assert_eq!(emit(ret), 0xD65F_03C0);
    }

    #[test]
    fn test_mov_rr_orr_form() {
        // mov x3, x7 = ORR x3, xzr, x7
        assert_eq!(emit(|b| mov_rr(b, Gpr(3), Gpr(7))), 0xAA07_03E3);
    }

    #[test]
    fn test_movz() {
        // mov x0, #42 → MOVZ x0, #42
        assert_eq!(emit(|b| mov_ri(b, Gpr(0), 42)), 0xD280_0540);
    }

    #[test]
    fn test_fadd_word() {
        // fadd d0, d1, d2
        assert_eq!(emit(|b| fadd(b, Fpr(0), Fpr(1), Fpr(2))), 0x1E62_2820);
    }

    #[test]
    fn test_bl_placeholder_and_patch() {
        let mut buf = CodeBuffer::new();
        bl_symbol(&mut buf, "f", PatchKind::Bl26);
        assert_eq!(buf.read_u32_at(0), 0x9400_0000);
        assert_eq!(buf.patches()[0].kind, PatchKind::Bl26);
    }

    #[test]
    fn test_branch_fixup_imm19() {
        let mut buf = CodeBuffer::new();
        let at = bcond(&mut buf, Cond::Eq);
        ret(&mut buf);
        ret(&mut buf);
        patch_imm19(&mut buf, at, 12);
        let w = buf.read_u32_at(at);
        assert_eq!((w >> 5) & 0x7FFFF, 3); // 12 bytes = 3 words ahead
    }

    #[test]
    fn test_svc_word() {
        assert_eq!(emit(svc0), 0xD400_0001);
    }

    #[test]
    fn test_stp_pre_frame_push() {
        // stp x29, x30, [sp, #-16]!
        let w = emit(|b| stp_pre(b, Gpr(29), Gpr(30), Gpr(31), -16));
        assert_eq!(w, 0xA9BF_7BFD);
    }
}
