//! RV64GC instruction encoding (I/M/F/D/A plus a small V subset).
//!
//! Little-endian 32-bit words built from the six base formats. Symbol
//! loads emit an AUIPC/ADDI pair sharing one patch record.

use crate::buffer::CodeBuffer;
use crate::patch::PatchKind;
use crate::target::{Fpr, Gpr, Target};

fn name(reg: Gpr) -> String {
    Target::RiscV64.gpr_name(reg)
}

// ===== Format helpers =====

fn r_type(funct7: u32, rs2: u8, rs1: u8, funct3: u32, rd: u8, opcode: u32) -> u32 {
    funct7 << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | u32::from(rd) << 7
        | opcode
}

fn i_type(imm: i32, rs1: u8, funct3: u32, rd: u8, opcode: u32) -> u32 {
    ((imm as u32) & 0xFFF) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | u32::from(rd) << 7
        | opcode
}

fn s_type(imm: i32, rs2: u8, rs1: u8, funct3: u32, opcode: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5) & 0x7F) << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | (imm & 0x1F) << 7
        | opcode
}

fn b_type(imm: i32, rs2: u8, rs1: u8, funct3: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 12) & 1) << 31
        | ((imm >> 5) & 0x3F) << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | ((imm >> 1) & 0xF) << 8
        | ((imm >> 11) & 1) << 7
        | 0x63
}

fn u_type(imm20: u32, rd: u8, opcode: u32) -> u32 {
    (imm20 & 0xF_FFFF) << 12 | u32::from(rd) << 7 | opcode
}

fn j_type(imm: i32, rd: u8) -> u32 {
    let imm = imm as u32;
    ((imm >> 20) & 1) << 31
        | ((imm >> 1) & 0x3FF) << 21
        | ((imm >> 11) & 1) << 20
        | ((imm >> 12) & 0xFF) << 12
        | u32::from(rd) << 7
        | 0x6F
}

fn word(buf: &mut CodeBuffer, w: u32) {
    buf.emit_u32(w);
}

// ============================================================================
// Moves
// ============================================================================

/// mv rd, rs: ADDI rd, rs, 0.
pub fn mov_rr(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("mv", format_args!("{}, {}", name(dst), name(src)));
    word(buf, i_type(0, src.0, 0, dst.0, 0x13));
}

/// Materialise a 64-bit immediate: LUI+ADDIW for 32-bit values, shifted
/// chunks for the rest.
pub fn mov_ri(buf: &mut CodeBuffer, dst: Gpr, imm: i64) {
    buf.note_args("li", format_args!("{}, {imm}", name(dst)));
    if let Ok(imm32) = i32::try_from(imm) {
        let hi = ((imm32 as u32).wrapping_add(0x800)) >> 12;
        let lo = imm32 - ((hi << 12) as i32);
        if hi != 0 {
            word(buf, u_type(hi, dst.0, 0x37)); // lui
            if lo != 0 {
                word(buf, i_type(lo, dst.0, 0, dst.0, 0x1B)); // addiw
            }
        } else {
            word(buf, i_type(lo, 0, 0, dst.0, 0x13)); // addi rd, zero, lo
        }
    } else {
        // Wide immediates: materialise the upper bits, shift, add the
        // sign-extended low 12 back in. Terminates because each step
        // strips 12 significant bits.
        let lo12 = ((imm << 52) >> 52) as i32;
        let hi = (imm - i64::from(lo12)) >> 12;
        mov_ri(buf, dst, hi);
        slli(buf, dst, dst, 12);
        if lo12 != 0 {
            word(buf, i_type(lo12, dst.0, 0, dst.0, 0x13));
        }
    }
}

// ============================================================================
// Integer arithmetic
// ============================================================================

pub fn add(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("add", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x00, b.0, a.0, 0, dst.0, 0x33));
}

pub fn sub(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("sub", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x20, b.0, a.0, 0, dst.0, 0x33));
}

pub fn mul(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("mul", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x01, b.0, a.0, 0, dst.0, 0x33));
}

pub fn div(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("div", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x01, b.0, a.0, 4, dst.0, 0x33));
}

pub fn rem(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("rem", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x01, b.0, a.0, 6, dst.0, 0x33));
}

pub fn addi(buf: &mut CodeBuffer, dst: Gpr, src: Gpr, imm: i32) {
    buf.note_args("addi", format_args!("{}, {}, {imm}", name(dst), name(src)));
    word(buf, i_type(imm, src.0, 0, dst.0, 0x13));
}

pub fn and(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("and", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x00, b.0, a.0, 7, dst.0, 0x33));
}

pub fn or(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("or", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x00, b.0, a.0, 6, dst.0, 0x33));
}

pub fn xor(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("xor", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x00, b.0, a.0, 4, dst.0, 0x33));
}

/// not rd, rs: XORI rd, rs, -1.
pub fn not(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("not", format_args!("{}, {}", name(dst), name(src)));
    word(buf, i_type(-1, src.0, 4, dst.0, 0x13));
}

pub fn sll(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("sll", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x00, b.0, a.0, 1, dst.0, 0x33));
}

pub fn srl(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("srl", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x00, b.0, a.0, 5, dst.0, 0x33));
}

pub fn slli(buf: &mut CodeBuffer, dst: Gpr, src: Gpr, shamt: u8) {
    buf.note_args("slli", format_args!("{}, {}, {shamt}", name(dst), name(src)));
    word(buf, i_type(i32::from(shamt & 0x3F), src.0, 1, dst.0, 0x13));
}

pub fn srli(buf: &mut CodeBuffer, dst: Gpr, src: Gpr, shamt: u8) {
    buf.note_args("srli", format_args!("{}, {}, {shamt}", name(dst), name(src)));
    word(buf, i_type(i32::from(shamt & 0x3F), src.0, 5, dst.0, 0x13));
}

/// slt rd, a, b: rd = (a < b) signed.
pub fn slt(buf: &mut CodeBuffer, dst: Gpr, a: Gpr, b: Gpr) {
    buf.note_args("slt", format_args!("{}, {}, {}", name(dst), name(a), name(b)));
    word(buf, r_type(0x00, b.0, a.0, 2, dst.0, 0x33));
}

/// sltiu rd, rs, 1: rd = (rs == 0).
pub fn seqz(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("seqz", format_args!("{}, {}", name(dst), name(src)));
    word(buf, i_type(1, src.0, 3, dst.0, 0x13));
}

/// sltu rd, zero, rs: rd = (rs != 0).
pub fn snez(buf: &mut CodeBuffer, dst: Gpr, src: Gpr) {
    buf.note_args("snez", format_args!("{}, {}", name(dst), name(src)));
    word(buf, r_type(0x00, src.0, 0, 3, dst.0, 0x33));
}

// ============================================================================
// Branches
// ============================================================================

/// Conditional branches leave a zero displacement for the local fixup.
/// funct3: 0=beq 1=bne 4=blt 5=bge 6=bltu 7=bgeu.
pub fn branch(buf: &mut CodeBuffer, funct3: u32, a: Gpr, b: Gpr) -> usize {
    buf.note("branch");
    let at = buf.offset();
    word(buf, b_type(0, b.0, a.0, funct3));
    at
}

/// jal zero (unconditional); returns the word offset for fixup.
pub fn jmp(buf: &mut CodeBuffer) -> usize {
    buf.note("j");
    let at = buf.offset();
    word(buf, j_type(0, 0));
    at
}

/// Resolve a B-type branch word at `at` to `target`.
pub fn patch_branch(buf: &mut CodeBuffer, at: usize, target: usize) {
    let delta = (target as i64 - at as i64) as i32;
    let old = buf.read_u32_at(at);
    // Clear the immediate fields, keep rs1/rs2/funct3/opcode
    let kept = old & 0x01FF_F07F;
    buf.patch_u32_at(at, kept | (b_type(delta, 0, 0, 0) & !0x01FF_F07F));
}

/// Resolve a J-type word at `at` to `target`.
pub fn patch_jal(buf: &mut CodeBuffer, at: usize, target: usize) {
    let delta = (target as i64 - at as i64) as i32;
    let old = buf.read_u32_at(at);
    let kept = old & 0xFFF;
    buf.patch_u32_at(at, kept | (j_type(delta, 0) & !0xFFF));
}

/// Direct jump to an already-bound offset.
pub fn jmp_to(buf: &mut CodeBuffer, target: usize) {
    let at = jmp(buf);
    patch_jal(buf, at, target);
}

/// jal ra, symbol: call with a 20-bit displacement patch.
pub fn call_symbol(buf: &mut CodeBuffer, symbol: &str, kind: PatchKind) {
    buf.note_args("call", format_args!("{symbol}"));
    let at = buf.offset();
    word(buf, j_type(0, 1));
    buf.add_patch(at, symbol, kind);
}

/// jalr ra, rs, 0: indirect call.
pub fn call_reg(buf: &mut CodeBuffer, target: Gpr) {
    buf.note_args("jalr", format_args!("ra, {}", name(target)));
    word(buf, i_type(0, target.0, 0, 1, 0x67));
}

/// ret: jalr zero, ra, 0.
pub fn ret(buf: &mut CodeBuffer) {
    buf.note("ret");
    word(buf, i_type(0, 1, 0, 0, 0x67));
}

pub fn ecall(buf: &mut CodeBuffer) {
    buf.note("ecall");
    word(buf, 0x0000_0073);
}

// ============================================================================
// Loads/stores
// ============================================================================

pub fn ld(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, offset: i32) {
    buf.note_args("ld", format_args!("{}, {offset}({})", name(dst), name(base)));
    word(buf, i_type(offset, base.0, 3, dst.0, 0x03));
}

pub fn sd(buf: &mut CodeBuffer, base: Gpr, offset: i32, src: Gpr) {
    buf.note_args("sd", format_args!("{}, {offset}({})", name(src), name(base)));
    word(buf, s_type(offset, src.0, base.0, 3, 0x23));
}

pub fn lw(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, offset: i32) {
    buf.note_args("lw", format_args!("{}, {offset}({})", name(dst), name(base)));
    word(buf, i_type(offset, base.0, 2, dst.0, 0x03));
}

pub fn sw(buf: &mut CodeBuffer, base: Gpr, offset: i32, src: Gpr) {
    buf.note_args("sw", format_args!("{}, {offset}({})", name(src), name(base)));
    word(buf, s_type(offset, src.0, base.0, 2, 0x23));
}

pub fn lbu(buf: &mut CodeBuffer, dst: Gpr, base: Gpr, offset: i32) {
    buf.note_args("lbu", format_args!("{}, {offset}({})", name(dst), name(base)));
    word(buf, i_type(offset, base.0, 4, dst.0, 0x03));
}

pub fn sb(buf: &mut CodeBuffer, base: Gpr, offset: i32, src: Gpr) {
    buf.note_args("sb", format_args!("{}, {offset}({})", name(src), name(base)));
    word(buf, s_type(offset, src.0, base.0, 0, 0x23));
}

pub fn fld(buf: &mut CodeBuffer, dst: Fpr, base: Gpr, offset: i32) {
    buf.note_args("fld", format_args!("f{}, {offset}({})", dst.0, name(base)));
    word(buf, i_type(offset, base.0, 3, dst.0, 0x07));
}

pub fn fsd(buf: &mut CodeBuffer, base: Gpr, offset: i32, src: Fpr) {
    buf.note_args("fsd", format_args!("f{}, {offset}({})", src.0, name(base)));
    word(buf, s_type(offset, src.0, base.0, 3, 0x27));
}

// ============================================================================
// Symbol addressing
// ============================================================================

/// auipc + addi pair sharing one patch record.
pub fn auipc_addi_symbol(buf: &mut CodeBuffer, dst: Gpr, symbol: &str) {
    buf.note_args("la", format_args!("{}, {symbol}", name(dst)));
    let at = buf.offset();
    word(buf, u_type(0, dst.0, 0x17)); // auipc
    word(buf, i_type(0, dst.0, 0, dst.0, 0x13)); // addi
    buf.add_patch(at, symbol, PatchKind::AuipcAddi);
}

// ============================================================================
// Double-precision float (D extension)
// ============================================================================

const RM_DYN: u32 = 0b111;

pub fn fmv_rr(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("fmv.d", format_args!("f{}, f{}", dst.0, src.0));
    // fsgnj.d fd, fs, fs
    word(buf, r_type(0x11, src.0, src.0, 0, dst.0, 0x53));
}

pub fn fadd(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fadd.d", format_args!("f{}, f{}, f{}", dst.0, a.0, b.0));
    word(buf, r_type(0x01, b.0, a.0, RM_DYN, dst.0, 0x53));
}

pub fn fsub(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fsub.d", format_args!("f{}, f{}, f{}", dst.0, a.0, b.0));
    word(buf, r_type(0x05, b.0, a.0, RM_DYN, dst.0, 0x53));
}

pub fn fmul(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fmul.d", format_args!("f{}, f{}, f{}", dst.0, a.0, b.0));
    word(buf, r_type(0x09, b.0, a.0, RM_DYN, dst.0, 0x53));
}

pub fn fdiv(buf: &mut CodeBuffer, dst: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("fdiv.d", format_args!("f{}, f{}, f{}", dst.0, a.0, b.0));
    word(buf, r_type(0x0D, b.0, a.0, RM_DYN, dst.0, 0x53));
}

/// feq.d rd, a, b: also the NaN probe: feq.d rd, x, x is 0 iff NaN.
pub fn feq(buf: &mut CodeBuffer, dst: Gpr, a: Fpr, b: Fpr) {
    buf.note_args("feq.d", format_args!("{}, f{}, f{}", name(dst), a.0, b.0));
    word(buf, r_type(0x51, b.0, a.0, 2, dst.0, 0x53));
}

pub fn flt(buf: &mut CodeBuffer, dst: Gpr, a: Fpr, b: Fpr) {
    buf.note_args("flt.d", format_args!("{}, f{}, f{}", name(dst), a.0, b.0));
    word(buf, r_type(0x51, b.0, a.0, 1, dst.0, 0x53));
}

pub fn fle(buf: &mut CodeBuffer, dst: Gpr, a: Fpr, b: Fpr) {
    buf.note_args("fle.d", format_args!("{}, f{}, f{}", name(dst), a.0, b.0));
    word(buf, r_type(0x51, b.0, a.0, 0, dst.0, 0x53));
}

/// fmadd.d dst, n, m, a: dst = n*m + a.
pub fn fmadd(buf: &mut CodeBuffer, dst: Fpr, n: Fpr, m: Fpr, a: Fpr) {
    buf.note_args(
        "fmadd.d",
        format_args!("f{}, f{}, f{}, f{}", dst.0, n.0, m.0, a.0),
    );
    word(
        buf,
        u32::from(a.0) << 27
            | 0b01 << 25
            | u32::from(m.0) << 20
            | u32::from(n.0) << 15
            | RM_DYN << 12
            | u32::from(dst.0) << 7
            | 0x43,
    );
}

/// fmv.d.x: bit pattern gpr → fpr.
pub fn fmv_dx(buf: &mut CodeBuffer, dst: Fpr, src: Gpr) {
    buf.note_args("fmv.d.x", format_args!("f{}, {}", dst.0, name(src)));
    word(buf, r_type(0x79, 0, src.0, 0, dst.0, 0x53));
}

/// fmv.x.d: bit pattern fpr → gpr.
pub fn fmv_xd(buf: &mut CodeBuffer, dst: Gpr, src: Fpr) {
    buf.note_args("fmv.x.d", format_args!("{}, f{}", name(dst), src.0));
    word(buf, r_type(0x71, 0, src.0, 0, dst.0, 0x53));
}

/// fcvt.d.l: i64 → f64.
pub fn fcvt_dl(buf: &mut CodeBuffer, dst: Fpr, src: Gpr) {
    buf.note_args("fcvt.d.l", format_args!("f{}, {}", dst.0, name(src)));
    word(buf, r_type(0x69, 2, src.0, RM_DYN, dst.0, 0x53));
}

/// fcvt.l.d: f64 → i64, truncating (rtz).
pub fn fcvt_ld(buf: &mut CodeBuffer, dst: Gpr, src: Fpr) {
    buf.note_args("fcvt.l.d", format_args!("{}, f{}", name(dst), src.0));
    word(buf, r_type(0x61, 2, src.0, 0b001, dst.0, 0x53));
}

/// fabs.d: fsgnjx.d fd, fs, fs.
pub fn fabs(buf: &mut CodeBuffer, dst: Fpr, src: Fpr) {
    buf.note_args("fabs.d", format_args!("f{}, f{}", dst.0, src.0));
    word(buf, r_type(0x11, src.0, src.0, 2, dst.0, 0x53));
}

// ============================================================================
// Atomics (A extension)
// ============================================================================

/// lr.d rd, (rs1).
pub fn lr_d(buf: &mut CodeBuffer, dst: Gpr, base: Gpr) {
    buf.note_args("lr.d", format_args!("{}, ({})", name(dst), name(base)));
    word(buf, 0b00010 << 27 | u32::from(base.0) << 15 | 3 << 12 | u32::from(dst.0) << 7 | 0x2F);
}

/// sc.d rd, rs2, (rs1): rd is 0 on success.
pub fn sc_d(buf: &mut CodeBuffer, dst: Gpr, src: Gpr, base: Gpr) {
    buf.note_args(
        "sc.d",
        format_args!("{}, {}, ({})", name(dst), name(src), name(base)),
    );
    word(
        buf,
        0b00011 << 27
            | u32::from(src.0) << 20
            | u32::from(base.0) << 15
            | 3 << 12
            | u32::from(dst.0) << 7
            | 0x2F,
    );
}

// ============================================================================
// Vector subset (V extension)
// ============================================================================

/// vsetivli zero, uimm, e64,m1: configure 64-bit element vectors.
pub fn vsetivli_e64(buf: &mut CodeBuffer, avl: u8) {
    buf.note_args("vsetivli", format_args!("zero, {avl}, e64"));
    // vtypei: sew=011 (e64) at [5:3], lmul=000 (m1)
    let vtypei = 0b011_000u32;
    word(
        buf,
        0b11 << 30 | (vtypei & 0x3FF) << 20 | u32::from(avl & 0x1F) << 15 | 0b111 << 12 | 0x57,
    );
}

fn opfvv(buf: &mut CodeBuffer, funct6: u32, vd: u8, vs2: u8, vs1: u8) {
    word(
        buf,
        funct6 << 26
            | 1 << 25 // unmasked
            | u32::from(vs2) << 20
            | u32::from(vs1) << 15
            | 0b001 << 12
            | u32::from(vd) << 7
            | 0x57,
    );
}

pub fn vfadd(buf: &mut CodeBuffer, vd: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vfadd.vv", format_args!("v{}, v{}, v{}", vd.0, a.0, b.0));
    opfvv(buf, 0b000000, vd.0, a.0, b.0);
}

pub fn vfsub(buf: &mut CodeBuffer, vd: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vfsub.vv", format_args!("v{}, v{}, v{}", vd.0, a.0, b.0));
    opfvv(buf, 0b000010, vd.0, a.0, b.0);
}

pub fn vfmul(buf: &mut CodeBuffer, vd: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vfmul.vv", format_args!("v{}, v{}, v{}", vd.0, a.0, b.0));
    opfvv(buf, 0b100100, vd.0, a.0, b.0);
}

pub fn vfdiv(buf: &mut CodeBuffer, vd: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vfdiv.vv", format_args!("v{}, v{}, v{}", vd.0, a.0, b.0));
    opfvv(buf, 0b100000, vd.0, a.0, b.0);
}

/// vfabs via vfsgnjx.vv vd, vs, vs.
pub fn vfabs(buf: &mut CodeBuffer, vd: Fpr, src: Fpr) {
    buf.note_args("vfabs.v", format_args!("v{}, v{}", vd.0, src.0));
    opfvv(buf, 0b001010, vd.0, src.0, src.0);
}

/// vmerge.vvm: blend under mask v0.
pub fn vmerge(buf: &mut CodeBuffer, vd: Fpr, a: Fpr, b: Fpr) {
    buf.note_args("vmerge.vvm", format_args!("v{}, v{}, v{}", vd.0, a.0, b.0));
    word(
        buf,
        0b010111 << 26
            | u32::from(a.0) << 20
            | u32::from(b.0) << 15
            | 0b000 << 12
            | u32::from(vd.0) << 7
            | 0x57,
    );
}

/// vfredosum.vs: ordered horizontal sum into element 0.
pub fn vfredosum(buf: &mut CodeBuffer, vd: Fpr, vec: Fpr, acc: Fpr) {
    buf.note_args(
        "vfredosum.vs",
        format_args!("v{}, v{}, v{}", vd.0, vec.0, acc.0),
    );
    opfvv(buf, 0b000011, vd.0, vec.0, acc.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit_one(f: impl FnOnce(&mut CodeBuffer)) -> u32 {
        let mut buf = CodeBuffer::new();
        f(&mut buf);
        assert_eq!(buf.bytes().len(), 4, "expected a single word");
        buf.read_u32_at(0)
    }

    #[test]
    fn test_sub_t0_a0_a1_fields() {
        let w = emit_one(|b| sub(b, Gpr(5), Gpr(10), Gpr(11)));
        assert_eq!(w & 0x7F, 0x33); // opcode
        assert_eq!((w >> 12) & 0x7, 0); // funct3
        assert_eq!(w >> 25, 0x20); // funct7
        assert_eq!((w >> 15) & 0x1F, 10); // rs1
        assert_eq!((w >> 20) & 0x1F, 11); // rs2
        assert_eq!((w >> 7) & 0x1F, 5); // rd
    }

    #[test]
    fn test_auipc_opcode_and_rd() {
        let mut buf = CodeBuffer::new();
        auipc_addi_symbol(&mut buf, Gpr(10), "sym");
        let w = buf.read_u32_at(0);
        assert_eq!(w & 0x7F, 0x17); // AUIPC
        assert_eq!((w >> 7) & 0x1F, 10); // rd
        assert_eq!(buf.patches()[0].kind, PatchKind::AuipcAddi);
    }

    #[test]
    fn test_ecall_word() {
        assert_eq!(emit_one(ecall), 0x0000_0073);
    }

    #[test]
    fn test_ret_is_jalr_ra() {
        assert_eq!(emit_one(ret), 0x0000_8067);
    }

    #[test]
    fn test_addi_negative_imm() {
        // addi sp, sp, -16
        let w = emit_one(|b| addi(b, Gpr(2), Gpr(2), -16));
        assert_eq!(w >> 20, 0xFF0); // -16 in 12 bits
    }

    #[test]
    fn test_ld_sd_roundtrip_fields() {
        let w = emit_one(|b| ld(b, Gpr(10), Gpr(8), 24));
        assert_eq!(w & 0x7F, 0x03);
        assert_eq!(w >> 20, 24);

        let w = emit_one(|b| sd(b, Gpr(8), 24, Gpr(10)));
        assert_eq!(w & 0x7F, 0x23);
        // imm[4:0] at [11:7], imm[11:5] at [31:25]
        assert_eq!((w >> 7) & 0x1F, 24);
        assert_eq!(w >> 25, 0);
    }

    #[test]
    fn test_branch_patch() {
        let mut buf = CodeBuffer::new();
        let at = branch(&mut buf, 0, Gpr(10), Gpr(11)); // beq a0, a1
        ret(&mut buf);
        ret(&mut buf);
        patch_branch(&mut buf, at, 12);
        let w = buf.read_u32_at(at);
        // delta 12: imm[4:1]=0110
        assert_eq!((w >> 8) & 0xF, 6);
        assert_eq!(w & 0x7F, 0x63);
    }

    #[test]
    fn test_fadd_d() {
        // fadd.d fa0, fa1, fa2 dynamic rounding
        let w = emit_one(|b| fadd(b, Fpr(10), Fpr(11), Fpr(12)));
        assert_eq!(w & 0x7F, 0x53);
        assert_eq!(w >> 25, 0x01);
        assert_eq!((w >> 12) & 0x7, 0b111);
    }

    #[test]
    fn test_fmadd_d_opcode() {
        let w = emit_one(|b| fmadd(b, Fpr(10), Fpr(11), Fpr(12), Fpr(13)));
        assert_eq!(w & 0x7F, 0x43);
        assert_eq!((w >> 25) & 0x3, 0b01); // double fmt
        assert_eq!(w >> 27, 13); // rs3
    }

    #[test]
    fn test_lr_sc() {
        let w = emit_one(|b| lr_d(b, Gpr(10), Gpr(11)));
        assert_eq!(w & 0x7F, 0x2F);
        assert_eq!(w >> 27, 0b00010);

        let w = emit_one(|b| sc_d(b, Gpr(10), Gpr(12), Gpr(11)));
        assert_eq!(w >> 27, 0b00011);
    }

    #[test]
    fn test_li_small() {
        // li a0, 42 → addi a0, zero, 42
        let w = emit_one(|b| mov_ri(b, Gpr(10), 42));
        assert_eq!(w & 0x7F, 0x13);
        assert_eq!(w >> 20, 42);
    }
}
