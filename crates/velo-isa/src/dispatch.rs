//! Target dispatch: one operation surface, three encoders.
//!
//! The code generator talks to [`Asm`] exclusively. Each operation has
//! per-ISA implementations behind a single entry point that matches on
//! the current target; local control flow uses [`BranchFixup`] handles
//! bound once the destination offset is known.

use crate::buffer::CodeBuffer;
use crate::patch::PatchKind;
use crate::target::{Fpr, Gpr, Target};
use crate::{arm64, riscv64, x86_64};

/// High-level comparison conditions. For float compares the x86 mapping
/// uses the unsigned (above/below) condition codes ucomisd sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    fn x86_int(self) -> x86_64::Cc {
        match self {
            Cond::Eq => x86_64::Cc::E,
            Cond::Ne => x86_64::Cc::Ne,
            Cond::Lt => x86_64::Cc::L,
            Cond::Le => x86_64::Cc::Le,
            Cond::Gt => x86_64::Cc::G,
            Cond::Ge => x86_64::Cc::Ge,
        }
    }

    fn x86_float(self) -> x86_64::Cc {
        match self {
            Cond::Eq => x86_64::Cc::E,
            Cond::Ne => x86_64::Cc::Ne,
            Cond::Lt => x86_64::Cc::B,
            Cond::Le => x86_64::Cc::Be,
            Cond::Gt => x86_64::Cc::A,
            Cond::Ge => x86_64::Cc::Ae,
        }
    }

    fn a64(self) -> arm64::Cond {
        match self {
            Cond::Eq => arm64::Cond::Eq,
            Cond::Ne => arm64::Cond::Ne,
            Cond::Lt => arm64::Cond::Lt,
            Cond::Le => arm64::Cond::Le,
            Cond::Gt => arm64::Cond::Gt,
            Cond::Ge => arm64::Cond::Ge,
        }
    }

    fn a64_float(self) -> arm64::Cond {
        match self {
            Cond::Eq => arm64::Cond::Eq,
            Cond::Ne => arm64::Cond::Ne,
            Cond::Lt => arm64::Cond::Mi,
            Cond::Le => arm64::Cond::Ls,
            Cond::Gt => arm64::Cond::Gt,
            Cond::Ge => arm64::Cond::Ge,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FixupKind {
    X86Rel32,
    A64Imm19,
    A64Imm26,
    Rv64Branch,
    Rv64Jal,
}

/// A pending local branch awaiting its destination.
#[derive(Debug, Clone, Copy)]
pub struct BranchFixup {
    at: usize,
    kind: FixupKind,
}

/// The target-dispatching assembler.
pub struct Asm {
    pub buf: CodeBuffer,
    pub target: Target,
}

impl Asm {
    pub fn new(target: Target) -> Self {
        Self {
            buf: CodeBuffer::with_capacity(4096),
            target,
        }
    }

    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    // ========================================================================
    // Moves
    // ========================================================================

    pub fn mov_rr(&mut self, dst: Gpr, src: Gpr) {
        if dst == src {
            return;
        }
        match self.target {
            Target::X86_64 => x86_64::mov_rr(&mut self.buf, dst, src),
            Target::Arm64 => arm64::mov_rr(&mut self.buf, dst, src),
            Target::RiscV64 => riscv64::mov_rr(&mut self.buf, dst, src),
        }
    }

    pub fn mov_ri(&mut self, dst: Gpr, imm: i64) {
        match self.target {
            Target::X86_64 => x86_64::mov_ri(&mut self.buf, dst, imm),
            Target::Arm64 => arm64::mov_ri(&mut self.buf, dst, imm),
            Target::RiscV64 => riscv64::mov_ri(&mut self.buf, dst, imm),
        }
    }

    pub fn fmov_rr(&mut self, dst: Fpr, src: Fpr) {
        if dst == src {
            return;
        }
        match self.target {
            Target::X86_64 => x86_64::movsd_rr(&mut self.buf, dst, src),
            Target::Arm64 => arm64::fmov_rr(&mut self.buf, dst, src),
            Target::RiscV64 => riscv64::fmv_rr(&mut self.buf, dst, src),
        }
    }

    /// Bit-pattern move gpr → fpr.
    pub fn fmov_from_gpr(&mut self, dst: Fpr, src: Gpr) {
        match self.target {
            Target::X86_64 => x86_64::movq_xr(&mut self.buf, dst, src),
            Target::Arm64 => arm64::fmov_dx(&mut self.buf, dst, src),
            Target::RiscV64 => riscv64::fmv_dx(&mut self.buf, dst, src),
        }
    }

    /// Bit-pattern move fpr → gpr.
    pub fn fmov_to_gpr(&mut self, dst: Gpr, src: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::movq_rx(&mut self.buf, dst, src),
            Target::Arm64 => arm64::fmov_xd(&mut self.buf, dst, src),
            Target::RiscV64 => riscv64::fmv_xd(&mut self.buf, dst, src),
        }
    }

    /// Load an f64 immediate through its bit pattern.
    pub fn fmov_imm(&mut self, dst: Fpr, value: f64, scratch: Gpr) {
        self.mov_ri(scratch, value.to_bits() as i64);
        self.fmov_from_gpr(dst, scratch);
    }

    // ========================================================================
    // Memory
    // ========================================================================

    pub fn load(&mut self, dst: Gpr, base: Gpr, offset: i32) {
        match self.target {
            Target::X86_64 => x86_64::load(&mut self.buf, dst, base, offset),
            Target::Arm64 => arm64::ldr(&mut self.buf, dst, base, offset),
            Target::RiscV64 => riscv64::ld(&mut self.buf, dst, base, offset),
        }
    }

    pub fn store(&mut self, base: Gpr, offset: i32, src: Gpr) {
        match self.target {
            Target::X86_64 => x86_64::store(&mut self.buf, base, offset, src),
            Target::Arm64 => arm64::str(&mut self.buf, base, offset, src),
            Target::RiscV64 => riscv64::sd(&mut self.buf, base, offset, src),
        }
    }

    pub fn load32(&mut self, dst: Gpr, base: Gpr, offset: i32) {
        match self.target {
            Target::X86_64 => x86_64::load32(&mut self.buf, dst, base, offset),
            Target::Arm64 => arm64::ldr32(&mut self.buf, dst, base, offset),
            Target::RiscV64 => riscv64::lw(&mut self.buf, dst, base, offset),
        }
    }

    pub fn store32(&mut self, base: Gpr, offset: i32, src: Gpr) {
        match self.target {
            Target::X86_64 => x86_64::store32(&mut self.buf, base, offset, src),
            Target::Arm64 => arm64::str32(&mut self.buf, base, offset, src),
            Target::RiscV64 => riscv64::sw(&mut self.buf, base, offset, src),
        }
    }

    pub fn load8(&mut self, dst: Gpr, base: Gpr, offset: i32) {
        match self.target {
            Target::X86_64 => x86_64::load8(&mut self.buf, dst, base, offset),
            Target::Arm64 => arm64::ldrb(&mut self.buf, dst, base, offset),
            Target::RiscV64 => riscv64::lbu(&mut self.buf, dst, base, offset),
        }
    }

    pub fn store8(&mut self, base: Gpr, offset: i32, src: Gpr) {
        match self.target {
            Target::X86_64 => x86_64::store8(&mut self.buf, base, offset, src),
            Target::Arm64 => arm64::strb(&mut self.buf, base, offset, src),
            Target::RiscV64 => riscv64::sb(&mut self.buf, base, offset, src),
        }
    }

    pub fn fload(&mut self, dst: Fpr, base: Gpr, offset: i32) {
        match self.target {
            Target::X86_64 => x86_64::movsd_load(&mut self.buf, dst, base, offset),
            Target::Arm64 => arm64::fldr(&mut self.buf, dst, base, offset),
            Target::RiscV64 => riscv64::fld(&mut self.buf, dst, base, offset),
        }
    }

    pub fn fstore(&mut self, base: Gpr, offset: i32, src: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::movsd_store(&mut self.buf, base, offset, src),
            Target::Arm64 => arm64::fstr(&mut self.buf, base, offset, src),
            Target::RiscV64 => riscv64::fsd(&mut self.buf, base, offset, src),
        }
    }

    /// Load the address of a symbol; the relocation kind is per-ISA
    /// (RIP-relative disp32, ADRP/ADD pair, AUIPC/ADDI pair).
    pub fn lea_symbol(&mut self, dst: Gpr, symbol: &str) {
        match self.target {
            Target::X86_64 => {
                x86_64::lea_symbol(&mut self.buf, dst, symbol, PatchKind::PcRel32)
            }
            Target::Arm64 => arm64::adrp_add_symbol(&mut self.buf, dst, symbol),
            Target::RiscV64 => riscv64::auipc_addi_symbol(&mut self.buf, dst, symbol),
        }
    }

    // ========================================================================
    // Integer arithmetic (three-operand; x86 lowers to mov + two-operand)
    // ========================================================================

    fn x86_threeop(&mut self, dst: Gpr, a: Gpr, op: impl FnOnce(&mut CodeBuffer)) {
        if dst != a {
            x86_64::mov_rr(&mut self.buf, dst, a);
        }
        op(&mut self.buf);
    }

    pub fn add(&mut self, dst: Gpr, a: Gpr, b: Gpr) {
        match self.target {
            Target::X86_64 => {
                self.x86_threeop(dst, a, |buf| x86_64::add_rr(buf, dst, b));
            }
            Target::Arm64 => arm64::add_rr(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::add(&mut self.buf, dst, a, b),
        }
    }

    pub fn sub(&mut self, dst: Gpr, a: Gpr, b: Gpr) {
        match self.target {
            Target::X86_64 => {
                self.x86_threeop(dst, a, |buf| x86_64::sub_rr(buf, dst, b));
            }
            Target::Arm64 => arm64::sub_rr(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::sub(&mut self.buf, dst, a, b),
        }
    }

    pub fn add_ri(&mut self, dst: Gpr, src: Gpr, imm: i32) {
        match self.target {
            Target::X86_64 => {
                if dst != src {
                    x86_64::mov_rr(&mut self.buf, dst, src);
                }
                x86_64::add_ri(&mut self.buf, dst, imm);
            }
            Target::Arm64 => {
                if imm >= 0 {
                    arm64::add_ri(&mut self.buf, dst, src, imm as u16);
                } else {
                    arm64::sub_ri(&mut self.buf, dst, src, (-imm) as u16);
                }
            }
            Target::RiscV64 => riscv64::addi(&mut self.buf, dst, src, imm),
        }
    }

    pub fn mul(&mut self, dst: Gpr, a: Gpr, b: Gpr) {
        match self.target {
            Target::X86_64 => {
                self.x86_threeop(dst, a, |buf| x86_64::imul_rr(buf, dst, b));
            }
            Target::Arm64 => arm64::mul_rr(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::mul(&mut self.buf, dst, a, b),
        }
    }

    /// Signed integer division. On x86 the dividend moves through
    /// rax/rdx; the divisor is staged in r11 so those never alias.
    pub fn sdiv(&mut self, dst: Gpr, a: Gpr, b: Gpr) {
        match self.target {
            Target::X86_64 => {
                x86_64::mov_rr(&mut self.buf, Gpr(11), b);
                x86_64::mov_rr(&mut self.buf, Gpr(0), a);
                x86_64::idiv(&mut self.buf, Gpr(11));
                x86_64::mov_rr(&mut self.buf, dst, Gpr(0));
            }
            Target::Arm64 => arm64::sdiv_rr(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::div(&mut self.buf, dst, a, b),
        }
    }

    pub fn and(&mut self, dst: Gpr, a: Gpr, b: Gpr) {
        match self.target {
            Target::X86_64 => {
                self.x86_threeop(dst, a, |buf| x86_64::and_rr(buf, dst, b));
            }
            Target::Arm64 => arm64::and_rr(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::and(&mut self.buf, dst, a, b),
        }
    }

    pub fn or(&mut self, dst: Gpr, a: Gpr, b: Gpr) {
        match self.target {
            Target::X86_64 => {
                self.x86_threeop(dst, a, |buf| x86_64::or_rr(buf, dst, b));
            }
            Target::Arm64 => arm64::orr_rr(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::or(&mut self.buf, dst, a, b),
        }
    }

    pub fn xor(&mut self, dst: Gpr, a: Gpr, b: Gpr) {
        match self.target {
            Target::X86_64 => {
                self.x86_threeop(dst, a, |buf| x86_64::xor_rr(buf, dst, b));
            }
            Target::Arm64 => arm64::eor_rr(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::xor(&mut self.buf, dst, a, b),
        }
    }

    pub fn not(&mut self, dst: Gpr, src: Gpr) {
        match self.target {
            Target::X86_64 => {
                if dst != src {
                    x86_64::mov_rr(&mut self.buf, dst, src);
                }
                x86_64::not_r(&mut self.buf, dst);
            }
            Target::Arm64 => arm64::mvn_rr(&mut self.buf, dst, src),
            Target::RiscV64 => riscv64::not(&mut self.buf, dst, src),
        }
    }

    pub fn shl(&mut self, dst: Gpr, a: Gpr, amount: Gpr) {
        match self.target {
            Target::X86_64 => {
                // shift amount must sit in cl (rcx)
                x86_64::mov_rr(&mut self.buf, Gpr(1), amount);
                if dst != a {
                    x86_64::mov_rr(&mut self.buf, dst, a);
                }
                x86_64::shift_cl(&mut self.buf, 4, dst);
            }
            Target::Arm64 => arm64::lslv(&mut self.buf, dst, a, amount),
            Target::RiscV64 => riscv64::sll(&mut self.buf, dst, a, amount),
        }
    }

    pub fn shr(&mut self, dst: Gpr, a: Gpr, amount: Gpr) {
        match self.target {
            Target::X86_64 => {
                x86_64::mov_rr(&mut self.buf, Gpr(1), amount);
                if dst != a {
                    x86_64::mov_rr(&mut self.buf, dst, a);
                }
                x86_64::shift_cl(&mut self.buf, 5, dst);
            }
            Target::Arm64 => arm64::lsrv(&mut self.buf, dst, a, amount),
            Target::RiscV64 => riscv64::srl(&mut self.buf, dst, a, amount),
        }
    }

    // ========================================================================
    // Double-precision arithmetic (three-operand)
    // ========================================================================

    fn x86_fthreeop(&mut self, dst: Fpr, a: Fpr, op: impl FnOnce(&mut CodeBuffer)) {
        if dst != a {
            x86_64::movsd_rr(&mut self.buf, dst, a);
        }
        op(&mut self.buf);
    }

    /// dst = a + b. On x86, dst must not alias b unless dst == a.
    pub fn fadd(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => self.x86_fthreeop(dst, a, |buf| x86_64::addsd(buf, dst, b)),
            Target::Arm64 => arm64::fadd(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::fadd(&mut self.buf, dst, a, b),
        }
    }

    pub fn fsub(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => self.x86_fthreeop(dst, a, |buf| x86_64::subsd(buf, dst, b)),
            Target::Arm64 => arm64::fsub(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::fsub(&mut self.buf, dst, a, b),
        }
    }

    pub fn fmul(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => self.x86_fthreeop(dst, a, |buf| x86_64::mulsd(buf, dst, b)),
            Target::Arm64 => arm64::fmul(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::fmul(&mut self.buf, dst, a, b),
        }
    }

    pub fn fdiv(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => self.x86_fthreeop(dst, a, |buf| x86_64::divsd(buf, dst, b)),
            Target::Arm64 => arm64::fdiv(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::fdiv(&mut self.buf, dst, a, b),
        }
    }

    /// Fused multiply-add: dst = dst + a*b.
    pub fn fma(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vfmadd231sd(&mut self.buf, dst, a, b),
            Target::Arm64 => arm64::fmadd(&mut self.buf, dst, a, b, dst),
            Target::RiscV64 => riscv64::fmadd(&mut self.buf, dst, a, b, dst),
        }
    }

    /// i64 → f64.
    pub fn int_to_f64(&mut self, dst: Fpr, src: Gpr) {
        match self.target {
            Target::X86_64 => x86_64::cvtsi2sd(&mut self.buf, dst, src),
            Target::Arm64 => arm64::scvtf(&mut self.buf, dst, src),
            Target::RiscV64 => riscv64::fcvt_dl(&mut self.buf, dst, src),
        }
    }

    /// f64 → i64, truncating.
    pub fn f64_to_int(&mut self, dst: Gpr, src: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::cvttsd2si(&mut self.buf, dst, src),
            Target::Arm64 => arm64::fcvtzs(&mut self.buf, dst, src),
            Target::RiscV64 => riscv64::fcvt_ld(&mut self.buf, dst, src),
        }
    }

    // ========================================================================
    // Comparisons
    // ========================================================================

    /// dst = (a cond b) as 0/1 for doubles.
    pub fn fcmp_set(&mut self, cond: Cond, dst: Gpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => {
                x86_64::ucomisd(&mut self.buf, a, b);
                x86_64::setcc(&mut self.buf, cond.x86_float(), dst);
            }
            Target::Arm64 => {
                arm64::fcmp(&mut self.buf, a, b);
                arm64::cset(&mut self.buf, dst, cond.a64_float());
            }
            Target::RiscV64 => match cond {
                Cond::Eq => riscv64::feq(&mut self.buf, dst, a, b),
                Cond::Ne => {
                    riscv64::feq(&mut self.buf, dst, a, b);
                    riscv64::seqz(&mut self.buf, dst, dst);
                }
                Cond::Lt => riscv64::flt(&mut self.buf, dst, a, b),
                Cond::Le => riscv64::fle(&mut self.buf, dst, a, b),
                Cond::Gt => riscv64::flt(&mut self.buf, dst, b, a),
                Cond::Ge => riscv64::fle(&mut self.buf, dst, b, a),
            },
        }
    }

    /// dst = 1 when src is any NaN (the error-value probe).
    pub fn fis_nan(&mut self, dst: Gpr, src: Fpr) {
        match self.target {
            Target::X86_64 => {
                x86_64::ucomisd(&mut self.buf, src, src);
                x86_64::setcc(&mut self.buf, x86_64::Cc::P, dst);
            }
            Target::Arm64 => {
                arm64::fcmp(&mut self.buf, src, src);
                arm64::cset(&mut self.buf, dst, arm64::Cond::Vs);
            }
            Target::RiscV64 => {
                riscv64::feq(&mut self.buf, dst, src, src);
                riscv64::seqz(&mut self.buf, dst, dst);
            }
        }
    }

    /// dst = (a cond b) as 0/1 for integers.
    pub fn cmp_set(&mut self, cond: Cond, dst: Gpr, a: Gpr, b: Gpr) {
        match self.target {
            Target::X86_64 => {
                x86_64::cmp_rr(&mut self.buf, a, b);
                x86_64::setcc(&mut self.buf, cond.x86_int(), dst);
            }
            Target::Arm64 => {
                arm64::cmp_rr(&mut self.buf, a, b);
                arm64::cset(&mut self.buf, dst, cond.a64());
            }
            Target::RiscV64 => match cond {
                Cond::Eq => {
                    riscv64::xor(&mut self.buf, dst, a, b);
                    riscv64::seqz(&mut self.buf, dst, dst);
                }
                Cond::Ne => {
                    riscv64::xor(&mut self.buf, dst, a, b);
                    riscv64::snez(&mut self.buf, dst, dst);
                }
                Cond::Lt => riscv64::slt(&mut self.buf, dst, a, b),
                Cond::Gt => riscv64::slt(&mut self.buf, dst, b, a),
                Cond::Le => {
                    riscv64::slt(&mut self.buf, dst, b, a);
                    riscv64::seqz(&mut self.buf, dst, dst);
                }
                Cond::Ge => {
                    riscv64::slt(&mut self.buf, dst, a, b);
                    riscv64::seqz(&mut self.buf, dst, dst);
                }
            },
        }
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    /// Branch taken when `reg` is zero.
    pub fn branch_if_zero(&mut self, reg: Gpr) -> BranchFixup {
        match self.target {
            Target::X86_64 => {
                x86_64::test_rr(&mut self.buf, reg, reg);
                BranchFixup {
                    at: x86_64::jcc(&mut self.buf, x86_64::Cc::E),
                    kind: FixupKind::X86Rel32,
                }
            }
            Target::Arm64 => BranchFixup {
                at: arm64::cbz(&mut self.buf, reg),
                kind: FixupKind::A64Imm19,
            },
            Target::RiscV64 => BranchFixup {
                at: riscv64::branch(&mut self.buf, 0, reg, Gpr(0)), // beq reg, zero
                kind: FixupKind::Rv64Branch,
            },
        }
    }

    /// Branch taken when `reg` is non-zero.
    pub fn branch_if_nonzero(&mut self, reg: Gpr) -> BranchFixup {
        match self.target {
            Target::X86_64 => {
                x86_64::test_rr(&mut self.buf, reg, reg);
                BranchFixup {
                    at: x86_64::jcc(&mut self.buf, x86_64::Cc::Ne),
                    kind: FixupKind::X86Rel32,
                }
            }
            Target::Arm64 => {
                arm64::cmp_ri(&mut self.buf, reg, 0);
                BranchFixup {
                    at: arm64::bcond(&mut self.buf, arm64::Cond::Ne),
                    kind: FixupKind::A64Imm19,
                }
            }
            Target::RiscV64 => BranchFixup {
                at: riscv64::branch(&mut self.buf, 1, reg, Gpr(0)), // bne reg, zero
                kind: FixupKind::Rv64Branch,
            },
        }
    }

    /// Compare integers and branch when the condition holds.
    pub fn branch_cmp(&mut self, cond: Cond, a: Gpr, b: Gpr) -> BranchFixup {
        match self.target {
            Target::X86_64 => {
                x86_64::cmp_rr(&mut self.buf, a, b);
                BranchFixup {
                    at: x86_64::jcc(&mut self.buf, cond.x86_int()),
                    kind: FixupKind::X86Rel32,
                }
            }
            Target::Arm64 => {
                arm64::cmp_rr(&mut self.buf, a, b);
                BranchFixup {
                    at: arm64::bcond(&mut self.buf, cond.a64()),
                    kind: FixupKind::A64Imm19,
                }
            }
            Target::RiscV64 => {
                // Direct register-register branches
                let (funct3, x, y) = match cond {
                    Cond::Eq => (0, a, b),
                    Cond::Ne => (1, a, b),
                    Cond::Lt => (4, a, b),
                    Cond::Ge => (5, a, b),
                    Cond::Gt => (4, b, a),
                    Cond::Le => (5, b, a),
                };
                BranchFixup {
                    at: riscv64::branch(&mut self.buf, funct3, x, y),
                    kind: FixupKind::Rv64Branch,
                }
            }
        }
    }

    /// Unconditional forward jump.
    pub fn jump(&mut self) -> BranchFixup {
        match self.target {
            Target::X86_64 => BranchFixup {
                at: x86_64::jmp(&mut self.buf),
                kind: FixupKind::X86Rel32,
            },
            Target::Arm64 => BranchFixup {
                at: arm64::b(&mut self.buf),
                kind: FixupKind::A64Imm26,
            },
            Target::RiscV64 => BranchFixup {
                at: riscv64::jmp(&mut self.buf),
                kind: FixupKind::Rv64Jal,
            },
        }
    }

    /// Jump backward to an already-bound offset.
    pub fn jump_to(&mut self, target: usize) {
        match self.target {
            Target::X86_64 => x86_64::jmp_to(&mut self.buf, target),
            Target::Arm64 => arm64::b_to(&mut self.buf, target),
            Target::RiscV64 => riscv64::jmp_to(&mut self.buf, target),
        }
    }

    /// Bind a pending branch to the current offset.
    pub fn bind(&mut self, fixup: BranchFixup) {
        let target = self.buf.offset();
        match fixup.kind {
            FixupKind::X86Rel32 => x86_64::patch_rel32(&mut self.buf, fixup.at, target),
            FixupKind::A64Imm19 => arm64::patch_imm19(&mut self.buf, fixup.at, target),
            FixupKind::A64Imm26 => arm64::patch_imm26(&mut self.buf, fixup.at, target),
            FixupKind::Rv64Branch => riscv64::patch_branch(&mut self.buf, fixup.at, target),
            FixupKind::Rv64Jal => riscv64::patch_jal(&mut self.buf, fixup.at, target),
        }
    }

    /// Call a symbol. `through_plt` selects the dynamic-linker
    /// indirection; otherwise the displacement resolves to a local label.
    pub fn call_symbol(&mut self, symbol: &str, through_plt: bool) {
        match self.target {
            Target::X86_64 => {
                let kind = if through_plt {
                    PatchKind::PltCall
                } else {
                    PatchKind::CallRel32
                };
                x86_64::call_symbol(&mut self.buf, symbol, kind);
            }
            Target::Arm64 => {
                let kind = if through_plt {
                    PatchKind::PltCall
                } else {
                    PatchKind::Bl26
                };
                arm64::bl_symbol(&mut self.buf, symbol, kind);
            }
            Target::RiscV64 => {
                let kind = if through_plt {
                    PatchKind::PltCall
                } else {
                    PatchKind::Jal20
                };
                riscv64::call_symbol(&mut self.buf, symbol, kind);
            }
        }
    }

    pub fn call_reg(&mut self, target: Gpr) {
        match self.target {
            Target::X86_64 => x86_64::call_reg(&mut self.buf, target),
            Target::Arm64 => arm64::blr(&mut self.buf, target),
            Target::RiscV64 => riscv64::call_reg(&mut self.buf, target),
        }
    }

    pub fn ret(&mut self) {
        match self.target {
            Target::X86_64 => x86_64::ret(&mut self.buf),
            Target::Arm64 => arm64::ret(&mut self.buf),
            Target::RiscV64 => riscv64::ret(&mut self.buf),
        }
    }

    pub fn syscall(&mut self) {
        match self.target {
            Target::X86_64 => x86_64::syscall(&mut self.buf),
            Target::Arm64 => arm64::svc0(&mut self.buf),
            Target::RiscV64 => riscv64::ecall(&mut self.buf),
        }
    }

    // ========================================================================
    // Stack
    // ========================================================================

    /// Standard frame: save fp (and the link register where it is one),
    /// establish the new frame pointer, reserve `frame` bytes (16-byte
    /// aligned by the caller).
    pub fn frame_prologue(&mut self, frame: i32) {
        let abi = self.target.abi();
        let sp = abi.sp;
        let fp = abi.fp;
        match self.target {
            Target::X86_64 => {
                x86_64::push(&mut self.buf, fp);
                x86_64::mov_rr(&mut self.buf, fp, sp);
                x86_64::sub_ri(&mut self.buf, sp, frame);
            }
            Target::Arm64 => {
                arm64::stp_pre(&mut self.buf, fp, Gpr(30), sp, -16);
                arm64::mov_rr(&mut self.buf, fp, sp);
                self.adjust_sp(-frame);
            }
            Target::RiscV64 => {
                riscv64::addi(&mut self.buf, sp, sp, -16);
                riscv64::sd(&mut self.buf, sp, 8, Gpr(1)); // ra
                riscv64::sd(&mut self.buf, sp, 0, fp); // s0
                riscv64::mov_rr(&mut self.buf, fp, sp);
                self.adjust_sp(-frame);
            }
        }
    }

    /// Restore the frame and return.
    pub fn frame_epilogue(&mut self) {
        let abi = self.target.abi();
        let sp = abi.sp;
        let fp = abi.fp;
        match self.target {
            Target::X86_64 => {
                x86_64::mov_rr(&mut self.buf, sp, fp);
                x86_64::pop(&mut self.buf, fp);
                x86_64::ret(&mut self.buf);
            }
            Target::Arm64 => {
                arm64::mov_rr(&mut self.buf, sp, fp);
                arm64::ldp_post(&mut self.buf, fp, Gpr(30), sp, 16);
                arm64::ret(&mut self.buf);
            }
            Target::RiscV64 => {
                riscv64::mov_rr(&mut self.buf, sp, fp);
                riscv64::ld(&mut self.buf, fp, sp, 0);
                riscv64::ld(&mut self.buf, Gpr(1), sp, 8);
                riscv64::addi(&mut self.buf, sp, sp, 16);
                riscv64::ret(&mut self.buf);
            }
        }
    }

    /// Move the stack pointer by `delta`, splitting adjustments that
    /// exceed the immediate field of the target's add/sub forms.
    fn adjust_sp(&mut self, mut delta: i32) {
        let sp = self.target.abi().sp;
        const CHUNK: i32 = 2032;
        while delta != 0 {
            let step = delta.clamp(-CHUNK, CHUNK);
            self.add_ri(sp, sp, step);
            delta -= step;
        }
    }

    /// Push a register. ARM64/RISC-V keep 16-byte alignment with a full
    /// slot pair.
    pub fn push(&mut self, reg: Gpr) {
        let sp = self.target.abi().sp;
        match self.target {
            Target::X86_64 => x86_64::push(&mut self.buf, reg),
            Target::Arm64 => {
                arm64::sub_ri(&mut self.buf, sp, sp, 16);
                arm64::str(&mut self.buf, sp, 0, reg);
            }
            Target::RiscV64 => {
                riscv64::addi(&mut self.buf, sp, sp, -16);
                riscv64::sd(&mut self.buf, sp, 0, reg);
            }
        }
    }

    pub fn pop(&mut self, reg: Gpr) {
        let sp = self.target.abi().sp;
        match self.target {
            Target::X86_64 => x86_64::pop(&mut self.buf, reg),
            Target::Arm64 => {
                arm64::ldr(&mut self.buf, reg, sp, 0);
                arm64::add_ri(&mut self.buf, sp, sp, 16);
            }
            Target::RiscV64 => {
                riscv64::ld(&mut self.buf, reg, sp, 0);
                riscv64::addi(&mut self.buf, sp, sp, 16);
            }
        }
    }

    pub fn push_f(&mut self, reg: Fpr) {
        let sp = self.target.abi().sp;
        match self.target {
            Target::X86_64 => {
                x86_64::sub_ri(&mut self.buf, sp, 8);
                x86_64::movsd_store(&mut self.buf, sp, 0, reg);
            }
            Target::Arm64 => {
                arm64::sub_ri(&mut self.buf, sp, sp, 16);
                arm64::fstr(&mut self.buf, sp, 0, reg);
            }
            Target::RiscV64 => {
                riscv64::addi(&mut self.buf, sp, sp, -16);
                riscv64::fsd(&mut self.buf, sp, 0, reg);
            }
        }
    }

    pub fn pop_f(&mut self, reg: Fpr) {
        let sp = self.target.abi().sp;
        match self.target {
            Target::X86_64 => {
                x86_64::movsd_load(&mut self.buf, reg, sp, 0);
                x86_64::add_ri(&mut self.buf, sp, 8);
            }
            Target::Arm64 => {
                arm64::fldr(&mut self.buf, reg, sp, 0);
                arm64::add_ri(&mut self.buf, sp, sp, 16);
            }
            Target::RiscV64 => {
                riscv64::fld(&mut self.buf, reg, sp, 0);
                riscv64::addi(&mut self.buf, sp, sp, 16);
            }
        }
    }

    // ========================================================================
    // SIMD
    // ========================================================================

    pub fn vadd(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vaddpd(&mut self.buf, dst, a, b),
            Target::Arm64 => arm64::vfadd2d(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::vfadd(&mut self.buf, dst, a, b),
        }
    }

    pub fn vsub(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vsubpd(&mut self.buf, dst, a, b),
            Target::Arm64 => arm64::vfsub2d(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::vfsub(&mut self.buf, dst, a, b),
        }
    }

    pub fn vmul(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vmulpd(&mut self.buf, dst, a, b),
            Target::Arm64 => arm64::vfmul2d(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::vfmul(&mut self.buf, dst, a, b),
        }
    }

    pub fn vdiv(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vdivpd(&mut self.buf, dst, a, b),
            Target::Arm64 => arm64::vfdiv2d(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::vfdiv(&mut self.buf, dst, a, b),
        }
    }

    /// Element-wise absolute value. x86 needs the sign mask preloaded in
    /// `mask`; the others ignore it.
    pub fn vabs(&mut self, dst: Fpr, src: Fpr, mask: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vandpd(&mut self.buf, dst, src, mask),
            Target::Arm64 => arm64::vfabs2d(&mut self.buf, dst, src),
            Target::RiscV64 => riscv64::vfabs(&mut self.buf, dst, src),
        }
    }

    /// Blend/select lanes of a and b.
    pub fn vblend(&mut self, dst: Fpr, a: Fpr, b: Fpr, sel: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vblendvpd(&mut self.buf, dst, a, b, sel),
            Target::Arm64 => arm64::vbsl(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::vmerge(&mut self.buf, dst, a, b),
        }
    }

    /// Masked lane move (the EVEX consumer on x86).
    pub fn vmaskmove(&mut self, dst: Fpr, src: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vmovupd_masked(&mut self.buf, dst, src),
            Target::Arm64 => arm64::vbsl(&mut self.buf, dst, src, dst),
            Target::RiscV64 => riscv64::vmerge(&mut self.buf, dst, src, dst),
        }
    }

    /// Horizontal add.
    pub fn vhadd(&mut self, dst: Fpr, a: Fpr, b: Fpr) {
        match self.target {
            Target::X86_64 => x86_64::vhaddpd(&mut self.buf, dst, a, b),
            Target::Arm64 => arm64::vfaddp2d(&mut self.buf, dst, a, b),
            Target::RiscV64 => riscv64::vfredosum(&mut self.buf, dst, a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_emits_for_all_targets() {
        for target in [Target::X86_64, Target::Arm64, Target::RiscV64] {
            let mut asm = Asm::new(target);
            let abi = target.abi();
            asm.mov_ri(abi.ret, 42);
            asm.ret();
            assert!(!asm.buf.bytes().is_empty(), "{target}");
        }
    }

    #[test]
    fn test_branch_fixup_all_targets() {
        for target in [Target::X86_64, Target::Arm64, Target::RiscV64] {
            let mut asm = Asm::new(target);
            let abi = target.abi();
            let fix = asm.branch_if_zero(abi.ret);
            asm.mov_ri(abi.ret, 1);
            asm.bind(fix);
            asm.ret();
            assert!(!asm.buf.bytes().is_empty());
        }
    }

    #[test]
    fn test_call_symbol_records_patch() {
        for target in [Target::X86_64, Target::Arm64, Target::RiscV64] {
            let mut asm = Asm::new(target);
            asm.call_symbol("helper", false);
            assert_eq!(asm.buf.patches().len(), 1, "{target}");
            asm.call_symbol("printf", true);
            assert_eq!(asm.buf.patches().len(), 2);
            assert_eq!(asm.buf.patches()[1].kind, PatchKind::PltCall);
        }
    }

    #[test]
    fn test_lea_symbol_kinds() {
        let mut asm = Asm::new(Target::X86_64);
        asm.lea_symbol(Gpr(7), "rodata_sym");
        assert_eq!(asm.buf.patches()[0].kind, PatchKind::PcRel32);

        let mut asm = Asm::new(Target::Arm64);
        asm.lea_symbol(Gpr(0), "rodata_sym");
        assert_eq!(asm.buf.patches()[0].kind, PatchKind::AdrpAddLo12);

        let mut asm = Asm::new(Target::RiscV64);
        asm.lea_symbol(Gpr(10), "rodata_sym");
        assert_eq!(asm.buf.patches()[0].kind, PatchKind::AuipcAddi);
    }
}
