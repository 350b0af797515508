//! Per-instruction round-trip tests: emitted bytes must equal fixed
//! expected sequences for every documented encoder entry point.

use velo_isa::{arm64, riscv64, x86_64};
use velo_isa::{CodeBuffer, Fpr, Gpr, PatchKind, PLACEHOLDER32};

fn emit(f: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
    let mut buf = CodeBuffer::new();
    f(&mut buf);
    buf.into_bytes()
}

fn emit_word(f: impl FnOnce(&mut CodeBuffer)) -> u32 {
    let bytes = emit(f);
    assert_eq!(bytes.len(), 4);
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

// ============================================================================
// x86-64
// ============================================================================

#[test]
fn x86_cmp_rax_rbx() {
    assert_eq!(
        emit(|b| x86_64::cmp_rr(b, Gpr(0), Gpr(3))),
        [0x48, 0x39, 0xD8]
    );
}

#[test]
fn x86_cmp_rax_imm8() {
    assert_eq!(
        emit(|b| x86_64::cmp_ri(b, Gpr(0), 10)),
        [0x48, 0x83, 0xF8, 0x0A]
    );
}

#[test]
fn x86_cmp_rax_imm32() {
    assert_eq!(
        emit(|b| x86_64::cmp_ri(b, Gpr(0), 1000)),
        [0x48, 0x81, 0xF8, 0xE8, 0x03, 0x00, 0x00]
    );
}

#[test]
fn x86_lea_rip_symbol_pie() {
    let mut buf = CodeBuffer::new();
    x86_64::lea_symbol(&mut buf, Gpr(7), "sym", PatchKind::PcRel32);
    assert_eq!(&buf.bytes()[..3], &[0x48, 0x8D, 0x3D]);
    assert_eq!(buf.read_u32_at(3), PLACEHOLDER32);
    let patches = buf.patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].symbol, "sym");
    assert_eq!(patches[0].kind, PatchKind::PcRel32);
}

#[test]
fn x86_call_placeholder_survives_until_patch() {
    let mut buf = CodeBuffer::new();
    x86_64::call_symbol(&mut buf, "factorial", PatchKind::CallRel32);
    assert_eq!(buf.bytes()[0], 0xE8);
    assert_eq!(buf.read_u32_at(1), PLACEHOLDER32);
}

// ============================================================================
// ARM64
// ============================================================================

#[test]
fn arm64_cmp_x0_x1_bit_fields() {
    let w = emit_word(|b| arm64::cmp_rr(b, Gpr(0), Gpr(1)));
    assert_eq!(w >> 21, 0b111_0101_1000, "opcode bits [31:21]");
    assert_eq!((w >> 16) & 0x1F, 1, "Rm");
    assert_eq!((w >> 5) & 0x1F, 0, "Rn");
    assert_eq!(w & 0x1F, 31, "Rd = XZR");
}

#[test]
fn arm64_cmp_x0_imm42() {
    let w = emit_word(|b| arm64::cmp_ri(b, Gpr(0), 42));
    assert_eq!((w >> 10) & 0xFFF, 42, "imm12");
    assert_eq!(w & 0x1F, 31, "Rd = XZR");
}

#[test]
fn arm64_symbol_load_is_adrp_pattern() {
    let mut buf = CodeBuffer::new();
    arm64::adrp_add_symbol(&mut buf, Gpr(5), "table");
    let w = buf.read_u32_at(0);
    assert_eq!(w & 0x9F00_0000, 0x9000_0000, "ADRP opcode pattern");
    assert_eq!(w & 0x1F, 5, "Rd = dst");
    // ADRP/ADD pair shares a single patch record
    assert_eq!(buf.bytes().len(), 8);
    assert_eq!(buf.patches().len(), 1);
    assert_eq!(buf.patches()[0].kind, PatchKind::AdrpAddLo12);
}

// ============================================================================
// RISC-V64
// ============================================================================

#[test]
fn riscv_sub_t0_a0_a1_fields() {
    let w = emit_word(|b| riscv64::sub(b, Gpr(5), Gpr(10), Gpr(11)));
    assert_eq!(w & 0x7F, 0x33, "opcode");
    assert_eq!((w >> 12) & 0x7, 0b000, "funct3");
    assert_eq!(w >> 25, 0x20, "funct7");
    assert_eq!((w >> 15) & 0x1F, 10, "rs1 = a0");
    assert_eq!((w >> 20) & 0x1F, 11, "rs2 = a1");
    assert_eq!((w >> 7) & 0x1F, 5, "rd = t0");
}

#[test]
fn riscv_symbol_load_is_auipc() {
    let mut buf = CodeBuffer::new();
    riscv64::auipc_addi_symbol(&mut buf, Gpr(10), "table");
    let w = buf.read_u32_at(0);
    assert_eq!(w & 0x7F, 0x17, "AUIPC opcode");
    assert_eq!((w >> 7) & 0x1F, 10, "rd set");
    // AUIPC/ADDI pair shares a single patch record
    assert_eq!(buf.bytes().len(), 8);
    assert_eq!(buf.patches().len(), 1);
    assert_eq!(buf.patches()[0].kind, PatchKind::AuipcAddi);
}

#[test]
fn riscv_words_are_little_endian() {
    let bytes = emit(riscv64::ecall);
    assert_eq!(bytes, [0x73, 0x00, 0x00, 0x00]);
}

// ============================================================================
// Verbose mode must not alter emitted bytes
// ============================================================================

#[test]
fn verbose_mode_emits_identical_bytes() {
    let quiet = emit(|b| {
        x86_64::cmp_rr(b, Gpr(0), Gpr(3));
        x86_64::ret(b);
    });
    let mut buf = CodeBuffer::new();
    buf.set_verbose(true);
    x86_64::cmp_rr(&mut buf, Gpr(0), Gpr(3));
    x86_64::ret(&mut buf);
    assert_eq!(quiet, buf.into_bytes());
}
