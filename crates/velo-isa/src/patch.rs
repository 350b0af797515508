//! Relocation/patch records.
//!
//! Every code-generation site that emits an address-dependent
//! instruction before the final layout is known records a patch. The
//! displacement bytes it leaves behind are a recognisable sentinel; the
//! executable writer asserts none survive into the output file.

use serde::Serialize;

/// Sentinel written where a 32-bit displacement belongs.
pub const PLACEHOLDER32: u32 = 0xDEAD_BEEF;

/// How the patched instruction encodes its target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatchKind {
    /// x86-64 RIP-relative disp32 (lea/mov with ModRM mod=00 rm=101).
    PcRel32,
    /// x86-64 call rel32 to a local symbol.
    CallRel32,
    /// Call through a PLT/IAT slot.
    PltCall,
    /// ARM64 ADRP page + ADD lo12 pair sharing one record.
    AdrpAddLo12,
    /// RISC-V AUIPC + ADDI pair sharing one record.
    AuipcAddi,
    /// ARM64 BL imm26.
    Bl26,
    /// RISC-V JAL imm20.
    Jal20,
    /// Absolute 64-bit address (data initialisers).
    Abs64,
}

/// A pending address fixup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patch {
    /// Offset of the displacement (or of the first instruction of an
    /// ADRP/AUIPC pair) in the text buffer.
    pub offset: usize,
    /// Target symbol name.
    pub symbol: String,
    pub kind: PatchKind,
}

impl Patch {
    pub fn new(offset: usize, symbol: impl Into<String>, kind: PatchKind) -> Self {
        Self {
            offset,
            symbol: symbol.into(),
            kind,
        }
    }
}
