//! Little-endian code buffer with patch recording and the verbose
//! mnemonic trace.

use crate::patch::{Patch, PatchKind};

/// Byte buffer the encoders emit into.
///
/// Verbose mode writes a textual mnemonic to stderr beside each
/// emission for debugging; it never alters the emitted bytes.
pub struct CodeBuffer {
    buffer: Vec<u8>,
    patches: Vec<Patch>,
    verbose: bool,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            patches: Vec::new(),
            verbose: false,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            patches: Vec::new(),
            verbose: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Current offset (length of emitted code).
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn take_patches(&mut self) -> Vec<Patch> {
        std::mem::take(&mut self.patches)
    }

    // ===== Basic emission =====

    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    // ===== In-place patching =====

    pub fn read_u32_at(&self, offset: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.buffer[offset..offset + 4]);
        u32::from_le_bytes(b)
    }

    pub fn patch_u32_at(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn patch_u64_at(&mut self, offset: usize, value: u64) {
        self.buffer[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    // ===== Patch records =====

    /// Record a pending fixup for `symbol` at `offset`.
    pub fn add_patch(&mut self, offset: usize, symbol: &str, kind: PatchKind) {
        self.patches.push(Patch::new(offset, symbol, kind));
    }

    // ===== Verbose trace =====

    /// Write a mnemonic beside the current offset when verbose.
    pub fn note(&self, mnemonic: &str) {
        if self.verbose {
            eprintln!("{:8x}  {mnemonic}", self.buffer.len());
        }
    }

    pub fn note_args(&self, mnemonic: &str, args: std::fmt::Arguments<'_>) {
        if self.verbose {
            eprintln!("{:8x}  {mnemonic} {args}", self.buffer.len());
        }
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_emission() {
        let mut buf = CodeBuffer::new();
        buf.emit_u32(0x1122_3344);
        assert_eq!(buf.bytes(), &[0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_patch_in_place() {
        let mut buf = CodeBuffer::new();
        buf.emit_u32(crate::patch::PLACEHOLDER32);
        buf.patch_u32_at(0, 0x10);
        assert_eq!(buf.read_u32_at(0), 0x10);
    }

    #[test]
    fn test_patch_records() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0xE8);
        let at = buf.offset();
        buf.emit_u32(crate::patch::PLACEHOLDER32);
        buf.add_patch(at, "target", PatchKind::CallRel32);
        assert_eq!(buf.patches().len(), 1);
        assert_eq!(buf.patches()[0].offset, 1);
    }
}
