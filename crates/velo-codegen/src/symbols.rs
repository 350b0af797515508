//! Label tables, rodata/data pools and the external-symbol set.

use rustc_hash::{FxHashMap, FxHashSet};

/// Which section a label points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Text,
    Rodata,
    Data,
}

/// A resolved symbol: section + offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolDef {
    pub section: Section,
    pub offset: usize,
}

/// Owns the rodata/data buffers, the label table, and the set of
/// symbols that must come from the dynamic loader.
#[derive(Debug, Default)]
pub struct SymbolTable {
    labels: FxHashMap<String, SymbolDef>,
    pub rodata: Vec<u8>,
    pub data: Vec<u8>,
    /// Imported functions, in first-use order (stable PLT layout).
    pub externs: Vec<String>,
    extern_set: FxHashSet<String>,
    /// Interned string literals → rodata label.
    strings: FxHashMap<String, String>,
    next_string: usize,
    next_slot: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to an offset in `section`.
    pub fn define(&mut self, name: &str, section: Section, offset: usize) {
        self.labels
            .insert(name.to_string(), SymbolDef { section, offset });
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolDef> {
        self.labels.get(name).copied()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn labels(&self) -> &FxHashMap<String, SymbolDef> {
        &self.labels
    }

    /// Record an external function; duplicates collapse to one entry so
    /// qualified and unqualified uses share one import slot.
    pub fn require_extern(&mut self, name: &str) {
        if self.extern_set.insert(name.to_string()) {
            self.externs.push(name.to_string());
        }
    }

    pub fn is_extern(&self, name: &str) -> bool {
        self.extern_set.contains(name)
    }

    // ===== rodata =====

    /// Intern a string literal in rodata as [len u64][bytes], returning
    /// its label. Identical literals share one entry.
    pub fn intern_string(&mut self, value: &str) -> String {
        if let Some(label) = self.strings.get(value) {
            return label.clone();
        }
        let label = format!("__str_{}", self.next_string);
        self.next_string += 1;

        let offset = self.rodata.len();
        self.rodata
            .extend_from_slice(&(value.len() as u64).to_le_bytes());
        self.rodata.extend_from_slice(value.as_bytes());
        // Trailing NUL so the byte region doubles as a C string for FFI
        self.rodata.push(0);
        // Keep later entries 8-aligned
        while self.rodata.len() % 8 != 0 {
            self.rodata.push(0);
        }

        self.define(&label, Section::Rodata, offset);
        self.strings.insert(value.to_string(), label.clone());
        label
    }

    /// Append raw bytes to rodata under a fresh label.
    pub fn rodata_blob(&mut self, label: &str, bytes: &[u8]) {
        let offset = self.rodata.len();
        self.rodata.extend_from_slice(bytes);
        while self.rodata.len() % 8 != 0 {
            self.rodata.push(0);
        }
        self.define(label, Section::Rodata, offset);
    }

    // ===== data =====

    /// Reserve one zero-initialised 8-byte slot in .data.
    pub fn data_slot(&mut self, label: &str) {
        let offset = self.data.len();
        self.data.extend_from_slice(&0u64.to_le_bytes());
        self.define(label, Section::Data, offset);
    }

    /// Reserve `bytes` zeroed bytes in .data.
    pub fn data_area(&mut self, label: &str, bytes: usize) {
        let offset = self.data.len();
        self.data.resize(offset + bytes.next_multiple_of(8), 0);
        self.define(label, Section::Data, offset);
    }

    /// A fresh anonymous .data slot (recursion-cap counters).
    pub fn fresh_slot(&mut self, prefix: &str) -> String {
        let label = format!("__{prefix}_{}", self.next_slot);
        self.next_slot += 1;
        self.data_slot(&label);
        label
    }

    /// Consume the table into the pieces the writer needs.
    pub fn into_parts(
        self,
    ) -> (
        FxHashMap<String, SymbolDef>,
        Vec<u8>,
        Vec<u8>,
        Vec<String>,
    ) {
        (self.labels, self.rodata, self.data, self.externs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_interning_dedups() {
        let mut syms = SymbolTable::new();
        let a = syms.intern_string("hello");
        let b = syms.intern_string("hello");
        assert_eq!(a, b);
        // [len][bytes] layout, 8-aligned
        assert_eq!(&syms.rodata[0..8], &5u64.to_le_bytes());
        assert_eq!(&syms.rodata[8..13], b"hello");
        assert_eq!(syms.rodata.len() % 8, 0);
    }

    #[test]
    fn test_extern_dedup_keeps_order() {
        let mut syms = SymbolTable::new();
        syms.require_extern("SDL_Init");
        syms.require_extern("puts");
        syms.require_extern("SDL_Init");
        assert_eq!(syms.externs, vec!["SDL_Init".to_string(), "puts".to_string()]);
    }

    #[test]
    fn test_data_slots() {
        let mut syms = SymbolTable::new();
        syms.data_slot("a");
        syms.data_slot("b");
        assert_eq!(syms.lookup("b").unwrap().offset, 8);
        assert_eq!(syms.data.len(), 16);
    }
}
