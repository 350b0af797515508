//! Single-pass AST to machine code generation for Velo.
//!
//! There is no IR: the generator walks the analysed AST once per
//! function and emits instruction bytes through [`velo_isa::Asm`],
//! recording call patches and PC-relocations for everything whose final
//! address is unknown until the executable writer fixes the layout.
//!
//! ```text
//! Module → CodeGenerator ─┬─ text   (machine code + runtime blob)
//!                         ├─ rodata (string literals, masks)
//!                         ├─ data   (globals, counters, arena state)
//!                         ├─ patches + labels + externs
//!                         └─ flags  (uses_arenas / uses_fma / ...)
//! ```

pub mod codegen;
pub mod error;
pub mod regalloc;
pub mod runtime;
pub mod symbols;

pub use codegen::CodeGenerator;
pub use error::{CompileError, CompileResult};

use rustc_hash::FxHashMap;
use symbols::SymbolDef;
use velo_isa::{Os, Patch, Target};
use velo_parser::Module;

/// Options the driver hands the generator.
#[derive(Debug, Clone, Copy)]
pub struct CodegenOptions {
    pub target: Target,
    pub os: Os,
    /// Position-independent output (ELF ET_DYN).
    pub pie: bool,
    /// Mnemonic trace to stderr.
    pub verbose: bool,
}

/// Feature flags observed during generation; the executable writer uses
/// them to decide what runtime scaffolding the entry stub needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenFlags {
    pub uses_arenas: bool,
    pub uses_fma: bool,
    pub uses_simd: bool,
    pub use_dynamic_linking: bool,
}

/// Everything the executable writer needs.
#[derive(Debug)]
pub struct CodegenOutput {
    pub text: Vec<u8>,
    pub rodata: Vec<u8>,
    pub data: Vec<u8>,
    pub patches: Vec<Patch>,
    pub labels: FxHashMap<String, SymbolDef>,
    pub externs: Vec<String>,
    /// Offset of the runtime entry stub in `text`.
    pub entry: usize,
    pub flags: GenFlags,
}

/// Generate machine code for a whole module.
pub fn generate(module: &Module, opts: &CodegenOptions) -> CompileResult<CodegenOutput> {
    let generator = CodeGenerator::new(module, *opts);
    generator.generate()
}
