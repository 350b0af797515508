//! Byte-level instruction encoders for the Velo native backend.
//!
//! Three instruction sets share one operation surface: the code
//! generator talks to [`Asm`], which dispatches on the current target
//! and emits byte-exact machine code into a [`CodeBuffer`]: REX/VEX/
//! EVEX-prefixed variable-length instructions on x86-64, little-endian
//! 32-bit words on ARM64 and RISC-V64.
//!
//! Symbol-referring instructions emit a recognisable placeholder
//! (`0xDEADBEEF`) and append a patch record; the executable writer
//! resolves all patches once the final layout is known.

pub mod arm64;
pub mod buffer;
pub mod dispatch;
pub mod patch;
pub mod riscv64;
pub mod target;
pub mod x86_64;

pub use buffer::CodeBuffer;
pub use dispatch::{Asm, BranchFixup, Cond};
pub use patch::{Patch, PatchKind, PLACEHOLDER32};
pub use target::{Abi, Fpr, Gpr, Os, Target};
