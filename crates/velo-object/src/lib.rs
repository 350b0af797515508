//! Executable writers: ELF64 (non-PIE and PIE with full dynamic
//! linking: PT_INTERP, PLT/GOT, .dynamic) and PE64 (import descriptor
//! table + IAT). The writer borrows the code generator's buffers,
//! computes the final layout, applies every recorded patch, and
//! guarantees no placeholder byte sequence survives into the file.

pub mod compress;
pub mod elf;
pub mod layout;
pub mod pe;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("unresolved symbol `{0}`")]
    UnresolvedSymbol(String),

    #[error("placeholder displacement survived at text offset {0:#x}")]
    PlaceholderSurvived(usize),

    #[error("{0} is not supported for this output format")]
    Unsupported(&'static str),
}

/// Final sanity pass: the `0xDEADBEEF` sentinel must not appear
/// anywhere in the written image.
pub fn verify_no_placeholders(image: &[u8]) -> Result<(), ObjectError> {
    let needle = velo_isa::PLACEHOLDER32.to_le_bytes();
    if let Some(pos) = image.windows(4).position(|w| w == needle) {
        return Err(ObjectError::PlaceholderSurvived(pos));
    }
    Ok(())
}
