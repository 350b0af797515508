//! Stack-based register reservation.
//!
//! The walker acquires scratch registers for intermediate subexpression
//! values and releases them as subtrees complete. Everything that must
//! survive a statement lives in a frame slot, so the pools only carry
//! short-lived values.
//!
//! The one invariant that matters: every register holding a live value
//! is known to the tracker, so a nested call site can save and restore
//! ALL of them unconditionally. (The historical register-corruption bug
//! was exactly a nested recursive call clobbering an argument register
//! that held the outer call's first argument.)

use velo_isa::{Abi, Fpr, Gpr};

/// Reservation tracker for one function body.
#[derive(Debug)]
pub struct RegAlloc {
    free_gprs: Vec<Gpr>,
    free_fprs: Vec<Fpr>,
    live_gprs: Vec<Gpr>,
    live_fprs: Vec<Fpr>,
}

impl RegAlloc {
    pub fn new(abi: &Abi) -> Self {
        // Scratch pools in reverse so acquisition order matches the ABI
        // listing order.
        let mut free_gprs: Vec<Gpr> = abi.scratch.to_vec();
        free_gprs.reverse();
        let mut free_fprs: Vec<Fpr> = abi.float_scratch.to_vec();
        free_fprs.reverse();
        Self {
            free_gprs,
            free_fprs,
            live_gprs: Vec::new(),
            live_fprs: Vec::new(),
        }
    }

    pub fn acquire_gpr(&mut self) -> Option<Gpr> {
        let reg = self.free_gprs.pop()?;
        self.live_gprs.push(reg);
        Some(reg)
    }

    pub fn acquire_fpr(&mut self) -> Option<Fpr> {
        let reg = self.free_fprs.pop()?;
        self.live_fprs.push(reg);
        Some(reg)
    }

    pub fn release_gpr(&mut self, reg: Gpr) {
        if let Some(pos) = self.live_gprs.iter().position(|r| *r == reg) {
            self.live_gprs.remove(pos);
            self.free_gprs.push(reg);
        }
    }

    pub fn release_fpr(&mut self, reg: Fpr) {
        if let Some(pos) = self.live_fprs.iter().position(|r| *r == reg) {
            self.live_fprs.remove(pos);
            self.free_fprs.push(reg);
        }
    }

    /// All registers currently holding live values, for the
    /// save-everything-across-calls rule.
    pub fn live(&self) -> (Vec<Gpr>, Vec<Fpr>) {
        (self.live_gprs.clone(), self.live_fprs.clone())
    }

    pub fn live_count(&self) -> usize {
        self.live_gprs.len() + self.live_fprs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_isa::Target;

    #[test]
    fn test_acquire_release_cycle() {
        let abi = Target::X86_64.abi();
        let mut ra = RegAlloc::new(abi);
        let a = ra.acquire_fpr().unwrap();
        let b = ra.acquire_fpr().unwrap();
        assert_ne!(a, b);
        assert_eq!(ra.live().1.len(), 2);
        ra.release_fpr(a);
        assert_eq!(ra.live().1.len(), 1);
        let c = ra.acquire_fpr().unwrap();
        assert_eq!(a, c, "released register is reused");
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let abi = Target::X86_64.abi();
        let mut ra = RegAlloc::new(abi);
        while ra.acquire_gpr().is_some() {}
        assert!(ra.acquire_gpr().is_none());
    }
}
