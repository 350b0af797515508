//! Compilation targets and their ABI register models.
//!
//! Registers are carried as native encoding numbers wrapped in [`Gpr`]
//! (general purpose) and [`Fpr`] (floating point / SIMD). The per-target
//! [`Abi`] tables declare which numbers serve as argument, scratch and
//! callee-saved registers, so the register allocator never hard-codes a
//! platform.

use serde::Serialize;
use std::fmt;

/// Instruction set architecture being compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Target {
    X86_64,
    Arm64,
    RiscV64,
}

impl Target {
    /// ELF `e_machine` value.
    pub fn elf_machine(&self) -> u16 {
        match self {
            Target::X86_64 => 62,
            Target::Arm64 => 183,
            Target::RiscV64 => 243,
        }
    }

    /// Path of the dynamic linker on Linux.
    pub fn interp_path(&self) -> &'static str {
        match self {
            Target::X86_64 => "/lib64/ld-linux-x86-64.so.2",
            Target::Arm64 => "/lib/ld-linux-aarch64.so.1",
            Target::RiscV64 => "/lib/ld-linux-riscv64-lp64d.so.1",
        }
    }

    /// Linux syscall numbers differ per ISA; these are the ones the
    /// runtime blob needs.
    pub fn sys_write(&self) -> i64 {
        match self {
            Target::X86_64 => 1,
            Target::Arm64 | Target::RiscV64 => 64,
        }
    }

    pub fn sys_exit(&self) -> i64 {
        match self {
            Target::X86_64 => 60,
            Target::Arm64 | Target::RiscV64 => 93,
        }
    }

    pub fn sys_clone(&self) -> i64 {
        match self {
            Target::X86_64 => 56,
            Target::Arm64 | Target::RiscV64 => 220,
        }
    }

    pub fn sys_wait4(&self) -> i64 {
        match self {
            Target::X86_64 => 61,
            Target::Arm64 | Target::RiscV64 => 260,
        }
    }

    pub fn sys_mmap(&self) -> i64 {
        match self {
            Target::X86_64 => 9,
            Target::Arm64 | Target::RiscV64 => 222,
        }
    }

    pub fn sys_munmap(&self) -> i64 {
        match self {
            Target::X86_64 => 11,
            Target::Arm64 | Target::RiscV64 => 215,
        }
    }

    pub fn sys_read(&self) -> i64 {
        match self {
            Target::X86_64 => 0,
            Target::Arm64 | Target::RiscV64 => 63,
        }
    }

    pub fn sys_socket(&self) -> i64 {
        match self {
            Target::X86_64 => 41,
            Target::Arm64 | Target::RiscV64 => 198,
        }
    }

    pub fn sys_bind(&self) -> i64 {
        match self {
            Target::X86_64 => 49,
            Target::Arm64 | Target::RiscV64 => 200,
        }
    }

    pub fn sys_connect(&self) -> i64 {
        match self {
            Target::X86_64 => 42,
            Target::Arm64 | Target::RiscV64 => 203,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::X86_64 => write!(f, "x86_64"),
            Target::Arm64 => write!(f, "arm64"),
            Target::RiscV64 => write!(f, "riscv64"),
        }
    }
}

/// Output operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Os {
    Linux,
    Windows,
}

/// A general-purpose register in the target's native numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Gpr(pub u8);

/// A floating-point / SIMD register in the target's native numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Fpr(pub u8);

/// The per-target ABI register model the allocator works from.
#[derive(Debug, Clone)]
pub struct Abi {
    /// Integer argument registers, in order.
    pub int_args: &'static [Gpr],
    /// Float argument registers, in order.
    pub float_args: &'static [Fpr],
    /// Caller-saved scratch registers free for intermediates.
    pub scratch: &'static [Gpr],
    /// Float scratch registers.
    pub float_scratch: &'static [Fpr],
    /// Callee-saved registers for bindings that outlive a subexpression.
    pub callee_saved: &'static [Gpr],
    /// Stack pointer.
    pub sp: Gpr,
    /// Frame pointer.
    pub fp: Gpr,
    /// Integer return register.
    pub ret: Gpr,
    /// Float return register.
    pub fret: Fpr,
    /// Syscall number register.
    pub sysno: Gpr,
    /// Syscall argument registers, in order.
    pub sys_args: &'static [Gpr],
}

// x86-64 SysV: rdi rsi rdx rcx r8 r9; xmm0-7; rax/r10/r11 scratch;
// rbx r12-r15 callee-saved.
const X86_ABI: Abi = Abi {
    int_args: &[Gpr(7), Gpr(6), Gpr(2), Gpr(1), Gpr(8), Gpr(9)],
    float_args: &[Fpr(0), Fpr(1), Fpr(2), Fpr(3), Fpr(4), Fpr(5), Fpr(6), Fpr(7)],
    scratch: &[Gpr(0), Gpr(10), Gpr(11)],
    float_scratch: &[Fpr(8), Fpr(9), Fpr(10), Fpr(11), Fpr(12), Fpr(13)],
    callee_saved: &[Gpr(3), Gpr(12), Gpr(13), Gpr(14), Gpr(15)],
    sp: Gpr(4),
    fp: Gpr(5),
    ret: Gpr(0),
    fret: Fpr(0),
    sysno: Gpr(0),
    sys_args: &[Gpr(7), Gpr(6), Gpr(2), Gpr(10), Gpr(8), Gpr(9)],
};

// AArch64 AAPCS64: x0-x7 args; d0-d7; x9-x15 scratch; x19-x28 callee-
// saved; x8 is the indirect result register, left free as scratch.
const ARM64_ABI: Abi = Abi {
    int_args: &[Gpr(0), Gpr(1), Gpr(2), Gpr(3), Gpr(4), Gpr(5), Gpr(6), Gpr(7)],
    float_args: &[Fpr(0), Fpr(1), Fpr(2), Fpr(3), Fpr(4), Fpr(5), Fpr(6), Fpr(7)],
    scratch: &[Gpr(9), Gpr(10), Gpr(11), Gpr(12), Gpr(13)],
    float_scratch: &[Fpr(16), Fpr(17), Fpr(18), Fpr(19), Fpr(20), Fpr(21)],
    callee_saved: &[Gpr(19), Gpr(20), Gpr(21), Gpr(22), Gpr(23), Gpr(24)],
    sp: Gpr(31),
    fp: Gpr(29),
    ret: Gpr(0),
    fret: Fpr(0),
    sysno: Gpr(8),
    sys_args: &[Gpr(0), Gpr(1), Gpr(2), Gpr(3), Gpr(4), Gpr(5)],
};

// RV64 LP64D: a0-a7 args; fa0-fa7; t0-t6 scratch; s1-s11 callee-saved.
const RISCV_ABI: Abi = Abi {
    int_args: &[Gpr(10), Gpr(11), Gpr(12), Gpr(13), Gpr(14), Gpr(15), Gpr(16), Gpr(17)],
    float_args: &[Fpr(10), Fpr(11), Fpr(12), Fpr(13), Fpr(14), Fpr(15), Fpr(16), Fpr(17)],
    scratch: &[Gpr(5), Gpr(6), Gpr(7), Gpr(28), Gpr(29)],
    float_scratch: &[Fpr(0), Fpr(1), Fpr(2), Fpr(3), Fpr(4), Fpr(5)],
    callee_saved: &[Gpr(9), Gpr(18), Gpr(19), Gpr(20), Gpr(21), Gpr(22)],
    sp: Gpr(2),
    fp: Gpr(8),
    ret: Gpr(10),
    fret: Fpr(10),
    sysno: Gpr(17),
    sys_args: &[Gpr(10), Gpr(11), Gpr(12), Gpr(13), Gpr(14), Gpr(15)],
};

// Win64: rcx rdx r8 r9; xmm0-3; rax/r10/r11 scratch; rbx r12-r15
// callee-saved. Syscall fields are unused on Windows.
const WIN64_ABI: Abi = Abi {
    int_args: &[Gpr(1), Gpr(2), Gpr(8), Gpr(9)],
    float_args: &[Fpr(0), Fpr(1), Fpr(2), Fpr(3)],
    scratch: &[Gpr(0), Gpr(10), Gpr(11)],
    float_scratch: &[Fpr(4), Fpr(5), Fpr(6), Fpr(7), Fpr(8), Fpr(9)],
    callee_saved: &[Gpr(3), Gpr(12), Gpr(13), Gpr(14), Gpr(15)],
    sp: Gpr(4),
    fp: Gpr(5),
    ret: Gpr(0),
    fret: Fpr(0),
    sysno: Gpr(0),
    sys_args: &[Gpr(1), Gpr(2), Gpr(8), Gpr(9)],
};

impl Target {
    pub fn abi(&self) -> &'static Abi {
        match self {
            Target::X86_64 => &X86_ABI,
            Target::Arm64 => &ARM64_ABI,
            Target::RiscV64 => &RISCV_ABI,
        }
    }

    /// ABI selection honouring the output OS (Win64 differs on x86-64).
    pub fn abi_os(&self, os: Os) -> &'static Abi {
        match (self, os) {
            (Target::X86_64, Os::Windows) => &WIN64_ABI,
            _ => self.abi(),
        }
    }

    /// Register name for the verbose mnemonic trace.
    pub fn gpr_name(&self, reg: Gpr) -> String {
        match self {
            Target::X86_64 => {
                const NAMES: [&str; 16] = [
                    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10",
                    "r11", "r12", "r13", "r14", "r15",
                ];
                NAMES.get(reg.0 as usize).unwrap_or(&"r?").to_string()
            }
            Target::Arm64 => {
                if reg.0 == 31 {
                    "sp".to_string()
                } else {
                    format!("x{}", reg.0)
                }
            }
            Target::RiscV64 => {
                const NAMES: [&str; 32] = [
                    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1",
                    "a2", "a3", "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8",
                    "s9", "s10", "s11", "t3", "t4", "t5", "t6",
                ];
                NAMES.get(reg.0 as usize).unwrap_or(&"x?").to_string()
            }
        }
    }

    /// Parse an unsafe-block register name for this target.
    pub fn parse_gpr(&self, name: &str) -> Option<Gpr> {
        match self {
            Target::X86_64 => {
                const NAMES: [&str; 16] = [
                    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10",
                    "r11", "r12", "r13", "r14", "r15",
                ];
                NAMES.iter().position(|n| *n == name).map(|i| Gpr(i as u8))
            }
            Target::Arm64 => {
                if name == "sp" {
                    return Some(Gpr(31));
                }
                name.strip_prefix('x')
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|n| *n < 31)
                    .map(Gpr)
            }
            Target::RiscV64 => {
                const NAMES: [&str; 32] = [
                    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1",
                    "a2", "a3", "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8",
                    "s9", "s10", "s11", "t3", "t4", "t5", "t6",
                ];
                NAMES.iter().position(|n| *n == name).map(|i| Gpr(i as u8))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elf_machine_numbers() {
        assert_eq!(Target::X86_64.elf_machine(), 62);
        assert_eq!(Target::Arm64.elf_machine(), 183);
        assert_eq!(Target::RiscV64.elf_machine(), 243);
    }

    #[test]
    fn test_register_name_roundtrip() {
        for t in [Target::X86_64, Target::Arm64, Target::RiscV64] {
            let abi = t.abi();
            for r in abi.int_args {
                let name = t.gpr_name(*r);
                assert_eq!(t.parse_gpr(&name), Some(*r), "{t} {name}");
            }
        }
    }

    #[test]
    fn test_x86_argument_order() {
        let abi = Target::X86_64.abi();
        // rdi, rsi, rdx, rcx
        assert_eq!(abi.int_args[0], Gpr(7));
        assert_eq!(abi.int_args[1], Gpr(6));
        assert_eq!(abi.int_args[2], Gpr(2));
        assert_eq!(abi.int_args[3], Gpr(1));
    }
}
