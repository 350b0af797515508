//! The embedded runtime blob.
//!
//! Everything a compiled program needs beyond its own code is emitted
//! here as machine code through the same [`velo_isa::Asm`] surface the
//! generator uses: there is no libc. The blob comprises:
//!
//! - the meta-arena (an array of arena-struct pointers) and the arena
//!   allocator (`{base, capacity, used, alignment}` structs, bump
//!   allocation, growth by doubling),
//! - number/string formatting and the printf-via-write(2) path,
//! - string/list/map helpers,
//! - UDP-backed channel endpoints,
//! - the CPUID feature probe (x86-64, emitted only when SIMD/FMA is
//!   used) and the `_start` entry stub.
//!
//! Helpers follow the platform calling convention (arguments in the
//! integer/float argument registers, result in the return registers)
//! and save the callee-saved registers they use. Only helpers actually
//! referenced by generated code are emitted.

use crate::codegen::CodeGenerator;
use crate::error::{CompileError, CompileResult};
use crate::symbols::Section;
use rustc_hash::FxHashSet;
use velo_isa::{Cond, Gpr, Os, Target};

pub const ARENA_INIT: &str = "velo_arena_init";
pub const ARENA_PUSH: &str = "velo_arena_push";
pub const ARENA_POP: &str = "velo_arena_pop";
pub const ARENA_ALLOC: &str = "velo_arena_alloc";
pub const ARENA_SHUTDOWN: &str = "velo_arena_shutdown";
pub const FMT_NUM: &str = "velo_fmt_num";
pub const PRINT_NUM: &str = "velo_print_num";
pub const PRINT_STR: &str = "velo_print_str";
pub const PRINT_LIST: &str = "velo_print_list";
pub const PRINT_NEWLINE: &str = "velo_print_newline";
pub const NUM_TO_STR: &str = "velo_num_to_str";
pub const LIST_TO_STR: &str = "velo_list_to_str";
pub const STRING_CONCAT: &str = "velo_string_concat";
pub const STR_TO_CSTR: &str = "velo_str_to_cstr";
pub const STR_HASH: &str = "velo_str_hash";
pub const LIST_NEW: &str = "velo_list_new";
pub const LIST_GET: &str = "velo_list_get";
pub const LIST_SET: &str = "velo_list_set";
pub const MAP_NEW: &str = "velo_map_new";
pub const MAP_GET: &str = "velo_map_get";
pub const MAP_SET: &str = "velo_map_set";
pub const CHAN_MAKE: &str = "velo_chan_make";
pub const CHAN_SEND: &str = "velo_chan_send";
pub const CHAN_RECV: &str = "velo_chan_recv";
pub const POW: &str = "velo_pow";
pub const FATAL: &str = "velo_fatal";

const ARENA_BLOCK: i64 = 0x10_0000; // 1 MiB
const META_CAP: i64 = 8;

/// Emit every helper reachable from the generated code's call patches,
/// plus the always-present arena core the entry stub drives.
pub fn emit_runtime(g: &mut CodeGenerator) -> CompileResult<()> {
    let mut used: FxHashSet<&'static str> = FxHashSet::default();

    // The entry stub always initialises and tears down the meta-arena.
    for core in [ARENA_INIT, ARENA_PUSH, ARENA_POP, ARENA_ALLOC, ARENA_SHUTDOWN] {
        used.insert(core);
    }

    // Seed from the patches generated user code left behind.
    let referenced: Vec<String> = g
        .asm
        .buf
        .patches()
        .iter()
        .filter(|p| p.symbol.starts_with("velo_"))
        .map(|p| p.symbol.clone())
        .collect();
    for sym in &referenced {
        if let Some(known) = lookup_static(sym) {
            used.insert(known);
        }
    }

    // Transitive closure over helper-to-helper dependencies.
    loop {
        let mut grew = false;
        for (name, deps) in DEPS {
            if used.contains(name) {
                for dep in *deps {
                    grew |= used.insert(*dep);
                }
            }
        }
        if !grew {
            break;
        }
    }

    // Runtime globals.
    g.syms.data_slot("velo_meta");
    g.syms.data_slot("velo_meta_count");
    g.syms.data_slot("velo_meta_cap");
    g.syms.data_slot("velo_cpu_flags");
    g.syms.data_slot("velo_chan_seq");

    if g.opts.os == Os::Windows {
        for import in ["VirtualAlloc", "GetStdHandle", "WriteFile", "ExitProcess"] {
            g.syms.require_extern(import);
        }
        g.flags.use_dynamic_linking = true;
    }

    // Emit in dependency-stable order.
    if used.contains(ARENA_ALLOC) {
        emit_arena_core(g)?;
    }
    if used.contains(FMT_NUM) || used.contains(PRINT_NUM) || used.contains(NUM_TO_STR) {
        emit_fmt_num(g)?;
    }
    if used.contains(PRINT_STR) || used.contains(FATAL) {
        emit_print_str(g)?;
    }
    if used.contains(PRINT_NEWLINE) {
        emit_print_newline(g)?;
    }
    if used.contains(PRINT_NUM) {
        emit_print_num(g)?;
    }
    if used.contains(STRING_CONCAT) {
        emit_string_concat(g)?;
    }
    if used.contains(NUM_TO_STR) {
        emit_num_to_str(g)?;
    }
    if used.contains(STR_TO_CSTR) {
        emit_str_to_cstr(g)?;
    }
    if used.contains(STR_HASH) {
        emit_str_hash(g)?;
    }
    if used.contains(LIST_NEW) || used.contains(LIST_GET) || used.contains(LIST_SET) {
        emit_list_helpers(g)?;
    }
    if used.contains(LIST_TO_STR) {
        emit_list_to_str(g)?;
    }
    if used.contains(PRINT_LIST) {
        emit_print_list(g)?;
    }
    if used.contains(MAP_NEW) || used.contains(MAP_GET) || used.contains(MAP_SET) {
        emit_map_helpers(g)?;
    }
    if used.contains(POW) {
        emit_pow(g)?;
    }
    if used.contains(CHAN_MAKE) || used.contains(CHAN_SEND) || used.contains(CHAN_RECV) {
        emit_chan_helpers(g)?;
    }
    if used.contains(FATAL) {
        emit_fatal(g)?;
    }

    Ok(())
}

fn lookup_static(sym: &str) -> Option<&'static str> {
    const ALL: &[&str] = &[
        ARENA_INIT,
        ARENA_PUSH,
        ARENA_POP,
        ARENA_ALLOC,
        ARENA_SHUTDOWN,
        FMT_NUM,
        PRINT_NUM,
        PRINT_STR,
        PRINT_LIST,
        PRINT_NEWLINE,
        NUM_TO_STR,
        LIST_TO_STR,
        STRING_CONCAT,
        STR_TO_CSTR,
        STR_HASH,
        LIST_NEW,
        LIST_GET,
        LIST_SET,
        MAP_NEW,
        MAP_GET,
        MAP_SET,
        CHAN_MAKE,
        CHAN_SEND,
        CHAN_RECV,
        POW,
        FATAL,
    ];
    ALL.iter().copied().find(|s| *s == sym)
}

const DEPS: &[(&str, &[&str])] = &[
    (ARENA_INIT, &[ARENA_PUSH]),
    (PRINT_NUM, &[FMT_NUM]),
    (NUM_TO_STR, &[FMT_NUM, ARENA_ALLOC]),
    (STRING_CONCAT, &[ARENA_ALLOC]),
    (STR_TO_CSTR, &[ARENA_ALLOC]),
    (LIST_NEW, &[ARENA_ALLOC]),
    (LIST_TO_STR, &[LIST_GET, NUM_TO_STR, STRING_CONCAT]),
    (PRINT_LIST, &[LIST_TO_STR, PRINT_STR]),
    (MAP_NEW, &[ARENA_ALLOC]),
    (MAP_SET, &[FATAL]),
    (FATAL, &[PRINT_STR]),
];

// ============================================================================
// Helper scaffolding
// ============================================================================

/// Open a helper: bind the label, save the link register (where it is a
/// register) and five callee-saved registers. Five keeps x86-64 nested
/// calls 16-byte aligned.
fn helper_begin(g: &mut CodeGenerator, label: &str) -> Vec<Gpr> {
    let offset = g.asm.offset();
    g.syms.define(label, Section::Text, offset);

    let abi = g.abi();
    let mut saved = Vec::new();
    if g.opts.target != Target::X86_64 {
        // lr: x30 on ARM64, ra (x1) on RISC-V
        let lr = match g.opts.target {
            Target::Arm64 => Gpr(30),
            _ => Gpr(1),
        };
        g.asm.push(lr);
        saved.push(lr);
    }
    for r in abi.callee_saved.iter().take(5) {
        g.asm.push(*r);
        saved.push(*r);
    }
    saved
}

fn helper_end(g: &mut CodeGenerator, saved: Vec<Gpr>) {
    for r in saved.iter().rev() {
        g.asm.pop(*r);
    }
    g.asm.ret();
}

/// write(fd, buf, len) with fd/buf/len in the first three integer
/// argument registers. Syscall on Linux, WriteFile on Windows.
fn emit_os_write(g: &mut CodeGenerator) {
    let abi = g.abi();
    match g.opts.os {
        Os::Linux => {
            // int_args and sys_args coincide for the first three slots
            // on every Linux target.
            g.asm.mov_ri(abi.sysno, g.opts.target.sys_write());
            g.asm.syscall();
        }
        Os::Windows => {
            let sp = abi.sp;
            // Park buf/len, fetch the console handle, then WriteFile
            // with shadow space and an out-param slot.
            g.asm.add_ri(sp, sp, -64);
            g.asm.store(sp, 48, abi.int_args[1]); // buf
            g.asm.store(sp, 56, abi.int_args[2]); // len
            // handle id: -10 - fd (1 → -11, 2 → -12)
            let t = abi.scratch[1];
            g.asm.mov_ri(t, -10);
            g.asm.sub(t, t, abi.int_args[0]);
            g.asm.mov_rr(abi.int_args[0], t);
            velo_isa::x86_64::call_rip_indirect(&mut g.asm.buf, "GetStdHandle");
            g.asm.mov_rr(abi.int_args[0], abi.ret);
            g.asm.load(abi.int_args[1], sp, 48);
            g.asm.load(abi.int_args[2], sp, 56);
            // lpNumberOfBytesWritten → sp+40, fifth arg (NULL) → sp+32
            g.asm.mov_ri(abi.scratch[1], 0);
            g.asm.store(sp, 32, abi.scratch[1]);
            g.asm.add_ri(abi.int_args[3], sp, 40);
            velo_isa::x86_64::call_rip_indirect(&mut g.asm.buf, "WriteFile");
            g.asm.add_ri(sp, sp, 64);
        }
    }
}

/// Anonymous page allocation: size in int_args[0], pointer in ret.
/// mmap on Linux, VirtualAlloc on Windows.
fn emit_os_alloc(g: &mut CodeGenerator) {
    let abi = g.abi();
    match g.opts.os {
        Os::Linux => {
            // mmap(0, len, PROT_READ|WRITE, MAP_PRIVATE|ANON, -1, 0)
            g.asm.mov_rr(abi.sys_args[1], abi.int_args[0]);
            g.asm.mov_ri(abi.sys_args[0], 0);
            g.asm.mov_ri(abi.sys_args[2], 3);
            g.asm.mov_ri(abi.sys_args[3], 0x22);
            g.asm.mov_ri(abi.sys_args[4], -1);
            g.asm.mov_ri(abi.sys_args[5], 0);
            g.asm.mov_ri(abi.sysno, g.opts.target.sys_mmap());
            g.asm.syscall();
        }
        Os::Windows => {
            let sp = abi.sp;
            g.asm.add_ri(sp, sp, -48);
            // VirtualAlloc(0, size, MEM_COMMIT|MEM_RESERVE, PAGE_RW)
            g.asm.mov_rr(abi.int_args[1], abi.int_args[0]);
            g.asm.mov_ri(abi.int_args[0], 0);
            g.asm.mov_ri(abi.int_args[2], 0x3000);
            g.asm.mov_ri(abi.int_args[3], 4);
            velo_isa::x86_64::call_rip_indirect(&mut g.asm.buf, "VirtualAlloc");
            g.asm.add_ri(sp, sp, 48);
        }
    }
}

// ============================================================================
// Arena core
// ============================================================================

/// Arena struct layout, at the head of each mapping:
/// +0 base, +8 capacity, +16 used, +24 alignment. Data follows at +32.
fn emit_arena_core(g: &mut CodeGenerator) -> CompileResult<()> {
    emit_arena_push(g)?;
    emit_arena_init(g)?;
    emit_arena_alloc(g)?;
    emit_arena_pop(g)?;
    emit_arena_shutdown(g)?;
    Ok(())
}

fn emit_arena_init(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, ARENA_INIT);
    let abi = g.abi();
    let t0 = abi.scratch[0];
    let t1 = abi.scratch[1];

    // Meta array: META_CAP pointer slots.
    g.asm.mov_ri(abi.int_args[0], META_CAP * 8);
    emit_os_alloc(g);
    g.asm.lea_symbol(t1, "velo_meta");
    g.asm.store(t1, 0, abi.ret);

    g.asm.mov_ri(t0, 0);
    g.asm.lea_symbol(t1, "velo_meta_count");
    g.asm.store(t1, 0, t0);
    g.asm.mov_ri(t0, META_CAP);
    g.asm.lea_symbol(t1, "velo_meta_cap");
    g.asm.store(t1, 0, t0);

    // The global arena spans program execution.
    g.asm.call_symbol(ARENA_PUSH, false);

    helper_end(g, saved);
    Ok(())
}

fn emit_arena_push(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, ARENA_PUSH);
    let abi = g.abi();
    let cs = abi.callee_saved;
    let block = cs[0];
    let t0 = abi.scratch[0];
    let t1 = abi.scratch[1];

    g.asm.mov_ri(abi.int_args[0], ARENA_BLOCK);
    emit_os_alloc(g);
    g.asm.mov_rr(block, abi.ret);

    // Fill the arena struct.
    g.asm.add_ri(t0, block, 32);
    g.asm.store(block, 0, t0); // base
    g.asm.mov_ri(t0, ARENA_BLOCK - 32);
    g.asm.store(block, 8, t0); // capacity
    g.asm.mov_ri(t0, 0);
    g.asm.store(block, 16, t0); // used
    g.asm.mov_ri(t0, 16);
    g.asm.store(block, 24, t0); // alignment

    // Append to the meta array (capacity growth doubles the array).
    let meta = cs[1];
    let count = cs[2];
    g.asm.lea_symbol(t0, "velo_meta");
    g.asm.load(meta, t0, 0);
    g.asm.lea_symbol(t0, "velo_meta_count");
    g.asm.load(count, t0, 0);
    g.asm.lea_symbol(t0, "velo_meta_cap");
    g.asm.load(t1, t0, 0);

    let fits = g.asm.branch_cmp(Cond::Lt, count, t1);
    {
        // Double the meta array and copy the pointers over.
        let newarr = cs[3];
        let i = cs[4];
        g.asm.mov_ri(t0, 4);
        g.asm.shl(t1, t1, t0); // cap * 16 bytes = doubled slot count
        g.asm.mov_rr(abi.int_args[0], t1);
        emit_os_alloc(g);
        g.asm.mov_rr(newarr, abi.ret);
        g.asm.mov_ri(i, 0);
        let copy_top = g.asm.offset();
        let copy_done = g.asm.branch_cmp(Cond::Ge, i, count);
        g.asm.mov_ri(t0, 3);
        g.asm.mov_rr(t1, i);
        g.asm.shl(t1, t1, t0);
        g.asm.add(t0, meta, t1);
        g.asm.load(t0, t0, 0);
        let dst = abi.scratch[2];
        g.asm.add(dst, newarr, t1);
        g.asm.store(dst, 0, t0);
        g.asm.add_ri(i, i, 1);
        g.asm.jump_to(copy_top);
        g.asm.bind(copy_done);

        g.asm.lea_symbol(t0, "velo_meta");
        g.asm.store(t0, 0, newarr);
        g.asm.mov_rr(meta, newarr);
        g.asm.lea_symbol(t0, "velo_meta_cap");
        g.asm.load(t1, t0, 0);
        g.asm.add(t1, t1, t1);
        g.asm.store(t0, 0, t1);
    }
    g.asm.bind(fits);

    // meta[count] = block; count += 1
    g.asm.mov_ri(t0, 3);
    g.asm.mov_rr(t1, count);
    g.asm.shl(t1, t1, t0);
    g.asm.add(t1, meta, t1);
    g.asm.store(t1, 0, block);
    g.asm.add_ri(count, count, 1);
    g.asm.lea_symbol(t0, "velo_meta_count");
    g.asm.store(t0, 0, count);

    helper_end(g, saved);
    Ok(())
}

fn emit_arena_pop(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, ARENA_POP);
    let abi = g.abi();
    let t0 = abi.scratch[0];
    let t1 = abi.scratch[1];
    let t2 = abi.scratch[2];

    g.asm.lea_symbol(t0, "velo_meta_count");
    g.asm.load(t1, t0, 0);
    g.asm.add_ri(t1, t1, -1);
    g.asm.store(t0, 0, t1);

    // block = meta[count]
    g.asm.lea_symbol(t0, "velo_meta");
    g.asm.load(t0, t0, 0);
    g.asm.mov_ri(t2, 3);
    g.asm.shl(t1, t1, t2);
    g.asm.add(t0, t0, t1);
    g.asm.load(t0, t0, 0);

    if g.opts.os == Os::Linux {
        // munmap(block, capacity + 32)
        g.asm.load(t1, t0, 8);
        g.asm.add_ri(t1, t1, 32);
        g.asm.mov_rr(abi.sys_args[0], t0);
        g.asm.mov_rr(abi.sys_args[1], t1);
        g.asm.mov_ri(abi.sysno, g.opts.target.sys_munmap());
        g.asm.syscall();
    }

    helper_end(g, saved);
    Ok(())
}

/// Bump allocation from the top arena; growth swaps in a mapping of
/// double the capacity.
fn emit_arena_alloc(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, ARENA_ALLOC);
    let abi = g.abi();
    let cs = abi.callee_saved;
    let size = cs[0];
    let arena = cs[1];
    let slot = cs[2];
    let t0 = abi.scratch[0];
    let t1 = abi.scratch[1];

    // Align the request to the arena alignment (16).
    g.asm.add_ri(size, abi.int_args[0], 15);
    g.asm.mov_ri(t0, !15i64);
    g.asm.and(size, size, t0);

    // slot = &meta[count-1]; arena = *slot
    let retry = g.asm.offset();
    g.asm.lea_symbol(t0, "velo_meta_count");
    g.asm.load(t1, t0, 0);
    g.asm.add_ri(t1, t1, -1);
    g.asm.mov_ri(t0, 3);
    g.asm.shl(t1, t1, t0);
    g.asm.lea_symbol(t0, "velo_meta");
    g.asm.load(t0, t0, 0);
    g.asm.add(slot, t0, t1);
    g.asm.load(arena, slot, 0);

    // fits? used + size <= capacity
    g.asm.load(t0, arena, 16);
    g.asm.add(t0, t0, size);
    g.asm.load(t1, arena, 8);
    let fits = g.asm.branch_cmp(Cond::Le, t0, t1);

    // Grow: map a block of twice the capacity, install, retry. The
    // scratch registers do not survive the allocation (the syscall path
    // stages arguments through them), so the capacity is recomputed
    // from the old arena struct afterwards.
    {
        g.asm.load(t1, arena, 8);
        g.asm.add(t1, t1, t1);
        g.asm.add_ri(abi.int_args[0], t1, 32);
        emit_os_alloc(g);
        let block = abi.scratch[2];
        g.asm.mov_rr(block, abi.ret);
        g.asm.load(t1, arena, 8);
        g.asm.add(t1, t1, t1);
        g.asm.add_ri(t0, block, 32);
        g.asm.store(block, 0, t0); // base
        g.asm.store(block, 8, t1); // capacity (doubled)
        g.asm.mov_ri(t0, 0);
        g.asm.store(block, 16, t0); // used
        g.asm.mov_ri(t0, 16);
        g.asm.store(block, 24, t0);
        g.asm.store(slot, 0, block);
        g.asm.jump_to(retry);
    }

    g.asm.bind(fits);
    // ptr = base + used; used += size
    g.asm.load(t0, arena, 0);
    g.asm.load(t1, arena, 16);
    g.asm.add(abi.ret, t0, t1);
    g.asm.add(t1, t1, size);
    g.asm.store(arena, 16, t1);

    helper_end(g, saved);
    Ok(())
}

fn emit_arena_shutdown(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, ARENA_SHUTDOWN);
    let abi = g.abi();
    let t0 = abi.scratch[0];

    // Pop until the meta-arena is empty.
    let top = g.asm.offset();
    g.asm.lea_symbol(t0, "velo_meta_count");
    g.asm.load(t0, t0, 0);
    let done = g.asm.branch_if_zero(t0);
    g.asm.call_symbol(ARENA_POP, false);
    g.asm.jump_to(top);
    g.asm.bind(done);

    helper_end(g, saved);
    Ok(())
}

// ============================================================================
// Number formatting
// ============================================================================

/// velo_fmt_num(buf = int0, value = f0) → length.
///
/// Renders right-aligned into buf[0..96]: optional sign, integer
/// digits, and six fractional digits when the value is not integral.
/// The caller computes the start as buf+96-len.
fn emit_fmt_num(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, FMT_NUM);
    let abi = g.abi();
    let cs = abi.callee_saved;

    let buf = cs[0];
    let intpart = cs[1];
    let frac = cs[2];
    let pos = cs[3];
    let neg = cs[4];
    let t0 = abi.scratch[0];
    let t1 = abi.scratch[1];
    let ten = abi.scratch[1]; // t1 doubles as the constant 10 in loops

    let f0 = abi.float_args[0];
    let fs0 = abi.float_scratch[0];
    let fs1 = abi.float_scratch[1];

    g.asm.mov_rr(buf, abi.int_args[0]);

    // Sign
    g.asm.fmov_imm(fs0, 0.0, t0);
    g.asm.mov_ri(neg, 0);
    g.asm.fcmp_set(Cond::Ge, t0, f0, fs0);
    let non_negative = g.asm.branch_if_nonzero(t0);
    g.asm.mov_ri(neg, 1);
    g.asm.fsub(fs0, fs0, f0);
    g.asm.fmov_rr(f0, fs0);
    g.asm.bind(non_negative);

    // Split integer/fraction; fracint = round(frac * 1e6)
    g.asm.f64_to_int(intpart, f0);
    g.asm.int_to_f64(fs0, intpart);
    g.asm.fsub(fs0, f0, fs0);
    g.asm.fmov_imm(fs1, 1e6, t0);
    g.asm.fmul(fs0, fs0, fs1);
    g.asm.fmov_imm(fs1, 0.5, t0);
    g.asm.fadd(fs0, fs0, fs1);
    g.asm.f64_to_int(frac, fs0);

    g.asm.mov_ri(pos, 95);

    // Fraction digits (six, fixed) when any
    let no_frac = g.asm.branch_if_zero(frac);
    {
        // Re-purpose intpart? no: counter on the stack-free path: six
        // unrolled digit steps keep the register set small.
        for _ in 0..6 {
            g.asm.mov_ri(ten, 10);
            g.asm.sdiv(t0, frac, ten);
            let t2 = abi.scratch[2];
            g.asm.mov_ri(ten, 10);
            g.asm.mul(t2, t0, ten);
            g.asm.sub(t2, frac, t2); // remainder digit
            g.asm.mov_rr(frac, t0);
            g.asm.add_ri(t2, t2, 48);
            let addr = abi.scratch[1];
            g.asm.add(addr, buf, pos);
            g.asm.store8(addr, 0, t2);
            g.asm.add_ri(pos, pos, -1);
        }
        let dot = abi.scratch[0];
        g.asm.mov_ri(dot, 46); // '.'
        let addr = abi.scratch[1];
        g.asm.add(addr, buf, pos);
        g.asm.store8(addr, 0, dot);
        g.asm.add_ri(pos, pos, -1);
    }
    g.asm.bind(no_frac);

    // Integer digits, at least one.
    let digits_top = g.asm.offset();
    {
        g.asm.mov_ri(ten, 10);
        g.asm.sdiv(t0, intpart, ten);
        let t2 = abi.scratch[2];
        g.asm.mov_ri(ten, 10);
        g.asm.mul(t2, t0, ten);
        g.asm.sub(t2, intpart, t2);
        g.asm.mov_rr(intpart, t0);
        g.asm.add_ri(t2, t2, 48);
        let addr = abi.scratch[1];
        g.asm.add(addr, buf, pos);
        g.asm.store8(addr, 0, t2);
        g.asm.add_ri(pos, pos, -1);
    }
    let int_done = g.asm.branch_if_zero(intpart);
    g.asm.jump_to(digits_top);
    g.asm.bind(int_done);

    // Sign byte
    let no_sign = g.asm.branch_if_zero(neg);
    g.asm.mov_ri(t0, 45); // '-'
    g.asm.add(t1, buf, pos);
    g.asm.store8(t1, 0, t0);
    g.asm.add_ri(pos, pos, -1);
    g.asm.bind(no_sign);

    // len = 95 - pos
    g.asm.mov_ri(abi.ret, 95);
    g.asm.sub(abi.ret, abi.ret, pos);

    helper_end(g, saved);
    Ok(())
}

/// velo_print_str(fd = int0, str = int1): write(fd, str+8, [str]).
fn emit_print_str(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, PRINT_STR);
    let abi = g.abi();

    let s = abi.int_args[1];
    let len = abi.int_args[2];
    g.asm.load(len, s, 0);
    g.asm.add_ri(s, s, 8);
    emit_os_write(g);

    helper_end(g, saved);
    Ok(())
}

/// velo_print_newline(fd = int0).
fn emit_print_newline(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, PRINT_NEWLINE);
    let abi = g.abi();
    let sp = abi.sp;
    let t0 = abi.scratch[0];

    g.asm.add_ri(sp, sp, -16);
    g.asm.mov_ri(t0, 10); // '\n'
    g.asm.store8(sp, 0, t0);
    g.asm.mov_rr(abi.int_args[1], sp);
    g.asm.mov_ri(abi.int_args[2], 1);
    emit_os_write(g);
    g.asm.add_ri(sp, sp, 16);

    helper_end(g, saved);
    Ok(())
}

/// velo_print_num(fd = int0, value = f0).
fn emit_print_num(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, PRINT_NUM);
    let abi = g.abi();
    let cs = abi.callee_saved;
    let sp = abi.sp;
    let fd = cs[0];

    g.asm.mov_rr(fd, abi.int_args[0]);
    g.asm.add_ri(sp, sp, -112);
    g.asm.mov_rr(abi.int_args[0], sp);
    g.asm.call_symbol(FMT_NUM, false);

    // start = sp + 96 - len
    g.asm.mov_rr(abi.int_args[2], abi.ret);
    g.asm.add_ri(abi.int_args[1], sp, 96);
    g.asm.sub(abi.int_args[1], abi.int_args[1], abi.ret);
    g.asm.mov_rr(abi.int_args[0], fd);
    emit_os_write(g);
    g.asm.add_ri(sp, sp, 112);

    helper_end(g, saved);
    Ok(())
}

// ============================================================================
// Strings
// ============================================================================

/// Byte-copy loop: dst/src/len registers are consumed.
fn emit_memcpy(g: &mut CodeGenerator, dst: Gpr, src: Gpr, len: Gpr) {
    let abi = g.abi();
    let t = abi.scratch[2];
    let top = g.asm.offset();
    let done = g.asm.branch_if_zero(len);
    g.asm.load8(t, src, 0);
    g.asm.store8(dst, 0, t);
    g.asm.add_ri(src, src, 1);
    g.asm.add_ri(dst, dst, 1);
    g.asm.add_ri(len, len, -1);
    g.asm.jump_to(top);
    g.asm.bind(done);
}

/// velo_string_concat(a = int0, b = int1) → new arena string.
fn emit_string_concat(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, STRING_CONCAT);
    let abi = g.abi();
    let cs = abi.callee_saved;
    let a = cs[0];
    let b = cs[1];
    let out = cs[2];
    let t0 = abi.scratch[0];
    let t1 = abi.scratch[1];

    g.asm.mov_rr(a, abi.int_args[0]);
    g.asm.mov_rr(b, abi.int_args[1]);

    // total = len(a) + len(b); alloc 8 + total + 1 (NUL for FFI reuse)
    g.asm.load(t0, a, 0);
    g.asm.load(t1, b, 0);
    g.asm.add(t0, t0, t1);
    g.asm.add_ri(abi.int_args[0], t0, 9);
    g.asm.call_symbol(ARENA_ALLOC, false);
    g.asm.mov_rr(out, abi.ret);

    g.asm.load(t0, a, 0);
    g.asm.load(t1, b, 0);
    g.asm.add(t0, t0, t1);
    g.asm.store(out, 0, t0);

    // copy a's bytes
    let dst = abi.int_args[0];
    let src = abi.int_args[1];
    let len = abi.int_args[2];
    g.asm.add_ri(dst, out, 8);
    g.asm.add_ri(src, a, 8);
    g.asm.load(len, a, 0);
    emit_memcpy(g, dst, src, len);
    // then b's (dst continues where the copy left it)
    g.asm.add_ri(src, b, 8);
    g.asm.load(len, b, 0);
    emit_memcpy(g, dst, src, len);
    // trailing NUL
    g.asm.mov_ri(t0, 0);
    g.asm.store8(dst, 0, t0);

    g.asm.mov_rr(abi.ret, out);
    helper_end(g, saved);
    Ok(())
}

/// velo_num_to_str(value = f0) → arena string.
fn emit_num_to_str(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, NUM_TO_STR);
    let abi = g.abi();
    let cs = abi.callee_saved;
    let sp = abi.sp;
    let len = cs[0];
    let out = cs[1];

    g.asm.add_ri(sp, sp, -112);
    g.asm.mov_rr(abi.int_args[0], sp);
    g.asm.call_symbol(FMT_NUM, false);
    g.asm.mov_rr(len, abi.ret);

    g.asm.add_ri(abi.int_args[0], len, 9);
    g.asm.call_symbol(ARENA_ALLOC, false);
    g.asm.mov_rr(out, abi.ret);
    g.asm.store(out, 0, len);

    let dst = abi.int_args[0];
    let src = abi.int_args[1];
    let n = abi.int_args[2];
    g.asm.add_ri(dst, out, 8);
    g.asm.add_ri(src, sp, 96);
    g.asm.sub(src, src, len);
    g.asm.mov_rr(n, len);
    emit_memcpy(g, dst, src, n);

    g.asm.add_ri(sp, sp, 112);
    g.asm.mov_rr(abi.ret, out);
    helper_end(g, saved);
    Ok(())
}

/// velo_str_to_cstr(s = int0) → NUL-terminated arena copy.
fn emit_str_to_cstr(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, STR_TO_CSTR);
    let abi = g.abi();
    let cs = abi.callee_saved;
    let s = cs[0];
    let out = cs[1];
    let t0 = abi.scratch[0];

    g.asm.mov_rr(s, abi.int_args[0]);
    g.asm.load(t0, s, 0);
    g.asm.add_ri(abi.int_args[0], t0, 1);
    g.asm.call_symbol(ARENA_ALLOC, false);
    g.asm.mov_rr(out, abi.ret);

    let dst = abi.int_args[0];
    let src = abi.int_args[1];
    let len = abi.int_args[2];
    g.asm.mov_rr(dst, out);
    g.asm.add_ri(src, s, 8);
    g.asm.load(len, s, 0);
    emit_memcpy(g, dst, src, len);
    g.asm.mov_ri(t0, 0);
    g.asm.store8(dst, 0, t0);

    g.asm.mov_rr(abi.ret, out);
    helper_end(g, saved);
    Ok(())
}

/// velo_str_hash(s = int0) → FNV-1a over the payload bytes.
fn emit_str_hash(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, STR_HASH);
    let abi = g.abi();
    let t0 = abi.scratch[0];
    let hash = abi.int_args[2];
    let src = abi.int_args[0];
    let len = abi.int_args[1];

    g.asm.load(len, src, 0);
    g.asm.add_ri(src, src, 8);
    g.asm.mov_ri(hash, 0xcbf2_9ce4_8422_2325u64 as i64);

    let prime = abi.scratch[1];
    let top = g.asm.offset();
    let done = g.asm.branch_if_zero(len);
    g.asm.load8(t0, src, 0);
    g.asm.xor(hash, hash, t0);
    g.asm.mov_ri(prime, 0x0000_0100_0000_01B3);
    g.asm.mul(hash, hash, prime);
    g.asm.add_ri(src, src, 1);
    g.asm.add_ri(len, len, -1);
    g.asm.jump_to(top);
    g.asm.bind(done);

    g.asm.mov_rr(abi.ret, hash);
    helper_end(g, saved);
    Ok(())
}

// ============================================================================
// Lists
// ============================================================================

/// Lists: [len u64][cap u64][elements f64 ...].
fn emit_list_helpers(g: &mut CodeGenerator) -> CompileResult<()> {
    let abi = g.abi();

    // velo_list_new(n = int0)
    {
        let saved = helper_begin(g, LIST_NEW);
        let cs = abi.callee_saved;
        let n = cs[0];
        let out = cs[1];
        let t0 = abi.scratch[0];

        g.asm.mov_rr(n, abi.int_args[0]);
        g.asm.mov_ri(t0, 3);
        g.asm.shl(t0, n, t0);
        g.asm.add_ri(abi.int_args[0], t0, 16);
        g.asm.call_symbol(ARENA_ALLOC, false);
        g.asm.mov_rr(out, abi.ret);
        g.asm.store(out, 0, n);
        g.asm.store(out, 8, n);
        g.asm.mov_rr(abi.ret, out);
        helper_end(g, saved);
    }

    // velo_list_get(p = int0, i = int1) → f0; out-of-range yields `idx `
    {
        let saved = helper_begin(g, LIST_GET);
        let t0 = abi.scratch[0];
        let p = abi.int_args[0];
        let i = abi.int_args[1];

        g.asm.load(t0, p, 0);
        let in_range = g.asm.branch_cmp(Cond::Lt, i, t0);
        g.asm.mov_ri(t0, crate::codegen::expr::error_bits(b"idx ") as i64);
        g.asm.fmov_from_gpr(abi.fret, t0);
        let out = g.asm.jump();
        g.asm.bind(in_range);
        g.asm.mov_ri(t0, 3);
        g.asm.shl(i, i, t0);
        g.asm.add(p, p, i);
        g.asm.fload(abi.fret, p, 16);
        g.asm.bind(out);
        helper_end(g, saved);
    }

    // velo_list_set(p = int0, i = int1, v = f0); out-of-range ignored
    {
        let saved = helper_begin(g, LIST_SET);
        let t0 = abi.scratch[0];
        let p = abi.int_args[0];
        let i = abi.int_args[1];

        g.asm.load(t0, p, 0);
        let skip = g.asm.branch_cmp(Cond::Ge, i, t0);
        g.asm.mov_ri(t0, 3);
        g.asm.shl(i, i, t0);
        g.asm.add(p, p, i);
        g.asm.fstore(p, 16, abi.float_args[0]);
        g.asm.bind(skip);
        helper_end(g, saved);
    }

    Ok(())
}

/// velo_list_to_str(p = int0) → "[e1, e2, …]" built element-wise.
fn emit_list_to_str(g: &mut CodeGenerator) -> CompileResult<()> {
    let open = g.syms.intern_string("[");
    let sep = g.syms.intern_string(", ");
    let close = g.syms.intern_string("]");

    let saved = helper_begin(g, LIST_TO_STR);
    let abi = g.abi();
    let cs = abi.callee_saved;
    let list = cs[0];
    let i = cs[1];
    let len = cs[2];
    let acc = cs[3];

    g.asm.mov_rr(list, abi.int_args[0]);
    g.asm.load(len, list, 0);
    g.asm.mov_ri(i, 0);
    g.asm.lea_symbol(acc, &open);

    let top = g.asm.offset();
    let done = g.asm.branch_cmp(Cond::Ge, i, len);

    let first = g.asm.branch_if_zero(i);
    g.asm.mov_rr(abi.int_args[0], acc);
    g.asm.lea_symbol(abi.int_args[1], &sep);
    g.asm.call_symbol(STRING_CONCAT, false);
    g.asm.mov_rr(acc, abi.ret);
    g.asm.bind(first);

    g.asm.mov_rr(abi.int_args[0], list);
    g.asm.mov_rr(abi.int_args[1], i);
    g.asm.call_symbol(LIST_GET, false);
    g.asm.call_symbol(NUM_TO_STR, false);
    g.asm.mov_rr(abi.int_args[1], abi.ret);
    g.asm.mov_rr(abi.int_args[0], acc);
    g.asm.call_symbol(STRING_CONCAT, false);
    g.asm.mov_rr(acc, abi.ret);

    g.asm.add_ri(i, i, 1);
    g.asm.jump_to(top);
    g.asm.bind(done);

    g.asm.mov_rr(abi.int_args[0], acc);
    g.asm.lea_symbol(abi.int_args[1], &close);
    g.asm.call_symbol(STRING_CONCAT, false);

    helper_end(g, saved);
    Ok(())
}

/// velo_print_list(fd = int0, p = int1).
fn emit_print_list(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, PRINT_LIST);
    let abi = g.abi();
    let cs = abi.callee_saved;
    let fd = cs[0];

    g.asm.mov_rr(fd, abi.int_args[0]);
    g.asm.mov_rr(abi.int_args[0], abi.int_args[1]);
    g.asm.call_symbol(LIST_TO_STR, false);
    g.asm.mov_rr(abi.int_args[1], abi.ret);
    g.asm.mov_rr(abi.int_args[0], fd);
    g.asm.call_symbol(PRINT_STR, false);

    helper_end(g, saved);
    Ok(())
}

// ============================================================================
// Maps
// ============================================================================

/// Maps: [count u64][cap u64][(key u64, value f64) ...], linear probe.
fn emit_map_helpers(g: &mut CodeGenerator) -> CompileResult<()> {
    let full_msg = g.syms.intern_string("map capacity exhausted\n");
    let abi = g.abi();

    // velo_map_new(cap = int0)
    {
        let saved = helper_begin(g, MAP_NEW);
        let cs = abi.callee_saved;
        let cap = cs[0];
        let out = cs[1];
        let t0 = abi.scratch[0];

        g.asm.mov_rr(cap, abi.int_args[0]);
        g.asm.mov_ri(t0, 4);
        g.asm.shl(t0, cap, t0);
        g.asm.add_ri(abi.int_args[0], t0, 16);
        g.asm.call_symbol(ARENA_ALLOC, false);
        g.asm.mov_rr(out, abi.ret);
        g.asm.mov_ri(t0, 0);
        g.asm.store(out, 0, t0);
        g.asm.store(out, 8, cap);
        g.asm.mov_rr(abi.ret, out);
        helper_end(g, saved);
    }

    // Entry address for (map, index): map + 16 + index*16.
    // velo_map_get(m = int0, k = int1) → f0, `key ` error when missing
    {
        let saved = helper_begin(g, MAP_GET);
        let t0 = abi.scratch[0];
        let t1 = abi.scratch[1];
        let m = abi.int_args[0];
        let k = abi.int_args[1];
        let i = abi.int_args[2];

        g.asm.load(t0, m, 0);
        g.asm.mov_ri(i, 0);
        let top = g.asm.offset();
        let missing = g.asm.branch_cmp(Cond::Ge, i, t0);
        g.asm.mov_ri(t1, 4);
        g.asm.mov_rr(abi.scratch[2], i);
        g.asm.shl(abi.scratch[2], abi.scratch[2], t1);
        g.asm.add(t1, m, abi.scratch[2]);
        g.asm.load(abi.scratch[2], t1, 16);
        let next = g.asm.branch_cmp(Cond::Ne, abi.scratch[2], k);
        g.asm.fload(abi.fret, t1, 24);
        let found = g.asm.jump();
        g.asm.bind(next);
        g.asm.add_ri(i, i, 1);
        g.asm.jump_to(top);
        g.asm.bind(missing);
        g.asm.mov_ri(t1, crate::codegen::expr::error_bits(b"key ") as i64);
        g.asm.fmov_from_gpr(abi.fret, t1);
        g.asm.bind(found);
        helper_end(g, saved);
    }

    // velo_map_set(m = int0, k = int1, v = f0)
    {
        let saved = helper_begin(g, MAP_SET);
        let t0 = abi.scratch[0];
        let t1 = abi.scratch[1];
        let t2 = abi.scratch[2];
        let m = abi.int_args[0];
        let k = abi.int_args[1];
        let i = abi.int_args[2];

        g.asm.load(t0, m, 0);
        g.asm.mov_ri(i, 0);
        let top = g.asm.offset();
        let append = g.asm.branch_cmp(Cond::Ge, i, t0);
        g.asm.mov_ri(t1, 4);
        g.asm.mov_rr(t2, i);
        g.asm.shl(t2, t2, t1);
        g.asm.add(t1, m, t2);
        g.asm.load(t2, t1, 16);
        let next = g.asm.branch_cmp(Cond::Ne, t2, k);
        // Existing key: update in place.
        g.asm.fstore(t1, 24, abi.float_args[0]);
        let done = g.asm.jump();
        g.asm.bind(next);
        g.asm.add_ri(i, i, 1);
        g.asm.jump_to(top);

        g.asm.bind(append);
        g.asm.load(t1, m, 8);
        let fits = g.asm.branch_cmp(Cond::Lt, t0, t1);
        g.asm.lea_symbol(abi.int_args[1], &full_msg);
        g.asm.call_symbol(FATAL, false);
        g.asm.bind(fits);
        g.asm.mov_ri(t1, 4);
        g.asm.mov_rr(t2, t0);
        g.asm.shl(t2, t2, t1);
        g.asm.add(t1, m, t2);
        g.asm.store(t1, 16, k);
        g.asm.fstore(t1, 24, abi.float_args[0]);
        g.asm.add_ri(t0, t0, 1);
        g.asm.store(m, 0, t0);
        g.asm.bind(done);
        helper_end(g, saved);
    }

    Ok(())
}

// ============================================================================
// Math
// ============================================================================

/// velo_pow(base = f0, exp = f1): repeated multiplication for integral
/// exponents, `arg ` error otherwise.
fn emit_pow(g: &mut CodeGenerator) -> CompileResult<()> {
    let saved = helper_begin(g, POW);
    let abi = g.abi();
    let t0 = abi.scratch[0];
    let t1 = abi.scratch[1];
    let f0 = abi.float_args[0];
    let f1 = abi.float_args[1];
    let acc = abi.float_scratch[0];
    let chk = abi.float_scratch[1];

    // Non-integral exponent → `arg ` error.
    g.asm.f64_to_int(t0, f1);
    g.asm.int_to_f64(chk, t0);
    g.asm.fcmp_set(Cond::Eq, t1, chk, f1);
    let integral = g.asm.branch_if_nonzero(t1);
    g.asm.mov_ri(t1, crate::codegen::expr::error_bits(b"arg ") as i64);
    g.asm.fmov_from_gpr(abi.fret, t1);
    let out = g.asm.jump();
    g.asm.bind(integral);

    // neg = exp < 0; e = |e|
    let neg = abi.scratch[2];
    g.asm.mov_ri(neg, 0);
    g.asm.mov_ri(t1, 0);
    let nonneg = g.asm.branch_cmp(Cond::Ge, t0, t1);
    g.asm.mov_ri(neg, 1);
    g.asm.sub(t0, t1, t0);
    g.asm.bind(nonneg);

    g.asm.fmov_imm(acc, 1.0, t1);
    let top = g.asm.offset();
    let done = g.asm.branch_if_zero(t0);
    g.asm.fmul(acc, acc, f0);
    g.asm.add_ri(t0, t0, -1);
    g.asm.jump_to(top);
    g.asm.bind(done);

    // Negative exponent: 1/acc
    let pos = g.asm.branch_if_zero(neg);
    g.asm.fmov_imm(chk, 1.0, t1);
    g.asm.fdiv(chk, chk, acc);
    g.asm.fmov_rr(acc, chk);
    g.asm.bind(pos);

    g.asm.fmov_rr(abi.fret, acc);
    g.asm.bind(out);
    helper_end(g, saved);
    Ok(())
}

// ============================================================================
// Channels
// ============================================================================

/// Channels are loopback UDP sockets: make binds and connects a port;
/// send/recv move a 16-byte [seq][value] datagram. Ordered delivery per
/// connection comes from the loopback path; the sequence word is the
/// thin reliability layer's bookkeeping.
fn emit_chan_helpers(g: &mut CodeGenerator) -> CompileResult<()> {
    if g.opts.os == Os::Windows {
        // Message channels are a Linux surface; Windows programs get a
        // fatal diagnostic instead of silently dropping messages.
        let msg = g.syms.intern_string("channels require a linux target\n");
        for label in [CHAN_MAKE, CHAN_SEND, CHAN_RECV] {
            let saved = helper_begin(g, label);
            let abi = g.abi();
            g.asm.lea_symbol(abi.int_args[1], &msg);
            g.asm.call_symbol(FATAL, false);
            helper_end(g, saved);
        }
        return Ok(());
    }

    let abi = g.abi();
    let target = g.opts.target;

    // velo_chan_make(port = f0) → fd as number
    {
        let saved = helper_begin(g, CHAN_MAKE);
        let cs = abi.callee_saved;
        let sp = abi.sp;
        let port = cs[0];
        let fd = cs[1];
        let t0 = abi.scratch[0];
        let t1 = abi.scratch[1];

        g.asm.f64_to_int(port, abi.float_args[0]);

        // socket(AF_INET, SOCK_DGRAM, 0)
        g.asm.mov_ri(abi.sys_args[0], 2);
        g.asm.mov_ri(abi.sys_args[1], 2);
        g.asm.mov_ri(abi.sys_args[2], 0);
        g.asm.mov_ri(abi.sysno, target.sys_socket());
        g.asm.syscall();
        g.asm.mov_rr(fd, abi.ret);

        // sockaddr_in on the stack: family=2, htons(port), addr, zero.
        g.asm.add_ri(sp, sp, -16);
        g.asm.mov_ri(t0, 2);
        g.asm.store(sp, 0, t0); // clears the whole first qword
        g.asm.mov_ri(t1, 0);
        g.asm.store(sp, 8, t1);
        // htons: (port & 0xFF) << 8 | (port >> 8)
        g.asm.mov_ri(t1, 0xFF);
        g.asm.and(t1, port, t1);
        g.asm.mov_ri(t0, 8);
        g.asm.shl(t1, t1, t0);
        g.asm.mov_rr(t0, port);
        let eight = abi.scratch[2];
        g.asm.mov_ri(eight, 8);
        g.asm.shr(t0, t0, eight);
        g.asm.or(t1, t1, t0);
        g.asm.mov_ri(t0, 8);
        g.asm.shl(t1, t1, t0);
        g.asm.shl(t1, t1, t0); // (htons(port)) << 16
        g.asm.mov_ri(t0, 2);
        g.asm.or(t1, t1, t0); // family | port field
        g.asm.store32(sp, 0, t1);

        // bind(fd, sp, 16) on INADDR_ANY
        g.asm.mov_rr(abi.sys_args[0], fd);
        g.asm.mov_rr(abi.sys_args[1], sp);
        g.asm.mov_ri(abi.sys_args[2], 16);
        g.asm.mov_ri(abi.sysno, target.sys_bind());
        g.asm.syscall();

        // connect to 127.0.0.1:port so plain read/write move datagrams
        g.asm.mov_ri(t0, 0x0100_007F);
        g.asm.store32(sp, 4, t0);
        g.asm.mov_rr(abi.sys_args[0], fd);
        g.asm.mov_rr(abi.sys_args[1], sp);
        g.asm.mov_ri(abi.sys_args[2], 16);
        g.asm.mov_ri(abi.sysno, target.sys_connect());
        g.asm.syscall();

        g.asm.add_ri(sp, sp, 16);
        g.asm.int_to_f64(abi.fret, fd);
        helper_end(g, saved);
    }

    // velo_chan_send(fd = int0, v = f0)
    {
        let saved = helper_begin(g, CHAN_SEND);
        let sp = abi.sp;
        let t0 = abi.scratch[0];
        let t1 = abi.scratch[1];

        g.asm.add_ri(sp, sp, -16);
        // sequence number
        g.asm.lea_symbol(t0, "velo_chan_seq");
        g.asm.load(t1, t0, 0);
        g.asm.add_ri(t1, t1, 1);
        g.asm.store(t0, 0, t1);
        g.asm.store(sp, 0, t1);
        g.asm.fstore(sp, 8, abi.float_args[0]);

        g.asm.mov_rr(abi.sys_args[0], abi.int_args[0]);
        g.asm.mov_rr(abi.sys_args[1], sp);
        g.asm.mov_ri(abi.sys_args[2], 16);
        g.asm.mov_ri(abi.sysno, target.sys_write());
        g.asm.syscall();
        g.asm.add_ri(sp, sp, 16);

        g.asm.fmov_imm(abi.fret, 0.0, t0);
        helper_end(g, saved);
    }

    // velo_chan_recv(fd = int0) → f0; blocks until a datagram arrives
    {
        let saved = helper_begin(g, CHAN_RECV);
        let sp = abi.sp;

        g.asm.add_ri(sp, sp, -16);
        g.asm.mov_rr(abi.sys_args[0], abi.int_args[0]);
        g.asm.mov_rr(abi.sys_args[1], sp);
        g.asm.mov_ri(abi.sys_args[2], 16);
        g.asm.mov_ri(abi.sysno, target.sys_read());
        g.asm.syscall();
        g.asm.fload(abi.fret, sp, 8);
        g.asm.add_ri(sp, sp, 16);
        helper_end(g, saved);
    }

    Ok(())
}

/// velo_fatal(msg = int1): diagnostic to fd 2, exit(1).
fn emit_fatal(g: &mut CodeGenerator) -> CompileResult<()> {
    let offset = g.asm.offset();
    g.syms.define(FATAL, Section::Text, offset);
    let abi = g.abi();

    g.asm.mov_ri(abi.int_args[0], 2);
    g.asm.call_symbol(PRINT_STR, false);
    match g.opts.os {
        Os::Linux => {
            g.asm.mov_ri(abi.sys_args[0], 1);
            g.asm.mov_ri(abi.sysno, g.opts.target.sys_exit());
            g.asm.syscall();
        }
        Os::Windows => {
            g.asm.mov_ri(abi.int_args[0], 1);
            velo_isa::x86_64::call_rip_indirect(&mut g.asm.buf, "ExitProcess");
        }
    }
    Ok(())
}

// ============================================================================
// Entry stub
// ============================================================================

/// The program entry: clear the argument registers, detect CPU features
/// when SIMD/FMA is in play, set up the meta-arena, run the program,
/// free the arenas and exit with the program's status (1 for an
/// uncaught NaN-tagged error).
pub fn emit_entry(g: &mut CodeGenerator) -> CompileResult<usize> {
    let entry = g.asm.offset();
    g.syms.define("_start", Section::Text, entry);
    let abi = g.abi();

    // Zero-argument register clear.
    for r in abi.int_args.iter().take(4) {
        g.asm.mov_ri(*r, 0);
    }

    // CPUID feature detection, only when the program uses SIMD or FMA
    // (x86-64 only; the other ISAs carry these baseline).
    if (g.flags.uses_simd || g.flags.uses_fma) && g.opts.target == Target::X86_64 {
        emit_cpu_detect(g)?;
    }

    g.asm.call_symbol(ARENA_INIT, false);

    // Top-level statements, then main when one exists.
    g.asm.call_symbol("__toplevel", false);
    if g.funcs.contains_key("main") {
        g.asm.call_symbol("main", false);
    }

    // Exit status: NaN-tagged error → 1, otherwise the truncated value.
    let status_slot_reg = abi.callee_saved[0];
    let t0 = abi.scratch[0];
    g.asm.fis_nan(t0, abi.fret);
    let clean = g.asm.branch_if_zero(t0);
    g.asm.mov_ri(status_slot_reg, 1);
    let done = g.asm.jump();
    g.asm.bind(clean);
    g.asm.f64_to_int(status_slot_reg, abi.fret);
    g.asm.bind(done);

    g.asm.call_symbol(ARENA_SHUTDOWN, false);

    match g.opts.os {
        Os::Linux => {
            g.asm.mov_rr(abi.sys_args[0], status_slot_reg);
            g.asm.mov_ri(abi.sysno, g.opts.target.sys_exit());
            g.asm.syscall();
        }
        Os::Windows => {
            g.asm.mov_rr(abi.int_args[0], status_slot_reg);
            velo_isa::x86_64::call_rip_indirect(&mut g.asm.buf, "ExitProcess");
        }
    }

    Ok(entry)
}

/// CPUID leaf 1: FMA (ECX bit 12) and AVX (ECX bit 28) recorded into
/// velo_cpu_flags (bit 0 = FMA, bit 1 = AVX).
fn emit_cpu_detect(g: &mut CodeGenerator) -> CompileResult<()> {
    use velo_isa::x86_64;
    if g.opts.target != Target::X86_64 {
        return Err(CompileError::unsupported(
            "cpuid probe",
            g.opts.target,
            &velo_parser::token::Span::synthetic(),
        ));
    }

    let buf = &mut g.asm.buf;
    // mov eax, 1; cpuid: results in ecx/edx; rbx is clobbered, which
    // is fine this early in _start.
    x86_64::mov_ri(buf, Gpr(0), 1);
    x86_64::cpuid(buf);

    // flags = ((ecx >> 12) & 1) | (((ecx >> 28) & 1) << 1)
    // Copy ecx out first: the shift lowering stages counts in rcx.
    let g10 = Gpr(10);
    let g11 = Gpr(11);
    let g9 = Gpr(9);
    g.asm.mov_rr(g10, Gpr(1)); // ecx
    g.asm.mov_rr(g9, Gpr(1));
    g.asm.mov_ri(g11, 12);
    g.asm.shr(g10, g10, g11);
    g.asm.mov_ri(g11, 1);
    g.asm.and(g10, g10, g11);

    g.asm.mov_ri(g11, 28);
    g.asm.shr(g9, g9, g11);
    g.asm.mov_ri(g11, 1);
    g.asm.and(g9, g9, g11);
    g.asm.mov_ri(g11, 1);
    g.asm.shl(g9, g9, g11);
    g.asm.or(g10, g10, g9);

    let addr = Gpr(11);
    g.asm.lea_symbol(addr, "velo_cpu_flags");
    g.asm.store(addr, 0, g10);
    Ok(())
}
