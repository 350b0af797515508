//! ELF64 executable writer.
//!
//! Two modes: non-PIE (`ET_EXEC`, fixed base 0x400000) and PIE
//! (`ET_DYN`, base 0). Dynamic builds carry PT_INTERP with the ISA's
//! ld.so path, one PLT entry per imported function, a .rela.plt of
//! JUMP_SLOT relocations, .dynsym/.dynstr, .got.plt and the .dynamic
//! segment. Static builds shrink to three PT_LOADs and PT_GNU_STACK.
//!
//! Image layout, file offsets congruent to vaddrs modulo the page:
//!
//! ```text
//! 0x0000  ehdr + phdrs
//!         .interp .dynsym .dynstr .rela.plt .plt .text   LOAD r-x
//! page    .rodata                                        LOAD r--
//! page    .data .got.plt .dynamic                        LOAD rw-
//! ```

use crate::layout::{align, apply_patches, Regions, Resolver, PAGE};
use crate::ObjectError;
use rustc_hash::FxHashMap;
use velo_codegen::CodegenOutput;
use velo_isa::Target;

const NON_PIE_BASE: u64 = 0x40_0000;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_PHDR: u32 = 6;
const PT_GNU_STACK: u32 = 0x6474_E551;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const DT_PLTRELSZ: u64 = 2;
const DT_PLTGOT: u64 = 3;
const DT_STRTAB: u64 = 5;
const DT_SYMTAB: u64 = 6;
const DT_STRSZ: u64 = 10;
const DT_SYMENT: u64 = 11;
const DT_PLTREL: u64 = 20;
const DT_JMPREL: u64 = 23;
const DT_FLAGS: u64 = 30;
const DF_BIND_NOW: u64 = 8;

/// Per-ISA JUMP_SLOT relocation type.
fn jump_slot_reloc(target: Target) -> u64 {
    match target {
        Target::X86_64 => 7,    // R_X86_64_JUMP_SLOT
        Target::Arm64 => 1026,  // R_AARCH64_JUMP_SLOT
        Target::RiscV64 => 5,   // R_RISCV_JUMP_SLOT
    }
}

/// Write a complete ELF executable image.
pub fn write_elf(
    out: &CodegenOutput,
    target: Target,
    pie: bool,
    libs: &[String],
) -> Result<Vec<u8>, ObjectError> {
    let dynamic = out.flags.use_dynamic_linking || !out.externs.is_empty();
    let base = if pie { 0 } else { NON_PIE_BASE };

    let interp = target.interp_path().as_bytes();
    let nsyms = out.externs.len();

    // .dynstr: NUL + lib names + symbol names
    let mut dynstr: Vec<u8> = vec![0];
    let mut lib_offsets = Vec::new();
    let needed: Vec<String> = if libs.is_empty() && dynamic {
        vec!["libc.so.6".to_string()]
    } else {
        libs.to_vec()
    };
    for lib in &needed {
        lib_offsets.push(dynstr.len() as u64);
        dynstr.extend_from_slice(lib.as_bytes());
        dynstr.push(0);
    }
    let mut sym_name_offsets = Vec::new();
    for sym in &out.externs {
        sym_name_offsets.push(dynstr.len() as u32);
        dynstr.extend_from_slice(sym.as_bytes());
        dynstr.push(0);
    }

    // ---- Layout ----
    let phnum: u64 = if dynamic { 7 } else { 4 };
    let headers_len = 64 + phnum * 56;

    let interp_off = headers_len;
    let interp_len = if dynamic { interp.len() as u64 + 1 } else { 0 };
    let dynsym_off = align(interp_off + interp_len, 8);
    let dynsym_len = if dynamic { 24 * (1 + nsyms as u64) } else { 0 };
    let dynstr_off = dynsym_off + dynsym_len;
    let dynstr_len = if dynamic { dynstr.len() as u64 } else { 0 };
    let rela_off = align(dynstr_off + dynstr_len, 8);
    let rela_len = if dynamic { 24 * nsyms as u64 } else { 0 };
    let plt_off = align(rela_off + rela_len, 16);
    let plt_len = if dynamic { plt_size(target, nsyms) } else { 0 };
    let text_off = align(plt_off + plt_len, 16);
    let text_len = out.text.len() as u64;

    let rodata_off = align(text_off + text_len, PAGE);
    let rodata_len = out.rodata.len() as u64;

    let data_off = align(rodata_off + rodata_len.max(1), PAGE);
    let data_len = out.data.len() as u64;
    let got_off = align(data_off + data_len, 8);
    let got_len = if dynamic { 8 * (3 + nsyms as u64) } else { 0 };
    let dyn_off = got_off + got_len;
    let dyn_entries: u64 = if dynamic {
        (needed.len() as u64) + 9 + u64::from(target != Target::X86_64)
    } else {
        0
    };
    let dyn_len = dyn_entries * 16;
    let image_end = dyn_off + dyn_len;

    let v = |off: u64| base + off;

    let regions = Regions {
        text: v(text_off),
        rodata: v(rodata_off),
        data: v(data_off),
        plt: v(plt_off),
    };

    // Extern stubs point at their PLT entries.
    let mut stubs = FxHashMap::default();
    for (i, sym) in out.externs.iter().enumerate() {
        stubs.insert(sym.clone(), v(plt_off) + plt_entry_offset(target, i));
    }

    let resolver = Resolver {
        regions,
        labels: &out.labels,
        stubs,
    };

    // ---- Patch the text against the final layout ----
    let mut text = out.text.clone();
    apply_patches(&mut text, &out.patches, &resolver, target)?;

    // ---- Emit ----
    let mut image = Vec::with_capacity(image_end as usize);

    // ELF header
    image.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0]);
    image.extend_from_slice(&(if pie { 3u16 } else { 2u16 }).to_le_bytes()); // e_type
    image.extend_from_slice(&target.elf_machine().to_le_bytes());
    image.extend_from_slice(&1u32.to_le_bytes()); // e_version
    image.extend_from_slice(&(v(text_off) + out.entry as u64).to_le_bytes());
    image.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
    image.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    let e_flags: u32 = if target == Target::RiscV64 { 0x4 } else { 0 }; // double-float ABI
    image.extend_from_slice(&e_flags.to_le_bytes());
    image.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    image.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
    image.extend_from_slice(&(phnum as u16).to_le_bytes());
    image.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    // Program headers
    let mut phdr = |p_type: u32, flags: u32, off: u64, vaddr: u64, filesz: u64, memsz: u64, align_v: u64, image: &mut Vec<u8>| {
        image.extend_from_slice(&p_type.to_le_bytes());
        image.extend_from_slice(&flags.to_le_bytes());
        image.extend_from_slice(&off.to_le_bytes());
        image.extend_from_slice(&vaddr.to_le_bytes());
        image.extend_from_slice(&vaddr.to_le_bytes()); // paddr
        image.extend_from_slice(&filesz.to_le_bytes());
        image.extend_from_slice(&memsz.to_le_bytes());
        image.extend_from_slice(&align_v.to_le_bytes());
    };

    if dynamic {
        phdr(PT_PHDR, PF_R, 64, v(64), phnum * 56, phnum * 56, 8, &mut image);
        phdr(
            PT_INTERP,
            PF_R,
            interp_off,
            v(interp_off),
            interp_len,
            interp_len,
            1,
            &mut image,
        );
    }
    // LOAD r-x: headers through text
    phdr(
        PT_LOAD,
        PF_R | PF_X,
        0,
        v(0),
        text_off + text_len,
        text_off + text_len,
        PAGE,
        &mut image,
    );
    // LOAD r--: rodata
    phdr(
        PT_LOAD,
        PF_R,
        rodata_off,
        v(rodata_off),
        rodata_len.max(1),
        rodata_len.max(1),
        PAGE,
        &mut image,
    );
    // LOAD rw-: data + got + dynamic
    phdr(
        PT_LOAD,
        PF_R | PF_W,
        data_off,
        v(data_off),
        image_end - data_off,
        image_end - data_off,
        PAGE,
        &mut image,
    );
    if dynamic {
        phdr(
            PT_DYNAMIC,
            PF_R | PF_W,
            dyn_off,
            v(dyn_off),
            dyn_len,
            dyn_len,
            8,
            &mut image,
        );
    }
    phdr(PT_GNU_STACK, PF_R | PF_W, 0, 0, 0, 0, 16, &mut image);

    // .interp
    pad_to(&mut image, interp_off as usize);
    if dynamic {
        image.extend_from_slice(interp);
        image.push(0);
    }

    // .dynsym: null entry + one per import
    pad_to(&mut image, dynsym_off as usize);
    if dynamic {
        image.extend_from_slice(&[0u8; 24]);
        for name_off in &sym_name_offsets {
            image.extend_from_slice(&name_off.to_le_bytes());
            image.push(0x12); // GLOBAL | FUNC
            image.push(0);
            image.extend_from_slice(&0u16.to_le_bytes()); // SHN_UNDEF
            image.extend_from_slice(&0u64.to_le_bytes());
            image.extend_from_slice(&0u64.to_le_bytes());
        }
    }

    // .dynstr
    pad_to(&mut image, dynstr_off as usize);
    if dynamic {
        image.extend_from_slice(&dynstr);
    }

    // .rela.plt
    pad_to(&mut image, rela_off as usize);
    if dynamic {
        for i in 0..nsyms {
            let got_slot = v(got_off) + 8 * (3 + i as u64);
            image.extend_from_slice(&got_slot.to_le_bytes());
            let info = ((i as u64 + 1) << 32) | jump_slot_reloc(target);
            image.extend_from_slice(&info.to_le_bytes());
            image.extend_from_slice(&0u64.to_le_bytes());
        }
    }

    // .plt
    pad_to(&mut image, plt_off as usize);
    if dynamic {
        let plt = build_plt(target, nsyms, v(plt_off), v(got_off));
        image.extend_from_slice(&plt);
    }

    // .text
    pad_to(&mut image, text_off as usize);
    image.extend_from_slice(&text);

    // .rodata
    pad_to(&mut image, rodata_off as usize);
    if out.rodata.is_empty() {
        image.push(0);
    } else {
        image.extend_from_slice(&out.rodata);
    }

    // .data
    pad_to(&mut image, data_off as usize);
    image.extend_from_slice(&out.data);

    // .got.plt
    pad_to(&mut image, got_off as usize);
    if dynamic {
        image.extend_from_slice(&v(dyn_off).to_le_bytes()); // got[0] = &dynamic
        image.extend_from_slice(&0u64.to_le_bytes());
        image.extend_from_slice(&0u64.to_le_bytes());
        for i in 0..nsyms {
            // Lazy x86 slots point back at the push in their PLT entry;
            // eager targets start at zero and bind at load.
            let initial = match target {
                Target::X86_64 => v(plt_off) + plt_entry_offset(target, i) + 6,
                _ => 0,
            };
            image.extend_from_slice(&initial.to_le_bytes());
        }
    }

    // .dynamic
    pad_to(&mut image, dyn_off as usize);
    if dynamic {
        let mut dyn_entry = |tag: u64, val: u64, image: &mut Vec<u8>| {
            image.extend_from_slice(&tag.to_le_bytes());
            image.extend_from_slice(&val.to_le_bytes());
        };
        for off in &lib_offsets {
            dyn_entry(DT_NEEDED, *off, &mut image);
        }
        dyn_entry(DT_STRTAB, v(dynstr_off), &mut image);
        dyn_entry(DT_SYMTAB, v(dynsym_off), &mut image);
        dyn_entry(DT_STRSZ, dynstr.len() as u64, &mut image);
        dyn_entry(DT_SYMENT, 24, &mut image);
        dyn_entry(DT_PLTGOT, v(got_off), &mut image);
        dyn_entry(DT_PLTRELSZ, rela_len, &mut image);
        dyn_entry(DT_PLTREL, 7, &mut image); // RELA
        dyn_entry(DT_JMPREL, v(rela_off), &mut image);
        if target != Target::X86_64 {
            // Eager PLT stubs on ARM64/RISC-V need load-time binding.
            dyn_entry(DT_FLAGS, DF_BIND_NOW, &mut image);
        }
        dyn_entry(DT_NULL, 0, &mut image);
    }

    crate::verify_no_placeholders(&image)?;
    Ok(image)
}

fn pad_to(image: &mut Vec<u8>, offset: usize) {
    debug_assert!(image.len() <= offset, "layout overlap at {offset:#x}");
    image.resize(offset, 0);
}

/// PLT sizing: x86 carries the lazy-resolution PLT0, the word ISAs use
/// eager 16-byte stubs.
fn plt_size(target: Target, nsyms: usize) -> u64 {
    match target {
        Target::X86_64 => 16 + 16 * nsyms as u64,
        _ => 16 * nsyms as u64,
    }
}

fn plt_entry_offset(target: Target, index: usize) -> u64 {
    match target {
        Target::X86_64 => 16 + 16 * index as u64,
        _ => 16 * index as u64,
    }
}

/// Build the PLT bytes for the final addresses.
fn build_plt(target: Target, nsyms: usize, plt_vaddr: u64, got_vaddr: u64) -> Vec<u8> {
    let mut plt = Vec::new();
    match target {
        Target::X86_64 => {
            // PLT0: push got[1]; jmp [got[2]]
            let here = plt_vaddr;
            plt.push(0xFF);
            plt.push(0x35);
            plt.extend_from_slice(
                &((got_vaddr + 8) as i64 - (here as i64 + 6)).to_le_bytes()[..4].to_vec(),
            );
            plt.push(0xFF);
            plt.push(0x25);
            plt.extend_from_slice(
                &((got_vaddr + 16) as i64 - (here as i64 + 12)).to_le_bytes()[..4].to_vec(),
            );
            plt.extend_from_slice(&[0x0F, 0x1F, 0x40, 0x00]); // nop pad

            for i in 0..nsyms {
                let entry = plt_vaddr + 16 + 16 * i as u64;
                let got_slot = got_vaddr + 8 * (3 + i as u64);
                // jmp [got_slot]
                plt.push(0xFF);
                plt.push(0x25);
                plt.extend_from_slice(
                    &(got_slot as i64 - (entry as i64 + 6)).to_le_bytes()[..4].to_vec(),
                );
                // push reloc index
                plt.push(0x68);
                plt.extend_from_slice(&(i as u32).to_le_bytes());
                // jmp PLT0
                plt.push(0xE9);
                let after = entry + 16;
                plt.extend_from_slice(
                    &(plt_vaddr as i64 - after as i64).to_le_bytes()[..4].to_vec(),
                );
            }
        }
        Target::Arm64 => {
            for i in 0..nsyms {
                let entry = plt_vaddr + 16 * i as u64;
                let got_slot = got_vaddr + 8 * (3 + i as u64);
                let pages = ((got_slot & !0xFFF) as i64 - (entry & !0xFFF) as i64) >> 12;
                // adrp x16, page(got_slot)
                let adrp = 0x9000_0010u32
                    | (((pages as u32) & 3) << 29)
                    | ((((pages as u32) >> 2) & 0x7_FFFF) << 5);
                plt.extend_from_slice(&adrp.to_le_bytes());
                // ldr x17, [x16, lo12]
                let ldr = 0xF940_0211u32 | ((((got_slot & 0xFFF) / 8) as u32) << 10);
                plt.extend_from_slice(&ldr.to_le_bytes());
                // br x17
                plt.extend_from_slice(&0xD61F_0220u32.to_le_bytes());
                plt.extend_from_slice(&0xD503_201Fu32.to_le_bytes()); // nop
            }
        }
        Target::RiscV64 => {
            for i in 0..nsyms {
                let entry = plt_vaddr + 16 * i as u64;
                let got_slot = got_vaddr + 8 * (3 + i as u64);
                let off = got_slot as i64 - entry as i64;
                let hi = (off + 0x800) >> 12;
                let lo = (off - (hi << 12)) as i32;
                // auipc t3, hi
                let auipc = 0x0000_0E17u32 | ((hi as u32 & 0xF_FFFF) << 12);
                plt.extend_from_slice(&auipc.to_le_bytes());
                // ld t3, lo(t3)
                let ld = 0x000E_3E03u32 | (((lo as u32) & 0xFFF) << 20);
                plt.extend_from_slice(&ld.to_le_bytes());
                // jr t3
                plt.extend_from_slice(&0x000E_0067u32.to_le_bytes());
                plt.extend_from_slice(&0x0000_0013u32.to_le_bytes()); // nop
            }
        }
    }
    plt
}
