//! Structural checks over written ELF images: header fields, program
//! header alignment, interpreter and dynamic segments, and the absence
//! of placeholder bytes.

use velo_codegen::{generate, CodegenOptions};
use velo_isa::{Os, Target};
use velo_object::elf::write_elf;

fn build(source: &str, target: Target, pie: bool) -> Vec<u8> {
    let module = velo_parser::parse(source).expect("parse");
    let opts = CodegenOptions {
        target,
        os: Os::Linux,
        pie,
        verbose: false,
    };
    let out = generate(&module, &opts).expect("codegen");
    write_elf(&out, target, pie, &[]).expect("elf write")
}

fn u16_at(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn u32_at(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn u64_at(b: &[u8], off: usize) -> u64 {
    let mut v = [0u8; 8];
    v.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(v)
}

const HELLO: &str = "println(42)\n";
const DYNAMIC: &str = "import \"libSDL2\" sdl\nsdl.init(0 as int32)\nprintln(1)\n";

#[test]
fn test_elf_ident() {
    let image = build(HELLO, Target::X86_64, true);
    assert_eq!(&image[0..4], &[0x7F, 0x45, 0x4C, 0x46], "magic");
    assert_eq!(image[4], 2, "class ELF64");
    assert_eq!(image[5], 1, "little-endian");
    assert_eq!(image[7], 3, "OS/ABI Linux");
}

#[test]
fn test_elf_type_and_machine() {
    for (target, machine) in [
        (Target::X86_64, 62u16),
        (Target::Arm64, 183),
        (Target::RiscV64, 243),
    ] {
        let pie = build(HELLO, target, true);
        assert_eq!(u16_at(&pie, 16), 3, "{target}: ET_DYN for PIE");
        assert_eq!(u16_at(&pie, 18), machine, "{target}: e_machine");

        let fixed = build(HELLO, target, false);
        assert_eq!(u16_at(&fixed, 16), 2, "{target}: ET_EXEC");
    }
}

#[test]
fn test_load_segments_page_aligned() {
    let image = build(DYNAMIC, Target::X86_64, true);
    let phoff = u64_at(&image, 32) as usize;
    let phnum = u16_at(&image, 56) as usize;

    let mut loads = 0;
    for i in 0..phnum {
        let p = phoff + i * 56;
        let p_type = u32_at(&image, p);
        if p_type == 1 {
            loads += 1;
            let align = u64_at(&image, p + 48);
            let vaddr = u64_at(&image, p + 16);
            assert_eq!(align, 0x1000, "PT_LOAD align");
            assert_eq!(vaddr % 0x1000, 0, "PT_LOAD vaddr alignment");
        }
    }
    assert!(loads >= 2, "at least text and data loads");
}

#[test]
fn test_interp_present_for_dynamic() {
    let image = build(DYNAMIC, Target::X86_64, true);
    let phoff = u64_at(&image, 32) as usize;
    let phnum = u16_at(&image, 56) as usize;

    let mut interp = None;
    for i in 0..phnum {
        let p = phoff + i * 56;
        if u32_at(&image, p) == 3 {
            let off = u64_at(&image, p + 8) as usize;
            let len = u64_at(&image, p + 32) as usize;
            interp = Some(&image[off..off + len]);
        }
    }
    let interp = interp.expect("PT_INTERP present");
    assert!(
        interp.starts_with(b"/lib64/ld-linux-x86-64.so.2"),
        "plausible absolute interpreter path"
    );
}

#[test]
fn test_dynamic_segment_nonempty() {
    let image = build(DYNAMIC, Target::X86_64, true);
    let phoff = u64_at(&image, 32) as usize;
    let phnum = u16_at(&image, 56) as usize;

    let mut found = false;
    for i in 0..phnum {
        let p = phoff + i * 56;
        if u32_at(&image, p) == 2 {
            found = true;
            assert!(u64_at(&image, p + 32) > 0, "PT_DYNAMIC filesz");
        }
    }
    assert!(found, "PT_DYNAMIC present for dynamic builds");
}

#[test]
fn test_entry_points_into_text_load() {
    let image = build(HELLO, Target::X86_64, true);
    let entry = u64_at(&image, 24);
    let phoff = u64_at(&image, 32) as usize;
    let phnum = u16_at(&image, 56) as usize;

    let mut covered = false;
    for i in 0..phnum {
        let p = phoff + i * 56;
        if u32_at(&image, p) == 1 {
            let vaddr = u64_at(&image, p + 16);
            let memsz = u64_at(&image, p + 40);
            let flags = u32_at(&image, p + 4);
            if entry >= vaddr && entry < vaddr + memsz && flags & 1 != 0 {
                covered = true;
            }
        }
    }
    assert!(covered, "entry lies in an executable PT_LOAD");
}

#[test]
fn test_no_placeholder_survives() {
    for target in [Target::X86_64, Target::Arm64, Target::RiscV64] {
        let image = build(DYNAMIC, target, true);
        for sentinel in [0xDEAD_BEEFu32, 0x1234_5678] {
            let needle = sentinel.to_le_bytes();
            assert!(
                !image.windows(4).any(|w| w == needle),
                "{target}: {sentinel:#x} must not survive into the file"
            );
        }
    }
}

#[test]
fn test_non_pie_base() {
    let image = build(HELLO, Target::X86_64, false);
    let entry = u64_at(&image, 24);
    assert!(entry >= 0x40_0000, "non-PIE images start at 0x400000");
}

#[test]
fn test_pe_smoke() {
    let module = velo_parser::parse(HELLO).unwrap();
    let opts = CodegenOptions {
        target: Target::X86_64,
        os: Os::Windows,
        pie: false,
        verbose: false,
    };
    let out = generate(&module, &opts).unwrap();
    let image = velo_object::pe::write_pe(&out, Target::X86_64).unwrap();
    assert_eq!(&image[0..2], b"MZ");
    let pe_off = u32_at(&image, 0x3C) as usize;
    assert_eq!(&image[pe_off..pe_off + 4], b"PE\0\0");
    assert_eq!(u16_at(&image, pe_off + 4), 0x8664, "machine");
    // Optional header magic 0x20B
    assert_eq!(u16_at(&image, pe_off + 24), 0x20B);
}
