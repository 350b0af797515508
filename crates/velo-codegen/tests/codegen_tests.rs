//! Whole-pipeline codegen tests: parse real programs and generate code
//! for every target, checking labels, flags and import records.

use velo_codegen::{generate, CodegenOptions};
use velo_isa::{Os, Target};

const TARGETS: [Target; 3] = [Target::X86_64, Target::Arm64, Target::RiscV64];

fn compile(source: &str, target: Target) -> velo_codegen::CodegenOutput {
    let module = velo_parser::parse(source).expect("parse");
    let opts = CodegenOptions {
        target,
        os: Os::Linux,
        pie: true,
        verbose: false,
    };
    generate(&module, &opts).expect("codegen")
}

#[test]
fn test_arithmetic_program() {
    for target in TARGETS {
        let out = compile("result = 84 / 2\nprintln(result)\n", target);
        assert!(!out.text.is_empty(), "{target}");
        assert!(out.labels.contains_key("_start"));
        assert!(out.labels.contains_key("__toplevel"));
        assert!(out.entry > 0);
    }
}

#[test]
fn test_factorial_with_recursion_cap() {
    let source = "factorial = (n, acc) -> n == 0 {\n    1 => acc\n    _ => factorial(n - 1, acc * n) max 100\n}\nprintln(factorial(5, 1))\n";
    for target in TARGETS {
        let out = compile(source, target);
        assert!(out.labels.contains_key("factorial"), "{target}");
        // The bounded cap allocates a counter slot in .data
        assert!(!out.data.is_empty());
    }
}

#[test]
fn test_ackermann() {
    let source = "ack = (m, n) -> {\n    | m == 0 => n + 1\n    | n == 0 => ack(m - 1, 1) max inf\n    _ => ack(m - 1, ack(m, n - 1) max inf) max inf\n}\nprintln(ack(3, 3))\n";
    for target in TARGETS {
        let out = compile(source, target);
        assert!(out.labels.contains_key("ack"), "{target}");
    }
}

#[test]
fn test_guard_match_program() {
    let source = "classify = age -> {\n    | age < 13 => 1\n    | age < 18 => 2\n    | age < 65 => 3\n    _ => 4\n}\nprintln(classify(20))\n";
    for target in TARGETS {
        let out = compile(source, target);
        assert!(out.labels.contains_key("classify"), "{target}");
    }
}

#[test]
fn test_defer_program() {
    let source = "main = () {\n    println(f\"1. Start\")\n    defer println(f\"4. Deferred first\")\n    println(f\"2. Middle\")\n    defer println(f\"3. Deferred last\")\n    println(f\"Program end\")\n}\n";
    for target in TARGETS {
        let out = compile(source, target);
        assert!(out.labels.contains_key("main"), "{target}");
    }
}

#[test]
fn test_fma_fold_sets_flag() {
    let source = "a = 2\nb = 3\nc = 4\nprintln(a*b + c)\n";
    for target in TARGETS {
        let out = compile(source, target);
        assert!(out.flags.uses_fma, "{target}: FMA flag must be set");
    }
}

#[test]
fn test_literal_fma_folds_away() {
    // All-literal operands fold to 10 before codegen; no FMA emitted.
    let out = compile("println(2*3 + 4)\n", Target::X86_64);
    assert!(!out.flags.uses_fma);
}

#[test]
fn test_ffi_import_dedup() {
    let source = "import \"libSDL2\" sdl\nsdl.init(3 as int32)\nsdl.init(0 as int32)\nsdl.quit(0 as int32)\n";
    let out = compile(source, Target::X86_64);
    assert!(out.flags.use_dynamic_linking);
    let inits = out.externs.iter().filter(|e| *e == "init").count();
    assert_eq!(inits, 1, "duplicate imports must collapse");
    assert!(out.externs.iter().any(|e| e == "quit"));
}

#[test]
fn test_string_concat_uses_arena() {
    let source = "x = f\"velo\"\ny = x + f\"!\"\nprintln(y)\n";
    let out = compile(source, Target::X86_64);
    assert!(out.flags.uses_arenas);
    assert!(out.labels.contains_key("velo_string_concat"));
    assert!(out.labels.contains_key("velo_arena_alloc"));
}

#[test]
fn test_undefined_identifier_is_fatal() {
    let module = velo_parser::parse("println(nope)\n").unwrap();
    let opts = CodegenOptions {
        target: Target::X86_64,
        os: Os::Linux,
        pie: true,
        verbose: false,
    };
    let err = generate(&module, &opts).unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[test]
fn test_unreachable_function_dropped() {
    let source = "used = x -> x + 1\nunused = x -> x * 2\nprintln(used(3))\n";
    let out = compile(source, Target::X86_64);
    assert!(out.labels.contains_key("used"));
    assert!(
        !out.labels.contains_key("unused"),
        "unreachable functions must be dropped before emission"
    );
}

#[test]
fn test_loops_compile() {
    let source = "total := 0\n@ i: 0..10 {\n    total = total + i\n}\nprintln(total)\n";
    for target in TARGETS {
        let out = compile(source, target);
        assert!(!out.text.is_empty(), "{target}");
    }
}

#[test]
fn test_parallel_loop_compiles() {
    let source = "@@ i: 0..4 {\n    println(i)\n}\n";
    let out = compile(source, Target::X86_64);
    assert!(!out.text.is_empty());
}

#[test]
fn test_arena_block_emits_push_pop() {
    let source = "arena {\n    xs = [1, 2, 3]\n    println(xs)\n}\n";
    let out = compile(source, Target::X86_64);
    assert!(out.flags.uses_arenas);
    assert!(out.labels.contains_key("velo_arena_push"));
    assert!(out.labels.contains_key("velo_arena_pop"));
}

#[test]
fn test_unsafe_block_per_target() {
    let source = "r = unsafe {\n    x86\n    rax = 42\n} {\n    arm64\n    x0 = 42\n} {\n    riscv64\n    a0 = 42\n} as num\nprintln(r)\n";
    for target in TARGETS {
        let out = compile(source, target);
        assert!(!out.text.is_empty(), "{target}");
    }
}

#[test]
fn test_channels_and_spawn() {
    let source = "worker = n -> n * 2\nc = chan(9000)\nh = spawn worker(1)\nc <- 42\nr <= c\nprintln(r)\n";
    let out = compile(source, Target::X86_64);
    assert!(out.labels.contains_key("velo_chan_make"));
    assert!(out.labels.contains_key("velo_chan_send"));
    assert!(out.labels.contains_key("velo_chan_recv"));
}

#[test]
fn test_string_return_type_reaches_print() {
    // classify returns strings from every arm, so the call site prints
    // through the string path rather than the number formatter.
    let source = "classify = age -> {\n    | age < 13 => f\"child\"\n    | age < 18 => f\"teen\"\n    | age < 65 => f\"adult\"\n    _ => f\"senior\"\n}\nprintln(classify(20))\n";
    let out = compile(source, Target::X86_64);
    assert!(out.labels.contains_key("velo_print_str"));
}

#[test]
fn test_entry_is_start_label() {
    let out = compile("println(1)\n", Target::X86_64);
    let start = out.labels.get("_start").expect("_start defined");
    assert_eq!(start.offset, out.entry);
}
