//! The `velo` compiler driver.
//!
//! Thin surface over the pipeline: read source, parse, build the
//! dependency graph, generate code for the requested target, write the
//! executable. Diagnostics render with source context; any compile
//! error exits with status 1.

mod output;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use velo_codegen::CodegenOptions;
use velo_isa::{Os, Target};

#[derive(Parser)]
#[command(name = "velo")]
#[command(about = "Velo native compiler")]
#[command(version)]
struct Cli {
    /// Root source file
    input: PathBuf,

    /// Output executable path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target triple: {x86_64,arm64,riscv64}-{linux,windows}
    #[arg(long, default_value = "x86_64-linux")]
    target: String,

    /// Trace emitted mnemonics to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Produce a fixed-base (non-PIE) executable
    #[arg(long = "static")]
    static_base: bool,

    /// Dump the parsed AST as JSON and exit
    #[arg(long)]
    emit_ast: bool,

    /// Linker search paths (recorded for the import resolver)
    #[arg(short = 'L', value_name = "PATH")]
    search_paths: Vec<PathBuf>,

    /// Libraries to declare as DT_NEEDED
    #[arg(short = 'l', value_name = "LIB")]
    libs: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        output::error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let (target, os) = parse_triple(&cli.target)?;

    let source = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;

    let module = match velo_parser::parse(&source) {
        Ok(module) => module,
        Err(errors) => {
            velo_parser::diagnostics::render_errors(
                &cli.input.display().to_string(),
                &source,
                &errors,
            );
            bail!("{} error(s)", errors.len());
        }
    };

    if cli.emit_ast {
        println!("{}", serde_json::to_string_pretty(&module)?);
        return Ok(());
    }

    let opts = CodegenOptions {
        target,
        os,
        pie: !cli.static_base && os == Os::Linux,
        verbose: cli.verbose,
    };
    let generated = velo_codegen::generate(&module, &opts)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let libs = expand_libs(&cli.libs);
    let image = match os {
        Os::Linux => velo_object::elf::write_elf(&generated, target, opts.pie, &libs)?,
        Os::Windows => velo_object::pe::write_pe(&generated, target)?,
    };

    let out_path = cli.output.clone().unwrap_or_else(|| default_output(cli, os));
    std::fs::write(&out_path, &image)
        .with_context(|| format!("writing {}", out_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(0o755))?;
    }

    output::success(&format!(
        "{} → {} ({} bytes, {target})",
        cli.input.display(),
        out_path.display(),
        image.len()
    ));
    Ok(())
}

fn default_output(cli: &Cli, os: Os) -> PathBuf {
    let stem = cli
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "a.out".to_string());
    match os {
        Os::Windows => PathBuf::from(format!("{stem}.exe")),
        Os::Linux => PathBuf::from(stem),
    }
}

/// `-l SDL2` → `libSDL2.so` style sonames for DT_NEEDED.
fn expand_libs(libs: &[String]) -> Vec<String> {
    libs.iter()
        .map(|l| {
            if l.contains(".so") || l.contains(".dll") {
                l.clone()
            } else {
                format!("lib{l}.so")
            }
        })
        .collect()
}

fn parse_triple(triple: &str) -> Result<(Target, Os)> {
    let Some((arch, os)) = triple.split_once('-') else {
        bail!("malformed target `{triple}` (expected arch-os)");
    };
    let target = match arch {
        "x86_64" | "amd64" => Target::X86_64,
        "arm64" | "aarch64" => Target::Arm64,
        "riscv64" => Target::RiscV64,
        other => bail!("unknown architecture `{other}`"),
    };
    let os = match os {
        "linux" => Os::Linux,
        "windows" => Os::Windows,
        other => bail!("unknown OS `{other}`"),
    };
    if os == Os::Windows && target != Target::X86_64 {
        bail!("windows output is x86-64 only");
    }
    Ok((target, os))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_triple() {
        assert_eq!(
            parse_triple("x86_64-linux").unwrap(),
            (Target::X86_64, Os::Linux)
        );
        assert_eq!(
            parse_triple("aarch64-linux").unwrap(),
            (Target::Arm64, Os::Linux)
        );
        assert_eq!(
            parse_triple("riscv64-linux").unwrap(),
            (Target::RiscV64, Os::Linux)
        );
        assert_eq!(
            parse_triple("x86_64-windows").unwrap(),
            (Target::X86_64, Os::Windows)
        );
        assert!(parse_triple("mips-linux").is_err());
        assert!(parse_triple("arm64-windows").is_err());
        assert!(parse_triple("bare").is_err());
    }

    #[test]
    fn test_expand_libs() {
        assert_eq!(expand_libs(&["SDL2".into()]), vec!["libSDL2.so"]);
        assert_eq!(expand_libs(&["libc.so.6".into()]), vec!["libc.so.6"]);
    }
}
