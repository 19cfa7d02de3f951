//! cmm compiler CLI: reads source from stdin, writes x86-64 assembly to
//! stdout. A single stdin-to-stdout shape rather than subcommands — there's
//! nothing here to lint, test or package.

use clap::Parser as ClapParser;
use std::io::{self, Read, Write};
use std::process;

use cmmc::CompilerConfig;

#[derive(ClapParser)]
#[command(name = "cmmc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "cmm compiler: source on stdin, x86-64 assembly on stdout", long_about = None)]
struct Cli {
    /// Physical register budget for the allocator (spec's X86_64_REGCOUNT).
    #[arg(long, default_value_t = cmmc::config::DEFAULT_REGCOUNT)]
    regcount: usize,

    /// Print the annotated instruction chain to stderr before emitting assembly.
    #[arg(long)]
    dump_ir: bool,

    /// Print a textual AST reconstruction to stderr before lowering.
    #[arg(long)]
    ast: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut source = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut source) {
        eprintln!("error: failed to read stdin: {e}");
        process::exit(1);
    }

    let config = CompilerConfig::new()
        .with_regcount(cli.regcount)
        .with_dump_ir(cli.dump_ir)
        .with_dump_ast(cli.ast);

    match cmmc::compile(&source, &config) {
        Ok(asm) => {
            if let Err(e) = io::stdout().write_all(asm.as_bytes()) {
                eprintln!("error: failed to write stdout: {e}");
                process::exit(1);
            }
        }
        Err(cmmc::CmmError::Compile(e)) => {
            eprintln!("{e}");
            process::exit(e.kind.code());
        }
        Err(e @ cmmc::CmmError::Alloc(_)) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
