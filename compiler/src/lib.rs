//! cmm: a small imperative, statically typed, C-like language compiled to
//! x86-64 assembly.
//!
//! The pipeline mirrors spec §6's own sequencing: parse drives the builder
//! through the AST operations, each of which lowers straight into annotated
//! ILOC-style three-address IR as it goes; [`compile`] then links the
//! driver's chain in front of every function body and hands the result to
//! the register allocator and assembly emitter.

pub mod ast;
pub mod asmgen;
pub mod builder;
pub mod config;
pub mod ir;
pub mod irgen;
pub mod lexer;
pub mod namebag;
pub mod parser;
pub mod regalloc;
pub mod strsize;

pub use builder::Compiler;
pub use cmm_core::{CompileError, ErrorKind};
pub use config::CompilerConfig;
pub use regalloc::AllocError;

use ir::Chain;

/// Top-level failure from either phase of [`compile`]: a front-end semantic
/// error (spec §7) or a backend register-allocation overflow (spec §4.5).
/// Kept as a plain enum rather than a `Box<dyn Error>`, the way the front
/// end's own `CompileError` is reported — there's only ever these two
/// sources, and callers (the CLI) want to match on which one happened to
/// pick an exit code.
#[derive(Debug)]
pub enum CmmError {
    Compile(CompileError),
    Alloc(AllocError),
}

impl std::fmt::Display for CmmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CmmError::Compile(e) => write!(f, "{e}"),
            CmmError::Alloc(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CmmError {}

impl From<CompileError> for CmmError {
    fn from(e: CompileError) -> Self {
        CmmError::Compile(e)
    }
}

impl From<AllocError> for CmmError {
    fn from(e: AllocError) -> Self {
        CmmError::Alloc(e)
    }
}

/// Compiles `source` to x86-64 AT&T assembly text.
///
/// Runs the whole pipeline: parse + build (AST and IR both fall out of the
/// builder calls the parser drives), link the program driver's prelude in
/// front of every function body in source order, allocate registers per
/// function, and render assembly.
///
/// `stack_start`/`data_start` are vestigial: the driver builds its
/// `rsp`/`rfp`/`rbss` prelude around them (`Compiler::gen_program_driver`),
/// but `asmgen` renders those particular loads as a `leaq` against the
/// backing label instead of the literal immediate (ILOC has no notion of a
/// link-time address, so the immediate was always a placeholder). Passing
/// `0` for both is correct and is what [`compile`] does.
pub fn compile(source: &str, config: &CompilerConfig) -> Result<String, CmmError> {
    let mut compiler = Compiler::new();
    let functions = parser::parse_program(&mut compiler, source)?;

    if config.dump_ast {
        for &id in &functions {
            eprint!("{}", compiler.ast.dump(id));
        }
    }

    let driver = compiler.gen_program_driver(0, 0);
    let function_chains = functions.iter().map(|&id| compiler.ast.get(id).ir.unwrap_or_else(Chain::empty));
    let program = compiler.arena.append_all(std::iter::once(driver).chain(function_chains));

    // The driver always ends in a `halt` (`gen_program_driver`), so its
    // chain, and hence the linked program chain, is never empty.
    let head = program.head.expect("driver chain is never empty");

    if config.dump_ir {
        for id in compiler.arena.walk(Some(head)) {
            eprintln!("{:?}", compiler.arena.get(id));
        }
    }

    Ok(asmgen::generate_asm(&mut compiler.arena, &compiler.scope, head, config.regcount)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_program_to_assembly() {
        let source = "int main() { return 0; }";
        let asm = compile(source, &CompilerConfig::default()).unwrap();
        assert!(asm.contains(".globl main"));
        assert!(asm.contains(".text"));
        assert!(asm.contains(".data"));
    }

    #[test]
    fn reports_parse_errors_as_compile_errors() {
        let source = "int main() { return }";
        let err = compile(source, &CompilerConfig::default()).unwrap_err();
        assert!(matches!(err, CmmError::Compile(_)));
    }

    #[test]
    fn compiles_a_source_file_read_from_a_temp_directory() {
        use std::fs;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("prog.cmm");
        fs::write(&path, "int main() { output(1 + 2); return 0; }").unwrap();

        let source = fs::read_to_string(&path).unwrap();
        let asm = compile(&source, &CompilerConfig::default()).unwrap();
        assert!(asm.contains(".globl main"));
    }

    #[test]
    fn reports_register_overflow_with_a_tiny_budget() {
        let source = "int main() { int a; int b; int c; int d; int e; int f; int g; a = 1; b = 2; c = 3; d = 4; e = 5; f = 6; g = a + b + c + d + e + f; return g; }";
        let config = CompilerConfig::new().with_regcount(1);
        let err = compile(source, &config).unwrap_err();
        assert!(matches!(err, CmmError::Alloc(_)));
    }
}
