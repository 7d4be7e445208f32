//! A compiler for a small imperative language. Source text goes through
//! [`frontend`] into an AST, [`middle`] checks it and lowers it to MIR and
//! then LIR, and [`backend`] turns LIR into NASM assembly for x86-64.

pub mod backend;
pub mod error;
pub mod frontend;
pub mod index;
pub mod middle;

#[cfg(test)]
mod testing;

use crate::{
    backend::{
        CodegenOptions,
        targets::{CodeGenerator, Target},
    },
    error::CompileError,
    frontend::{SourceFile, parser::Parser},
    middle::{
        lir::{self, mir_lowering::lower_program},
        mir::{self, build::build_function},
        resolve::Resolver,
        type_check::Checker,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Run the MIR block simplifier and the LIR peephole pass
    pub optimize: bool,
    /// Annotate the assembly with the LIR each instruction came from
    pub emit_debug_comments: bool,
    pub dump_mir: bool,
    pub dump_lir: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            emit_debug_comments: false,
            dump_mir: false,
            dump_lir: false,
        }
    }
}

/// Compiles one source file to NASM assembly
pub fn compile(source_file: &SourceFile, options: &CompileOptions) -> Result<String, CompileError> {
    tracing::debug!(origin = %source_file.origin, "compiling");

    let module = Parser::parse_module(source_file)?;

    let resolutions = Resolver::resolve_names(&module)?;

    let mut checker = Checker::new(&resolutions);
    checker.check_program(&module)?;
    tracing::debug!("type checked");

    let mut bodies = Vec::new();

    for id in &resolutions.functions {
        let has_body = resolutions
            .function(*id)
            .is_some_and(|decl| decl.body.is_some());

        if !has_body {
            continue;
        }

        let mut function = build_function(&mut checker, *id)?;

        if options.optimize {
            mir::optimize::optimize_function(&mut function);
        }

        if options.dump_mir {
            println!("{}", mir::pretty_print::pretty_print_mir(&function));
        }

        bodies.push(function);
    }

    tracing::debug!(functions = bodies.len(), "built mir");

    let mut program = lower_program(&module, &resolutions, bodies)?;

    if options.optimize {
        lir::optimize::optimize_program(&mut program);
    }

    if options.dump_lir {
        println!("{}", lir::pretty_print::pretty_print_lir(&program));
    }

    let codegen_options = CodegenOptions {
        emit_debug_comments: options.emit_debug_comments,
    };

    let asm = Target::default()
        .get_code_generator()
        .translate_to_asm(&program, &codegen_options)?;

    tracing::debug!(bytes = asm.len(), "generated assembly");

    Ok(asm)
}
