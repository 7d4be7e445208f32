//! Shortcuts for driving the pipeline from unit tests

use crate::{
    frontend::{SourceFile, parser::Parser},
    middle::{
        lir::{self, interpret::Interpreter, mir_lowering::lower_program},
        mir::{self, build::build_function},
        resolve::Resolver,
        type_check::Checker,
    },
};

/// Unoptimized MIR of every function with a body, in declaration order
pub fn build_mir(source: &str) -> Vec<mir::Function> {
    let source_file = SourceFile::from_memory(source);
    let module = Parser::parse_module(&source_file).expect("parse");
    let resolutions = Resolver::resolve_names(&module).expect("resolve");

    let mut checker = Checker::new(&resolutions);
    checker.check_program(&module).expect("type check");

    resolutions
        .functions
        .iter()
        .filter(|id| {
            resolutions
                .function(**id)
                .is_some_and(|decl| decl.body.is_some())
        })
        .map(|id| build_function(&mut checker, *id).expect("build mir"))
        .collect()
}

/// LIR for `source`, with both optimization passes when `optimize` is set
pub fn lower_source(source: &str, optimize: bool) -> lir::Program {
    let source_file = SourceFile::from_memory(source);
    let module = Parser::parse_module(&source_file).expect("parse");
    let resolutions = Resolver::resolve_names(&module).expect("resolve");

    let mut checker = Checker::new(&resolutions);
    checker.check_program(&module).expect("type check");

    let mut bodies = Vec::new();

    for id in &resolutions.functions {
        if resolutions
            .function(*id)
            .is_some_and(|decl| decl.body.is_some())
        {
            let mut function = build_function(&mut checker, *id).expect("build mir");

            if optimize {
                mir::optimize::optimize_function(&mut function);
            }

            bodies.push(function);
        }
    }

    let mut program = lower_program(&module, &resolutions, bodies).expect("lower to lir");

    if optimize {
        lir::optimize::optimize_program(&mut program);
    }

    program
}

/// Interprets `label` in both the optimized and the unoptimized program and
/// checks they agree
pub fn run(source: &str, label: &str, arguments: &[i64]) -> Result<i64, String> {
    let raw = lower_source(source, false);
    let optimized = lower_source(source, true);

    let expected = Interpreter::new(&raw).call_by_label(label, arguments);
    let actual = Interpreter::new(&optimized).call_by_label(label, arguments);

    assert_eq!(
        expected, actual,
        "optimization changed the result of {label}{arguments:?}"
    );

    actual
}
