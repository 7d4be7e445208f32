use std::fmt::Write;

use colored::Colorize;
use itertools::Itertools;

use super::{Function, Statement, Terminator, Value};

pub fn pretty_print_mir(function: &Function) -> String {
    let mut output = String::new();

    let parameters = function
        .param_locals
        .iter()
        .map(|local| format!("_{local}: {}", function.locals[*local].ty))
        .join(", ");

    let _ = writeln!(
        output,
        "{} {}({parameters}) -> {} {}",
        "fn".magenta(),
        function.name.blue(),
        function.locals[function.return_local].ty,
        "{".white()
    );

    for local in function.locals.iter() {
        let _ = write!(output, "    {} _{}: {}", "let".magenta(), local.id, local.ty);

        match &local.ident {
            Some(ident) => {
                let _ = writeln!(output, " {}", format!("// {ident}").bright_black());
            }
            None => output.push('\n'),
        }
    }

    for block in function.blocks.values() {
        let _ = writeln!(output, "{}", format!("  bb{}:", block.id).bright_red());

        for statement in &block.statements {
            let _ = writeln!(output, "    {}", statement);
        }

        let _ = writeln!(output, "    {}", block.terminator);
    }

    output.push_str(&"}".white().to_string());
    output.push('\n');

    output
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value.to_string().purple()),
            Value::Str(value) => write!(f, "{}", format!("{value:?}").green()),
            Value::Function(id) => write!(f, "{}", format!("fn#{id}").blue()),
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::Push(value) => write!(f, "{} {value}", "push".cyan()),
            Statement::Pop => write!(f, "{}", "pop".cyan()),
            Statement::Load(local) => write!(f, "{} _{local}", "load".cyan()),
            Statement::Store(local) => write!(f, "{} _{local}", "store".cyan()),
            Statement::Call { arguments } => write!(f, "{} {arguments}", "call".cyan()),
            Statement::Binary(operator) => write!(f, "{}", operator.to_string().cyan()),
        }
    }
}

impl std::fmt::Display for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminator::Error => write!(f, "{}", "<error>".red()),
            Terminator::Unset => write!(f, "{}", "<unset>".red()),
            Terminator::Return => write!(f, "{}", "return".cyan()),
            Terminator::Goto(target) => {
                write!(f, "{} {}", "goto".cyan(), format!("bb{target}").blue())
            }
            Terminator::If { truthy, falsy } => write!(
                f,
                "{} {} {}",
                "if".cyan(),
                format!("bb{truthy}").blue(),
                format!("bb{falsy}").blue()
            ),
        }
    }
}
