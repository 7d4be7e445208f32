use std::fmt::Write;

use colored::Colorize;

use crate::middle::lir::{self, FunctionKind, Instruction, Program};

pub fn pretty_print_lir(program: &Program) -> String {
    let mut output = String::new();

    for (id, value) in &program.strings {
        let _ = writeln!(
            output,
            "{} {}",
            format!("string+{id}:").bright_red(),
            format!("{value:?}").green()
        );
    }

    for function in program.functions.iter() {
        output.push_str(&pretty_print_function(program, function));
    }

    output
}

pub fn pretty_print_function(program: &Program, function: &lir::Function) -> String {
    let mut output = String::new();

    let _ = write!(output, "{}", format!("{}:", function.label).blue());

    if let Some(symbol) = &function.c_export {
        let _ = write!(output, " {}", format!("// exported as {symbol}").bright_black());
    }

    output.push('\n');

    match &function.kind {
        FunctionKind::External { symbol } => {
            let _ = writeln!(
                output,
                "    {} {}, {}",
                "extern".cyan(),
                symbol.blue(),
                function.parameter_count.to_string().purple()
            );
        }
        FunctionKind::Defined(body) => {
            for line in &body.lines {
                for label in &line.labels {
                    let _ = writeln!(output, "{}", format!(".L{label}:").bright_red());
                }

                let _ = writeln!(
                    output,
                    "    {}",
                    DisplayInstruction {
                        program,
                        instruction: &line.instruction
                    }
                );
            }
        }
    }

    output
}

/// Shows an instruction with function ids replaced by their labels
pub struct DisplayInstruction<'a> {
    pub program: &'a Program,
    pub instruction: &'a Instruction,
}

impl std::fmt::Display for DisplayInstruction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let function_label = |id: lir::FunctionId| {
            self.program
                .functions
                .get(id)
                .map_or_else(|| format!("fn#{id}"), |function| function.label.clone())
                .blue()
        };

        match *self.instruction {
            Instruction::Nop => write!(f, "{}", "nop".cyan()),
            Instruction::AllocParam { register, size } => {
                write!(f, "{} %{register}, {size}", "alloc_param".cyan())
            }
            Instruction::AllocLocal { register, size } => {
                write!(f, "{} %{register}, {size}", "alloc_local".cyan())
            }
            Instruction::MoveInt { register, value } => write!(
                f,
                "{} %{register}, {}",
                "mov_int".cyan(),
                value.to_string().purple()
            ),
            Instruction::MoveString { register, string } => write!(
                f,
                "{} %{register}, {}",
                "mov_string".cyan(),
                format!("string+{string}").green()
            ),
            Instruction::MoveFunction { register, function } => write!(
                f,
                "{} %{register}, {}",
                "mov_fn".cyan(),
                function_label(function)
            ),
            Instruction::Push(register) => write!(f, "{} %{register}", "push".cyan()),
            Instruction::Pop(register) => write!(f, "{} %{register}", "pop".cyan()),
            Instruction::Load { register, slot } => {
                write!(f, "{} %{register}, [%{slot}]", "load".cyan())
            }
            Instruction::StoreRegister { slot, register } => {
                write!(f, "{} [%{slot}], %{register}", "store_reg".cyan())
            }
            Instruction::StoreImmediate { slot, value } => write!(
                f,
                "{} [%{slot}], {}",
                "store_imm".cyan(),
                value.to_string().purple()
            ),
            Instruction::CallRegister {
                register,
                arguments,
            } => write!(f, "{} %{register}, {arguments}", "call_reg".cyan()),
            Instruction::CallImmediate {
                function,
                arguments,
            } => write!(
                f,
                "{} {}, {arguments}",
                "call_imm".cyan(),
                function_label(function)
            ),
            Instruction::Jump(target) => {
                write!(f, "{} {}", "jmp".cyan(), format!(".L{target}").bright_red())
            }
            Instruction::JumpIfNonZero { register, target } => write!(
                f,
                "{} %{register}, {}",
                "jnz_reg".cyan(),
                format!(".L{target}").bright_red()
            ),
            Instruction::Return => write!(f, "{}", "ret".cyan()),
            Instruction::Binary {
                operator,
                destination,
                source,
            } => write!(
                f,
                "{} %{destination}, %{source}",
                operator.to_string().cyan()
            ),
            Instruction::Kill(register) => write!(f, "{} %{register}", "kill".white()),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::testing::lower_source;

    #[test]
    fn prints_labels_and_operands() {
        let program = lower_source(
            indoc! {r#"
                fn id(a: int) -> int { return a; }
                fn main() -> int { let s = "x"; return id(40); }
            "#},
            true,
        );

        let printed = strip_ansi_escapes::strip_str(pretty_print_lir(&program));

        assert_eq!(
            printed,
            indoc! {r#"
                string+0: "x"
                sbc__id:
                    alloc_param %0, 8
                    alloc_local %1, 8
                .L0:
                    load %2, [%0]
                    store_reg [%1], %2
                    kill %2
                    ret
                sbc__main:
                    alloc_local %0, 8
                    alloc_local %1, 8
                .L0:
                    mov_string %2, string+0
                    store_reg [%1], %2
                    kill %2
                    mov_int %4, 40
                    push %4
                    kill %4
                    call_imm sbc__id, 1
                    pop %7
                    store_reg [%0], %7
                    kill %7
                    ret
            "#}
        );
    }
}
