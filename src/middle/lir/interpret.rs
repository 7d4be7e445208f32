//! Executes LIR directly so lowering and peephole rewrites can be checked
//! against expected program results

use hashbrown::HashMap;

use crate::{
    frontend::ast::BinaryOperator,
    index::Index,
    middle::lir::{FunctionBody, FunctionId, FunctionKind, Instruction, LabelId, Program, RegisterId},
};

/// Upper bound on executed instructions
const FUEL: usize = 1_000_000;

pub fn evaluate(operator: BinaryOperator, lhs: i64, rhs: i64) -> Result<i64, String> {
    let value = match operator {
        BinaryOperator::Lt => (lhs < rhs) as i64,
        BinaryOperator::Gt => (lhs > rhs) as i64,
        BinaryOperator::Le => (lhs <= rhs) as i64,
        BinaryOperator::Ge => (lhs >= rhs) as i64,
        BinaryOperator::Eq => (lhs == rhs) as i64,
        BinaryOperator::Ne => (lhs != rhs) as i64,
        BinaryOperator::Add => lhs.wrapping_add(rhs),
        BinaryOperator::Sub => lhs.wrapping_sub(rhs),
        BinaryOperator::Mul => lhs.wrapping_mul(rhs),
        BinaryOperator::Div => lhs
            .checked_div(rhs)
            .ok_or_else(|| format!("cannot divide {lhs} by {rhs}"))?,
        BinaryOperator::Mod => lhs
            .checked_rem(rhs)
            .ok_or_else(|| format!("cannot take {lhs} modulo {rhs}"))?,
    };

    Ok(value)
}

pub struct Interpreter<'p> {
    program: &'p Program,
    stack: Vec<i64>,
    fuel: usize,
}

struct Frame<'p> {
    body: &'p FunctionBody,
    registers: HashMap<RegisterId, i64>,
    slots: HashMap<RegisterId, i64>,
    labels: HashMap<LabelId, usize>,
}

impl<'p> Frame<'p> {
    fn read(&self, register: RegisterId) -> Result<i64, String> {
        self.registers
            .get(&register)
            .copied()
            .ok_or_else(|| format!("read of dead register %{register}"))
    }

    fn slot(&self, slot: RegisterId) -> Result<i64, String> {
        match self.slots.get(&slot) {
            Some(value) => Ok(*value),
            // Declared but never written
            None if self.is_slot(slot) => Ok(0),
            None => Err(format!("%{slot} is not a slot")),
        }
    }

    fn is_slot(&self, register: RegisterId) -> bool {
        self.body.lines.iter().any(|line| {
            matches!(
                line.instruction,
                Instruction::AllocParam { register: slot, .. }
                    | Instruction::AllocLocal { register: slot, .. } if slot == register
            )
        })
    }

    fn jump(&self, label: LabelId) -> Result<usize, String> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| format!("jump to unknown label .L{label}"))
    }
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            stack: Vec::new(),
            fuel: FUEL,
        }
    }

    pub fn call_by_label(&mut self, label: &str, arguments: &[i64]) -> Result<i64, String> {
        let function = self
            .program
            .function_by_label(label)
            .ok_or_else(|| format!("no function `{label}`"))?;

        self.stack.extend_from_slice(arguments);
        let result = self.call(function.id, arguments.len())?;

        if !self.stack.is_empty() {
            return Err(format!("{} values left on the stack", self.stack.len()));
        }

        Ok(result)
    }

    /// Runs `function` with its `argc` arguments on top of the stack and
    /// removes them afterwards
    fn call(&mut self, function: FunctionId, argc: usize) -> Result<i64, String> {
        let program = self.program;
        let function = program
            .functions
            .get(function)
            .ok_or_else(|| format!("call to unknown function {function}"))?;

        let body = match &function.kind {
            FunctionKind::Defined(body) => body,
            FunctionKind::External { symbol } => {
                return Err(format!("cannot run external function `{symbol}`"));
            }
        };

        if argc != function.parameter_count {
            return Err(format!(
                "`{}` takes {} arguments, got {argc}",
                function.label, function.parameter_count
            ));
        }

        let base = self
            .stack
            .len()
            .checked_sub(argc)
            .ok_or("stack underflow while calling")?;
        let arguments = self.stack.split_off(base);

        let mut frame = Frame {
            body,
            registers: HashMap::new(),
            slots: HashMap::new(),
            labels: body
                .lines
                .iter()
                .enumerate()
                .flat_map(|(index, line)| line.labels.iter().map(move |label| (*label, index)))
                .collect(),
        };

        let mut parameters = arguments.into_iter();
        let mut pc = 0;

        while let Some(line) = body.lines.get(pc) {
            self.fuel = self.fuel.checked_sub(1).ok_or("out of fuel")?;
            pc += 1;

            match line.instruction {
                Instruction::Nop => {}
                Instruction::AllocParam { register, .. } => {
                    let value = parameters.next().ok_or("missing argument")?;
                    frame.slots.insert(register, value);
                }
                Instruction::AllocLocal { .. } => {}
                Instruction::MoveInt { register, value } => {
                    frame.registers.insert(register, value);
                }
                Instruction::MoveString { register, string } => {
                    frame.registers.insert(register, string.index() as i64);
                }
                Instruction::MoveFunction { register, function } => {
                    frame.registers.insert(register, function.index() as i64);
                }
                Instruction::Push(register) => self.stack.push(frame.read(register)?),
                Instruction::Pop(register) => {
                    let value = self.stack.pop().ok_or("pop from an empty stack")?;
                    frame.registers.insert(register, value);
                }
                Instruction::Load { register, slot } => {
                    let value = frame.slot(slot)?;
                    frame.registers.insert(register, value);
                }
                Instruction::StoreRegister { slot, register } => {
                    let value = frame.read(register)?;
                    frame.slots.insert(slot, value);
                }
                Instruction::StoreImmediate { slot, value } => {
                    frame.slots.insert(slot, value);
                }
                Instruction::CallRegister {
                    register,
                    arguments,
                } => {
                    let callee = usize::try_from(frame.read(register)?)
                        .map_err(|_| "call through a negative function id")?;
                    let result = self.call(FunctionId::new(callee), arguments)?;
                    self.stack.push(result);
                }
                Instruction::CallImmediate {
                    function,
                    arguments,
                } => {
                    let result = self.call(function, arguments)?;
                    self.stack.push(result);
                }
                Instruction::Jump(target) => pc = frame.jump(target)?,
                Instruction::JumpIfNonZero { register, target } => {
                    if frame.read(register)? != 0 {
                        // Registers die in line order, so the kill following
                        // the branch also covers the taken path
                        let killed_next = matches!(
                            body.lines.get(pc).map(|line| line.instruction),
                            Some(Instruction::Kill(killed)) if killed == register
                        );

                        if killed_next {
                            frame.registers.remove(&register);
                        }

                        pc = frame.jump(target)?;
                    }
                }
                Instruction::Return => {
                    if let Some(live) = frame.registers.keys().next() {
                        return Err(format!("%{live} is still live at return"));
                    }

                    if self.stack.len() != base {
                        return Err(format!(
                            "`{}` returned with an unbalanced stack",
                            function.label
                        ));
                    }

                    return frame.slot(body.return_register);
                }
                Instruction::Binary {
                    operator,
                    destination,
                    source,
                } => {
                    let value = evaluate(operator, frame.read(destination)?, frame.read(source)?)?;
                    frame.registers.insert(destination, value);
                }
                Instruction::Kill(register) => {
                    frame
                        .registers
                        .remove(&register)
                        .ok_or_else(|| format!("kill of dead register %{register}"))?;
                }
            }
        }

        Err(format!("`{}` ran off the end of its body", function.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::lower_source;

    #[test]
    fn taken_branch_retires_its_condition() {
        let source = "fn f(a: int) -> int { if a { return 1; } return 2; }";

        for optimize in [false, true] {
            let program = lower_source(source, optimize);

            assert_eq!(Interpreter::new(&program).call_by_label("sbc__f", &[1]), Ok(1));
            assert_eq!(Interpreter::new(&program).call_by_label("sbc__f", &[0]), Ok(2));
        }
    }

    #[test]
    fn live_register_at_return_is_reported() {
        let mut program = lower_source("fn f() -> int { return 3; }", false);

        let FunctionKind::Defined(body) = &mut program.functions.raw[0].kind else {
            panic!("expected a defined function");
        };
        let kill = body
            .lines
            .iter()
            .position(|line| matches!(line.instruction, Instruction::Kill(_)))
            .expect("a kill");
        body.lines[kill].instruction = Instruction::Nop;

        let result = Interpreter::new(&program).call_by_label("sbc__f", &[]);

        assert!(
            result.as_ref().is_err_and(|error| error.ends_with("is still live at return")),
            "{result:?}"
        );
    }

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(evaluate(BinaryOperator::Add, i64::MAX, 1), Ok(i64::MIN));
        assert_eq!(evaluate(BinaryOperator::Mul, i64::MAX, 2), Ok(-2));
    }

    #[test]
    fn division_truncates_toward_zero() {
        assert_eq!(evaluate(BinaryOperator::Div, -7, 2), Ok(-3));
        assert_eq!(evaluate(BinaryOperator::Mod, -7, 2), Ok(-1));
        assert!(evaluate(BinaryOperator::Div, 1, 0).is_err());
        assert!(evaluate(BinaryOperator::Div, i64::MIN, -1).is_err());
    }

    #[test]
    fn comparisons_yield_zero_or_one() {
        assert_eq!(evaluate(BinaryOperator::Le, 3, 3), Ok(1));
        assert_eq!(evaluate(BinaryOperator::Ne, 3, 3), Ok(0));
    }
}
