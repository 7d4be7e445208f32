//! Peephole rewrites that remove the push/pop traffic left behind by
//! lowering the operand stack one statement at a time

use hashbrown::HashSet;

use crate::middle::lir::{FunctionBody, FunctionKind, Instruction, Line, Program, RegisterId};

const MAX_ITERATIONS: usize = 64;

/// How often the line count may return to an earlier value before giving up
const MAX_REPEATS: usize = 3;

pub fn optimize_program(program: &mut Program) {
    for function in program.functions.iter_mut() {
        if let FunctionKind::Defined(body) = &mut function.kind {
            let before = body.lines.len();
            optimize_body(body);

            tracing::trace!(
                function = %function.label,
                before,
                after = body.lines.len(),
                "peephole optimized"
            );
        }
    }
}

pub fn optimize_body(body: &mut FunctionBody) {
    let mut size_history: HashSet<usize> = HashSet::from([body.lines.len()]);
    let mut repeats = 0;

    for _ in 0..MAX_ITERATIONS {
        let before = body.lines.len();

        fold_push_kill_pop(body);
        fold_immediate_calls(body);
        fold_immediate_stores(body);
        fold_shadowed_push_pop(body);

        let after = body.lines.len();

        if after == before {
            break;
        }

        if !size_history.insert(after) {
            repeats += 1;

            if repeats >= MAX_REPEATS {
                tracing::warn!(size = after, "peephole optimizer stopped before a fixpoint");
                break;
            }
        }
    }
}

/// Removes the line at `index`, handing its labels to the line that takes
/// its place
fn remove_line(lines: &mut Vec<Line>, index: usize) {
    let labels = lines.remove(index).labels;

    if !labels.is_empty() {
        match lines.get_mut(index) {
            Some(next) => {
                let mut moved = labels;
                moved.append(&mut next.labels);
                next.labels = moved;
            }
            None => lines.push(Line {
                labels,
                instruction: Instruction::Nop,
            }),
        }
    }
}

/// `push R; kill R; pop R'` leaves `R'` equal to `R`
fn fold_push_kill_pop(body: &mut FunctionBody) {
    let mut index = 0;

    while index + 2 < body.lines.len() {
        let window = &body.lines[index..index + 3];

        let matched = match (
            window[0].instruction,
            window[1].instruction,
            window[2].instruction,
        ) {
            (Instruction::Push(pushed), Instruction::Kill(killed), Instruction::Pop(popped))
                if pushed == killed && !window[1].is_labelled() && !window[2].is_labelled() =>
            {
                Some((pushed, popped))
            }
            _ => None,
        };

        match matched {
            Some((pushed, popped)) => {
                for _ in 0..3 {
                    remove_line(&mut body.lines, index);
                }
                body.rename_register(popped, pushed);
            }
            None => index += 1,
        }
    }
}

/// `mov_fn R, F; call_reg R, n; kill R` becomes `call_imm F, n`
fn fold_immediate_calls(body: &mut FunctionBody) {
    let mut index = 0;

    while index + 2 < body.lines.len() {
        let window = &body.lines[index..index + 3];

        let fused = match (
            window[0].instruction,
            window[1].instruction,
            window[2].instruction,
        ) {
            (
                Instruction::MoveFunction { register, function },
                Instruction::CallRegister {
                    register: callee,
                    arguments,
                },
                Instruction::Kill(killed),
            ) if register == callee
                && register == killed
                && !window[1].is_labelled()
                && !window[2].is_labelled() =>
            {
                Some(Instruction::CallImmediate {
                    function,
                    arguments,
                })
            }
            _ => None,
        };

        if let Some(instruction) = fused {
            body.lines[index].instruction = instruction;
            body.lines.drain(index + 1..index + 3);
        }

        index += 1;
    }
}

/// `mov_int R, V; store_reg S, R; kill R` becomes `store_imm S, V` when `V`
/// fits a sign-extended 32-bit immediate
fn fold_immediate_stores(body: &mut FunctionBody) {
    let mut index = 0;

    while index + 2 < body.lines.len() {
        let window = &body.lines[index..index + 3];

        let fused = match (
            window[0].instruction,
            window[1].instruction,
            window[2].instruction,
        ) {
            (
                Instruction::MoveInt { register, value },
                Instruction::StoreRegister {
                    slot,
                    register: stored,
                },
                Instruction::Kill(killed),
            ) if register == stored
                && register == killed
                && i32::try_from(value).is_ok()
                && !window[1].is_labelled()
                && !window[2].is_labelled() =>
            {
                Some(Instruction::StoreImmediate { slot, value })
            }
            _ => None,
        };

        if let Some(instruction) = fused {
            body.lines[index].instruction = instruction;
            body.lines.drain(index + 1..index + 3);
        }

        index += 1;
    }
}

/// A value pushed and popped again with nothing touching the native stack in
/// between can stay in its register
fn fold_shadowed_push_pop(body: &mut FunctionBody) {
    let mut index = 0;

    while index < body.lines.len() {
        match find_shadowed_pop(&body.lines, index) {
            Some(shadowed) => {
                // Back to front so the earlier indices stay valid
                remove_line(&mut body.lines, shadowed.pop);
                remove_line(&mut body.lines, shadowed.kill);
                remove_line(&mut body.lines, index);

                body.rename_register(shadowed.popped, shadowed.pushed);
            }
            None => index += 1,
        }
    }
}

struct ShadowedPop {
    pushed: RegisterId,
    popped: RegisterId,
    /// Line of the pop
    pop: usize,
    /// Line killing the pushed register
    kill: usize,
}

fn find_shadowed_pop(lines: &[Line], push: usize) -> Option<ShadowedPop> {
    let Instruction::Push(pushed) = lines[push].instruction else {
        return None;
    };

    let mut kill = None;

    for (offset, line) in lines[push + 1..].iter().enumerate() {
        let index = push + 1 + offset;

        if line.is_labelled() {
            return None;
        }

        match line.instruction {
            Instruction::Pop(popped) => {
                return kill.map(|kill| ShadowedPop {
                    pushed,
                    popped,
                    pop: index,
                    kill,
                });
            }
            Instruction::Kill(register) if register == pushed => kill = Some(index),
            instruction if instruction.pollutes_stack() => return None,
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use indoc::indoc;

    use super::*;
    use crate::{
        frontend::ast::BinaryOperator,
        middle::lir::{FunctionId, LabelId},
        testing::lower_source,
    };

    fn body(instructions: Vec<Instruction>) -> FunctionBody {
        FunctionBody {
            lines: instructions.into_iter().map(Line::new).collect(),
            local_registers: BTreeMap::new(),
            return_register: RegisterId(0),
            entry: LabelId(0),
        }
    }

    fn instructions(body: &FunctionBody) -> Vec<Instruction> {
        body.lines.iter().map(|line| line.instruction).collect()
    }

    #[test]
    fn push_kill_pop_renames_the_popped_register() {
        let mut body = body(vec![
            Instruction::MoveInt {
                register: RegisterId(1),
                value: 5,
            },
            Instruction::Push(RegisterId(1)),
            Instruction::Kill(RegisterId(1)),
            Instruction::Pop(RegisterId(2)),
            Instruction::StoreRegister {
                slot: RegisterId(0),
                register: RegisterId(2),
            },
            Instruction::Kill(RegisterId(2)),
        ]);

        fold_push_kill_pop(&mut body);

        assert_eq!(
            instructions(&body),
            vec![
                Instruction::MoveInt {
                    register: RegisterId(1),
                    value: 5,
                },
                Instruction::StoreRegister {
                    slot: RegisterId(0),
                    register: RegisterId(1),
                },
                Instruction::Kill(RegisterId(1)),
            ]
        );
    }

    #[test]
    fn labels_block_push_kill_pop() {
        let mut body = body(vec![
            Instruction::Push(RegisterId(1)),
            Instruction::Kill(RegisterId(1)),
            Instruction::Pop(RegisterId(2)),
        ]);
        body.lines[2].labels.push(LabelId(3));

        let before = body.clone();
        fold_push_kill_pop(&mut body);

        assert_eq!(body, before);
    }

    #[test]
    fn labels_of_removed_lines_move_forward() {
        let mut body = body(vec![
            Instruction::Push(RegisterId(1)),
            Instruction::Kill(RegisterId(1)),
            Instruction::Pop(RegisterId(2)),
            Instruction::Return,
        ]);
        body.lines[0].labels.push(LabelId(7));

        fold_push_kill_pop(&mut body);

        assert_eq!(body.lines.len(), 1);
        assert_eq!(body.lines[0].labels, vec![LabelId(7)]);
        assert_eq!(body.lines[0].instruction, Instruction::Return);
    }

    #[test]
    fn trailing_labels_land_on_a_nop() {
        let mut body = body(vec![
            Instruction::Push(RegisterId(1)),
            Instruction::Kill(RegisterId(1)),
            Instruction::Pop(RegisterId(2)),
        ]);
        body.lines[0].labels.push(LabelId(1));

        fold_push_kill_pop(&mut body);

        assert_eq!(body.lines, vec![Line {
            labels: vec![LabelId(1)],
            instruction: Instruction::Nop,
        }]);
    }

    #[test]
    fn direct_calls_are_fused() {
        let mut body = body(vec![
            Instruction::MoveFunction {
                register: RegisterId(4),
                function: FunctionId(2),
            },
            Instruction::CallRegister {
                register: RegisterId(4),
                arguments: 3,
            },
            Instruction::Kill(RegisterId(4)),
        ]);

        fold_immediate_calls(&mut body);

        assert_eq!(
            instructions(&body),
            vec![Instruction::CallImmediate {
                function: FunctionId(2),
                arguments: 3,
            }]
        );
    }

    #[test]
    fn only_small_constants_become_immediate_stores() {
        let store = |value| {
            body(vec![
                Instruction::MoveInt {
                    register: RegisterId(1),
                    value,
                },
                Instruction::StoreRegister {
                    slot: RegisterId(0),
                    register: RegisterId(1),
                },
                Instruction::Kill(RegisterId(1)),
            ])
        };

        let mut small = store(-42);
        fold_immediate_stores(&mut small);
        assert_eq!(
            instructions(&small),
            vec![Instruction::StoreImmediate {
                slot: RegisterId(0),
                value: -42,
            }]
        );

        let mut large = store(1 << 40);
        fold_immediate_stores(&mut large);
        assert_eq!(large.lines.len(), 3);
    }

    #[test]
    fn shadowed_push_pop_skips_register_only_work() {
        let mut body = body(vec![
            Instruction::Push(RegisterId(1)),
            Instruction::Kill(RegisterId(1)),
            Instruction::MoveInt {
                register: RegisterId(2),
                value: 3,
            },
            Instruction::Pop(RegisterId(3)),
            Instruction::Binary {
                operator: BinaryOperator::Add,
                destination: RegisterId(3),
                source: RegisterId(2),
            },
        ]);

        fold_shadowed_push_pop(&mut body);

        assert_eq!(
            instructions(&body),
            vec![
                Instruction::MoveInt {
                    register: RegisterId(2),
                    value: 3,
                },
                Instruction::Binary {
                    operator: BinaryOperator::Add,
                    destination: RegisterId(1),
                    source: RegisterId(2),
                },
            ]
        );
    }

    #[test]
    fn stack_traffic_blocks_shadowed_push_pop() {
        let mut body = body(vec![
            Instruction::Push(RegisterId(1)),
            Instruction::Kill(RegisterId(1)),
            Instruction::CallImmediate {
                function: FunctionId(0),
                arguments: 0,
            },
            Instruction::Pop(RegisterId(2)),
        ]);

        let before = body.clone();
        fold_shadowed_push_pop(&mut body);

        assert_eq!(body, before);
    }

    #[test]
    fn optimized_code_has_no_push_pop_pairs_for_straight_arithmetic() {
        let program = lower_source("fn main() -> int { return 1 + 2 * 3; }", true);
        let body = program
            .function_by_label("sbc__main")
            .and_then(|function| function.body())
            .expect("main");

        assert!(
            !body
                .lines
                .iter()
                .any(|line| matches!(line.instruction, Instruction::Push(_) | Instruction::Pop(_))),
            "{:#?}",
            body.lines
        );
    }

    #[test]
    fn optimizing_twice_changes_nothing() {
        let program = lower_source(
            indoc! {"
                fn f(a: int, b: int) -> int { return a * b; }
                fn main() -> int {
                    let total = 0;
                    let i = 0;
                    while i < 5 {
                        total = total + f(i, 2) / 3;
                        i = i + 1;
                    }
                    return total;
                }
            "},
            true,
        );

        for function in program.functions.iter() {
            let Some(body) = function.body() else {
                continue;
            };

            let mut again = body.clone();
            optimize_body(&mut again);

            assert_eq!(&again, body);
        }
    }
}
