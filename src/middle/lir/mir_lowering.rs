use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

use crate::{
    error::{CompileError, CompileResult},
    frontend::ast::{Module, StmtId},
    index::{IdGenerator, Index, IndexVec},
    middle::{
        attributes::FunctionAttributes,
        lir::{
            self, FunctionBody, FunctionId, FunctionKind, Instruction, LabelId, Line, Program,
            RegisterId, SLOT_SIZE, StringId,
        },
        mir,
        resolve::Resolutions,
    },
};

#[derive(Default)]
struct StringInterner {
    ids: IdGenerator<StringId>,
    lookup: HashMap<String, StringId>,
    strings: BTreeMap<StringId, String>,
}

impl StringInterner {
    fn intern(&mut self, value: &str) -> StringId {
        if let Some(id) = self.lookup.get(value) {
            return *id;
        }

        let id = self.ids.next();
        self.lookup.insert(value.to_owned(), id);
        self.strings.insert(id, value.to_owned());
        id
    }
}

/// Lowers every function of the program. `bodies` holds the MIR of each
/// function with a body; the rest must be `c_function` declarations.
pub fn lower_program(
    module: &Module,
    resolutions: &Resolutions,
    bodies: Vec<mir::Function>,
) -> CompileResult<Program> {
    let top_level: HashSet<StmtId> = module.items.iter().map(|item| item.id).collect();

    // Ids follow declaration order so calls can refer to any function
    let function_ids: HashMap<StmtId, FunctionId> = resolutions
        .functions
        .iter()
        .enumerate()
        .map(|(index, decl)| (*decl, FunctionId::new(index)))
        .collect();

    let mut bodies: HashMap<StmtId, mir::Function> =
        bodies.into_iter().map(|body| (body.decl, body)).collect();
    let mut strings = StringInterner::default();
    let mut functions = IndexVec::new();

    for &decl_id in &resolutions.functions {
        let Some(decl) = resolutions.function(decl_id) else {
            return Err(CompileError::internal(format!("{decl_id} is not a function")));
        };

        let attributes = FunctionAttributes::of(decl)?;

        let label = if top_level.contains(&decl_id) {
            format!("sbc__{}", decl.ident.name)
        } else {
            // Nested functions may share names across scopes
            format!("sbc__{}_{decl_id}", decl.ident.name)
        };

        let kind = match (attributes.c_function, bodies.remove(&decl_id)) {
            (Some(symbol), None) => FunctionKind::External { symbol },
            (None, Some(body)) => FunctionKind::Defined(
                FunctionLowering::new(&mut strings, &function_ids, &body).lower()?,
            ),
            (Some(_), Some(_)) => {
                return Err(CompileError::internal(format!(
                    "`c_function` `{}` was given a body",
                    decl.ident.name
                )));
            }
            (None, None) => {
                return Err(CompileError::internal(format!(
                    "no MIR for `{}`",
                    decl.ident.name
                )));
            }
        };

        let id = functions.next_index();
        functions.push(lir::Function {
            id,
            label,
            parameter_count: decl.params.len(),
            c_export: attributes.c_export,
            kind,
        });
    }

    tracing::debug!(
        functions = functions.len(),
        strings = strings.strings.len(),
        "lowered program to lir"
    );

    Ok(Program {
        strings: strings.strings,
        functions,
    })
}

struct FunctionLowering<'a> {
    strings: &'a mut StringInterner,
    function_ids: &'a HashMap<StmtId, FunctionId>,
    mir: &'a mir::Function,
    registers: IdGenerator<RegisterId>,
    block_labels: BTreeMap<mir::BlockId, LabelId>,
    local_registers: BTreeMap<mir::LocalId, RegisterId>,
    lines: Vec<Line>,
    /// Labels attached to the next emitted line
    pending_labels: Vec<LabelId>,
}

impl<'a> FunctionLowering<'a> {
    fn new(
        strings: &'a mut StringInterner,
        function_ids: &'a HashMap<StmtId, FunctionId>,
        mir: &'a mir::Function,
    ) -> Self {
        let mut labels = IdGenerator::new();
        let block_labels = mir.blocks.keys().map(|id| (*id, labels.next())).collect();

        Self {
            strings,
            function_ids,
            mir,
            registers: IdGenerator::new(),
            block_labels,
            local_registers: BTreeMap::new(),
            lines: Vec::new(),
            pending_labels: Vec::new(),
        }
    }

    fn lower(mut self) -> CompileResult<FunctionBody> {
        let mir = self.mir;

        for local in &mir.param_locals {
            let register = self.registers.next();
            self.local_registers.insert(*local, register);
            self.emit(Instruction::AllocParam {
                register,
                size: SLOT_SIZE,
            });
        }

        let return_local = mir.return_local;
        let other_locals = mir
            .locals
            .indices()
            .filter(|local| *local != return_local && !mir.param_locals.contains(local))
            .collect::<Vec<_>>();

        for local in std::iter::once(return_local).chain(other_locals) {
            let register = self.registers.next();
            self.local_registers.insert(local, register);
            self.emit(Instruction::AllocLocal {
                register,
                size: SLOT_SIZE,
            });
        }

        for block in mir.blocks.values() {
            let label = self.label_of(block.id)?;
            self.pending_labels.push(label);

            for statement in &block.statements {
                self.lower_statement(statement)?;
            }

            self.lower_terminator(block.terminator)?;
        }

        if !self.pending_labels.is_empty() {
            self.emit(Instruction::Nop);
        }

        Ok(FunctionBody {
            return_register: self.slot_of(return_local)?,
            entry: self.label_of(mir.entry)?,
            lines: self.lines,
            local_registers: self.local_registers,
        })
    }

    fn emit(&mut self, instruction: Instruction) {
        self.lines.push(Line {
            labels: std::mem::take(&mut self.pending_labels),
            instruction,
        });
    }

    fn label_of(&self, block: mir::BlockId) -> CompileResult<LabelId> {
        self.block_labels
            .get(&block)
            .copied()
            .ok_or_else(|| CompileError::internal(format!("jump to missing block {block}")))
    }

    fn slot_of(&self, local: mir::LocalId) -> CompileResult<RegisterId> {
        self.local_registers
            .get(&local)
            .copied()
            .ok_or_else(|| CompileError::internal(format!("local _{local} has no slot")))
    }

    /// Materializes a constant with `mov`, pushes it, and retires the register
    fn push_constant(&mut self, mov: impl FnOnce(RegisterId) -> Instruction) {
        let register = self.registers.next();
        self.emit(mov(register));
        self.emit(Instruction::Push(register));
        self.emit(Instruction::Kill(register));
    }

    fn lower_statement(&mut self, statement: &mir::Statement) -> CompileResult<()> {
        match statement {
            mir::Statement::Push(mir::Value::Int(value)) => {
                let value = *value;
                self.push_constant(|register| Instruction::MoveInt { register, value });
            }
            mir::Statement::Push(mir::Value::Str(value)) => {
                let string = self.strings.intern(value);
                self.push_constant(|register| Instruction::MoveString { register, string });
            }
            mir::Statement::Push(mir::Value::Function(decl)) => {
                let function = self.function_ids.get(decl).copied().ok_or_else(|| {
                    CompileError::internal(format!("no function for declaration {decl}"))
                })?;
                self.push_constant(|register| Instruction::MoveFunction { register, function });
            }
            mir::Statement::Pop => {
                let register = self.registers.next();
                self.emit(Instruction::Pop(register));
                self.emit(Instruction::Kill(register));
            }
            mir::Statement::Load(local) => {
                let slot = self.slot_of(*local)?;
                let register = self.registers.next();
                self.emit(Instruction::Load { register, slot });
                self.emit(Instruction::Push(register));
                self.emit(Instruction::Kill(register));
            }
            mir::Statement::Store(local) => {
                let slot = self.slot_of(*local)?;
                let register = self.registers.next();
                self.emit(Instruction::Pop(register));
                self.emit(Instruction::StoreRegister { slot, register });
                self.emit(Instruction::Kill(register));
            }
            mir::Statement::Call { arguments } => {
                let register = self.registers.next();
                self.emit(Instruction::Pop(register));
                self.emit(Instruction::CallRegister {
                    register,
                    arguments: *arguments,
                });
                self.emit(Instruction::Kill(register));
            }
            mir::Statement::Binary(operator) => {
                let source = self.registers.next();
                let destination = self.registers.next();

                // The right operand sits on top
                self.emit(Instruction::Pop(source));
                self.emit(Instruction::Pop(destination));
                self.emit(Instruction::Binary {
                    operator: *operator,
                    destination,
                    source,
                });
                self.emit(Instruction::Push(destination));
                self.emit(Instruction::Kill(source));
                self.emit(Instruction::Kill(destination));
            }
        }

        Ok(())
    }

    fn lower_terminator(&mut self, terminator: mir::Terminator) -> CompileResult<()> {
        match terminator {
            mir::Terminator::Error | mir::Terminator::Unset => {
                return Err(CompileError::internal(format!(
                    "invalid terminator `{terminator:?}` in `{}`",
                    self.mir.name
                )));
            }
            mir::Terminator::Return => self.emit(Instruction::Return),
            mir::Terminator::Goto(target) => {
                let target = self.label_of(target)?;
                self.emit(Instruction::Jump(target));
            }
            mir::Terminator::If { truthy, falsy } => {
                let (truthy, falsy) = (self.label_of(truthy)?, self.label_of(falsy)?);
                let register = self.registers.next();

                self.emit(Instruction::Pop(register));
                self.emit(Instruction::JumpIfNonZero {
                    register,
                    target: truthy,
                });
                self.emit(Instruction::Kill(register));
                self.emit(Instruction::Jump(falsy));
            }
        }

        Ok(())
    }
}
