//! LIR (Low-level Intermediate Representation). In this form the operand
//! stack of MIR is spelled out as explicit pushes and pops of virtual
//! registers, blocks are flattened into labelled lines and every temporary
//! ends its life with an explicit `kill`.

use std::collections::BTreeMap;

use crate::{
    frontend::ast::BinaryOperator,
    index::{IndexVec, simple_index},
    middle::mir::LocalId,
};

#[cfg(test)]
pub mod interpret;
pub mod mir_lowering;
pub mod optimize;
pub mod pretty_print;

simple_index! {
    /// Identifies a virtual register, or a storage slot when declared by
    /// `alloc_param`/`alloc_local`
    pub struct RegisterId;
}

simple_index! {
    /// Identifies a jump target within a function
    pub struct LabelId;
}

simple_index! {
    pub struct FunctionId;
}

simple_index! {
    /// Identifies an interned string constant
    pub struct StringId;
}

/// Every slot is one machine word
pub const SLOT_SIZE: usize = 8;

#[derive(Debug, Default)]
pub struct Program {
    pub strings: BTreeMap<StringId, String>,
    pub functions: IndexVec<FunctionId, Function>,
}

#[derive(Debug)]
pub struct Function {
    pub id: FunctionId,
    /// Assembly symbol of the function
    pub label: String,
    pub parameter_count: usize,
    /// Extra symbol under which C code may call this function
    pub c_export: Option<String>,
    pub kind: FunctionKind,
}

#[derive(Debug)]
pub enum FunctionKind {
    Defined(FunctionBody),
    /// Forwards its arguments to the C function `symbol`
    External { symbol: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBody {
    pub lines: Vec<Line>,
    pub local_registers: BTreeMap<LocalId, RegisterId>,
    /// Slot holding the return value
    pub return_register: RegisterId,
    pub entry: LabelId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub labels: Vec<LabelId>,
    pub instruction: Instruction,
}

impl Line {
    pub fn new(instruction: Instruction) -> Self {
        Self {
            labels: Vec::new(),
            instruction,
        }
    }

    pub fn is_labelled(&self) -> bool {
        !self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    AllocParam {
        register: RegisterId,
        size: usize,
    },
    AllocLocal {
        register: RegisterId,
        size: usize,
    },
    MoveInt {
        register: RegisterId,
        value: i64,
    },
    MoveString {
        register: RegisterId,
        string: StringId,
    },
    MoveFunction {
        register: RegisterId,
        function: FunctionId,
    },
    Push(RegisterId),
    Pop(RegisterId),
    Load {
        register: RegisterId,
        slot: RegisterId,
    },
    StoreRegister {
        slot: RegisterId,
        register: RegisterId,
    },
    StoreImmediate {
        slot: RegisterId,
        value: i64,
    },
    /// Calls the function held in `register`. The callee consumes
    /// `arguments` values from the native stack and one result is pushed.
    CallRegister {
        register: RegisterId,
        arguments: usize,
    },
    CallImmediate {
        function: FunctionId,
        arguments: usize,
    },
    Jump(LabelId),
    JumpIfNonZero {
        register: RegisterId,
        target: LabelId,
    },
    Return,
    /// `destination = destination <operator> source`
    Binary {
        operator: BinaryOperator,
        destination: RegisterId,
        source: RegisterId,
    },
    Kill(RegisterId),
}

impl Instruction {
    /// Whether the instruction moves the native stack pointer or clobbers
    /// registers
    pub fn pollutes_stack(&self) -> bool {
        matches!(
            self,
            Instruction::Push(_)
                | Instruction::Pop(_)
                | Instruction::CallRegister { .. }
                | Instruction::CallImmediate { .. }
        )
    }

    pub fn registers_mut(&mut self) -> Vec<&mut RegisterId> {
        match self {
            Instruction::Nop
            | Instruction::CallImmediate { .. }
            | Instruction::Jump(_)
            | Instruction::Return => Vec::new(),
            Instruction::AllocParam { register, .. }
            | Instruction::AllocLocal { register, .. }
            | Instruction::MoveInt { register, .. }
            | Instruction::MoveString { register, .. }
            | Instruction::MoveFunction { register, .. }
            | Instruction::Push(register)
            | Instruction::Pop(register)
            | Instruction::CallRegister { register, .. }
            | Instruction::JumpIfNonZero { register, .. }
            | Instruction::Kill(register) => vec![register],
            Instruction::StoreImmediate { slot, .. } => vec![slot],
            Instruction::Load { register, slot } | Instruction::StoreRegister { slot, register } => {
                vec![register, slot]
            }
            Instruction::Binary {
                destination,
                source,
                ..
            } => vec![destination, source],
        }
    }

    pub fn rename_register(&mut self, from: RegisterId, to: RegisterId) {
        for register in self.registers_mut() {
            if *register == from {
                *register = to;
            }
        }
    }
}

impl Function {
    pub fn body(&self) -> Option<&FunctionBody> {
        match &self.kind {
            FunctionKind::Defined(body) => Some(body),
            FunctionKind::External { .. } => None,
        }
    }
}

impl FunctionBody {
    pub fn rename_register(&mut self, from: RegisterId, to: RegisterId) {
        for line in &mut self.lines {
            line.instruction.rename_register(from, to);
        }
    }
}

impl Program {
    pub fn function_by_label(&self, label: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.label == label)
    }
}
