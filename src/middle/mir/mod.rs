//! MIR (Mid-level Intermediate Representation). Each function is a control
//! flow graph of basic blocks whose statements operate on an implicit operand
//! stack. Blocks and locals are addressed by id so loops are just edges.

use std::collections::BTreeMap;

use crate::{
    frontend::ast::{BinaryOperator, StmtId},
    index::{IndexVec, simple_index},
    middle::ty::Type,
};

pub mod build;
pub mod optimize;
pub mod pretty_print;

simple_index! {
    /// Identifies a MIR basic block within its function
    pub struct BlockId;
}

simple_index! {
    /// Identifies a storage slot within a function
    pub struct LocalId;
}

#[derive(Debug)]
pub struct Function {
    pub decl: StmtId,
    pub name: String,
    pub locals: IndexVec<LocalId, Local>,
    /// Local holding each parameter, by parameter index
    pub param_locals: Vec<LocalId>,
    /// Holds the value handed back to the caller
    pub return_local: LocalId,
    pub blocks: BTreeMap<BlockId, BasicBlock>,
    pub entry: BlockId,
    /// The only block ending in `return`
    pub exit: BlockId,
}

#[derive(Debug)]
pub struct Local {
    pub id: LocalId,
    pub ty: Type,
    pub ident: Option<String>,
}

#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
    Function(StmtId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Push(Value),
    /// Discards the top of the stack
    Pop,
    Load(LocalId),
    Store(LocalId),
    /// Pops the callee, then consumes `arguments` values and pushes the
    /// result
    Call {
        arguments: usize,
    },
    /// Pops the right operand, then the left, and pushes the result
    Binary(BinaryOperator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Error,
    /// Not yet wired. Never survives building.
    Unset,
    Return,
    Goto(BlockId),
    If { truthy: BlockId, falsy: BlockId },
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match *self {
            Terminator::Error | Terminator::Unset | Terminator::Return => Vec::new(),
            Terminator::Goto(target) => vec![target],
            Terminator::If { truthy, falsy } if truthy == falsy => vec![truthy],
            Terminator::If { truthy, falsy } => vec![truthy, falsy],
        }
    }
}

impl Function {
    /// Blocks with an edge into `block`
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks
            .values()
            .filter(|candidate| candidate.terminator.successors().contains(&block))
            .map(|candidate| candidate.id)
            .collect()
    }

    pub fn statement_count(&self) -> usize {
        self.blocks
            .values()
            .map(|block| block.statements.len())
            .sum()
    }
}
