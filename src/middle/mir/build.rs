use std::collections::BTreeMap;

use hashbrown::HashMap;

use super::{BasicBlock, BlockId, Function, Local, LocalId, Statement, Terminator, Value};
use crate::{
    error::{CompileError, CompileResult},
    frontend::ast::{self, BinaryOperator, Expr, ExprKind, FnDecl, StmtId, StmtKind, UnaryOperator},
    index::{IdGenerator, IndexVec},
    middle::{
        resolve::{Binding, Resolutions},
        ty::Type,
        type_check::Checker,
    },
};

/// Lowers one function with a body to MIR
pub fn build_function(checker: &mut Checker, id: StmtId) -> CompileResult<Function> {
    let resolutions = checker.resolutions();

    let Some(decl) = resolutions.function(id) else {
        return Err(CompileError::internal(format!("{id} is not a function")));
    };

    let Some(body) = &decl.body else {
        return Err(CompileError::internal(format!(
            "`{}` has no body to build",
            decl.ident.name
        )));
    };

    let mut builder = FunctionBuilder::new(checker, resolutions, id, decl)?;
    builder.lower_block(body)?;

    let (current, exit) = (builder.current, builder.exit);
    builder.terminate(current, Terminator::Goto(exit))?;
    builder.terminate(exit, Terminator::Return)?;

    let function = builder.finish();

    tracing::trace!(
        function = %function.name,
        blocks = function.blocks.len(),
        "built mir"
    );

    Ok(function)
}

struct FunctionBuilder<'c, 'r, 'ast> {
    checker: &'c mut Checker<'r, 'ast>,
    resolutions: &'r Resolutions<'ast>,
    id: StmtId,
    decl: &'ast FnDecl,
    locals: IndexVec<LocalId, Local>,
    param_locals: Vec<LocalId>,
    return_local: LocalId,
    let_locals: HashMap<StmtId, LocalId>,
    block_ids: IdGenerator<BlockId>,
    blocks: BTreeMap<BlockId, BasicBlock>,
    entry: BlockId,
    exit: BlockId,
    /// Block the next statement is appended to
    current: BlockId,
    loop_exits: HashMap<StmtId, BlockId>,
}

impl<'c, 'r, 'ast> FunctionBuilder<'c, 'r, 'ast> {
    fn new(
        checker: &'c mut Checker<'r, 'ast>,
        resolutions: &'r Resolutions<'ast>,
        id: StmtId,
        decl: &'ast FnDecl,
    ) -> CompileResult<Self> {
        let ty = checker.type_of_fn(id)?;
        let Some(function_type) = ty.as_function() else {
            return Err(CompileError::internal("function without a function type"));
        };

        let mut locals = IndexVec::new();

        // The return local always comes first
        let return_local = locals.next_index();
        locals.push(Local {
            id: return_local,
            ty: function_type.return_type.clone(),
            ident: None,
        });

        let param_locals = decl
            .params
            .iter()
            .zip(&function_type.parameters)
            .map(|(param, ty)| {
                let id = locals.next_index();
                locals.push(Local {
                    id,
                    ty: ty.clone(),
                    ident: Some(param.ident.name.clone()),
                })
            })
            .collect();

        let mut builder = Self {
            checker,
            resolutions,
            id,
            decl,
            locals,
            param_locals,
            return_local,
            let_locals: HashMap::new(),
            block_ids: IdGenerator::new(),
            blocks: BTreeMap::new(),
            entry: BlockId(0),
            exit: BlockId(0),
            current: BlockId(0),
            loop_exits: HashMap::new(),
        };

        builder.entry = builder.new_block();
        builder.exit = builder.new_block();
        builder.current = builder.entry;

        Ok(builder)
    }

    fn finish(self) -> Function {
        Function {
            decl: self.id,
            name: self.decl.ident.name.clone(),
            locals: self.locals,
            param_locals: self.param_locals,
            return_local: self.return_local,
            blocks: self.blocks,
            entry: self.entry,
            exit: self.exit,
        }
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.block_ids.next();

        self.blocks.insert(
            id,
            BasicBlock {
                id,
                statements: Vec::new(),
                terminator: Terminator::Unset,
            },
        );

        id
    }

    fn new_local(&mut self, ty: Type, ident: Option<String>) -> LocalId {
        let id = self.locals.next_index();
        self.locals.push(Local { id, ty, ident })
    }

    fn push_statement(&mut self, statement: Statement) -> CompileResult<()> {
        let current = self.current;

        match self.blocks.get_mut(&current) {
            Some(block) => {
                block.statements.push(statement);
                Ok(())
            }
            None => Err(CompileError::internal(format!("missing block {current}"))),
        }
    }

    fn terminate(&mut self, block: BlockId, terminator: Terminator) -> CompileResult<()> {
        match self.blocks.get_mut(&block) {
            Some(block) => {
                block.terminator = terminator;
                Ok(())
            }
            None => Err(CompileError::internal(format!("missing block {block}"))),
        }
    }

    fn local_of(&self, binding: Binding) -> CompileResult<LocalId> {
        let local = match binding {
            Binding::Parameter { index, .. } => self.param_locals.get(index).copied(),
            Binding::Local(id) => self.let_locals.get(&id).copied(),
            Binding::Function(_) => None,
        };

        local.ok_or_else(|| CompileError::internal(format!("no local for {binding:?}")))
    }

    fn binding_of(&self, expression: &Expr) -> CompileResult<Binding> {
        self.resolutions
            .bindings
            .get(&expression.id)
            .copied()
            .ok_or_else(|| CompileError::internal("identifier was not resolved"))
    }

    fn lower_block(&mut self, block: &ast::Block) -> CompileResult<()> {
        for statement in &block.statements {
            self.lower_statement(statement)?;
        }

        Ok(())
    }

    fn lower_statement(&mut self, statement: &ast::Stmt) -> CompileResult<()> {
        match &statement.kind {
            StmtKind::Error => {
                return Err(CompileError::internal("error statement reached lowering"));
            }
            // Nested functions are built separately
            StmtKind::Fn(_) => {}
            StmtKind::Let(local) => {
                let ty = self.checker.type_of_let(statement.id)?;

                if let Some(value) = &local.value {
                    self.lower_expression(value)?;
                }

                let id = self.new_local(ty, Some(local.ident.name.clone()));
                self.let_locals.insert(statement.id, id);

                if local.value.is_some() {
                    self.push_statement(Statement::Store(id))?;
                }
            }
            StmtKind::Loop(body) => {
                let entry = self.current;
                let body_block = self.new_block();
                let exit = self.new_block();

                self.terminate(entry, Terminator::Goto(body_block))?;
                self.loop_exits.insert(statement.id, exit);

                self.current = body_block;
                self.lower_block(body)?;
                self.terminate(self.current, Terminator::Goto(body_block))?;

                self.current = exit;
            }
            StmtKind::While { condition, body } => {
                let entry = self.current;
                let condition_block = self.new_block();

                self.terminate(entry, Terminator::Goto(condition_block))?;

                self.current = condition_block;
                self.lower_expression(condition)?;
                let condition_exit = self.current;

                let body_block = self.new_block();
                let exit = self.new_block();

                self.terminate(
                    condition_exit,
                    Terminator::If {
                        truthy: body_block,
                        falsy: exit,
                    },
                )?;
                self.loop_exits.insert(statement.id, exit);

                self.current = body_block;
                self.lower_block(body)?;
                self.terminate(self.current, Terminator::Goto(condition_block))?;

                self.current = exit;
            }
            StmtKind::If(if_stmt) => {
                self.lower_expression(&if_stmt.condition)?;
                let entry = self.current;

                let truthy = self.new_block();
                self.current = truthy;
                self.lower_block(&if_stmt.truthy)?;
                let truthy_exit = self.current;

                let falsy = match &if_stmt.falsy {
                    Some(falsy_body) => {
                        let falsy = self.new_block();
                        self.current = falsy;
                        self.lower_block(falsy_body)?;
                        Some((falsy, self.current))
                    }
                    None => None,
                };

                let exit = self.new_block();
                self.terminate(truthy_exit, Terminator::Goto(exit))?;

                let falsy_target = match falsy {
                    Some((falsy, falsy_exit)) => {
                        self.terminate(falsy_exit, Terminator::Goto(exit))?;
                        falsy
                    }
                    // Without an `else` the exit doubles as the falsy branch
                    None => exit,
                };

                self.terminate(
                    entry,
                    Terminator::If {
                        truthy,
                        falsy: falsy_target,
                    },
                )?;

                self.current = exit;
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.lower_expression(value)?;
                    self.push_statement(Statement::Store(self.return_local))?;
                }

                self.terminate(self.current, Terminator::Goto(self.exit))?;
                self.current = self.new_block();
            }
            StmtKind::Break => {
                let target = self
                    .resolutions
                    .break_targets
                    .get(&statement.id)
                    .and_then(|loop_id| self.loop_exits.get(loop_id))
                    .copied()
                    .ok_or_else(|| CompileError::internal("`break` without a loop exit"))?;

                self.terminate(self.current, Terminator::Goto(target))?;
                self.current = self.new_block();
            }
            StmtKind::Assign { subject, value } => {
                let local = self.local_of(self.binding_of(subject)?)?;

                self.lower_expression(value)?;
                self.push_statement(Statement::Store(local))?;
            }
            StmtKind::Expr(expression) => {
                self.lower_expression(expression)?;
                self.push_statement(Statement::Pop)?;
            }
        }

        Ok(())
    }

    fn lower_expression(&mut self, expression: &Expr) -> CompileResult<()> {
        match &expression.kind {
            ExprKind::Error => {
                return Err(CompileError::internal("error expression reached lowering"));
            }
            ExprKind::Identifier(_) => match self.binding_of(expression)? {
                Binding::Function(id) => self.push_statement(Statement::Push(Value::Function(id)))?,
                binding => {
                    let local = self.local_of(binding)?;
                    self.push_statement(Statement::Load(local))?;
                }
            },
            ExprKind::Int(value) => self.push_statement(Statement::Push(Value::Int(*value)))?,
            ExprKind::Str(value) => {
                self.push_statement(Statement::Push(Value::Str(value.clone())))?
            }
            ExprKind::Call { callee, args } => {
                for arg in args {
                    self.lower_expression(arg)?;
                }

                self.lower_expression(callee)?;
                self.push_statement(Statement::Call {
                    arguments: args.len(),
                })?;
            }
            ExprKind::Unary {
                operator: UnaryOperator::Negate,
                operand,
            } => {
                self.push_statement(Statement::Push(Value::Int(0)))?;
                self.lower_expression(operand)?;
                self.push_statement(Statement::Binary(BinaryOperator::Sub))?;
            }
            ExprKind::Unary {
                operator: UnaryOperator::Not,
                operand,
            } => {
                self.lower_expression(operand)?;
                self.push_statement(Statement::Push(Value::Int(0)))?;
                self.push_statement(Statement::Binary(BinaryOperator::Eq))?;
            }
            ExprKind::Binary { operator, lhs, rhs } => {
                self.lower_expression(lhs)?;
                self.lower_expression(rhs)?;
                self.push_statement(Statement::Binary(*operator))?;
            }
        }

        Ok(())
    }
}
