use hashbrown::HashMap;

use crate::{
    error::{CompileError, CompileResult, Diagnostic, Stage},
    frontend::ast::{
        Block, Expr, ExprId, ExprKind, FnDecl, Identifier, Module, Stmt, StmtId, StmtKind,
    },
};

/// What an identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Function(StmtId),
    Parameter { function: StmtId, index: usize },
    Local(StmtId),
}

#[derive(Debug)]
pub struct Resolutions<'ast> {
    /// Maps every identifier expression to its definition
    pub bindings: HashMap<ExprId, Binding>,
    /// Maps every `break` to the `loop` or `while` it exits
    pub break_targets: HashMap<StmtId, StmtId>,
    /// Every function and `let` statement in the module
    pub declarations: HashMap<StmtId, &'ast Stmt>,
    /// Every function in the module, top level first and nested ones in the
    /// order their enclosing bodies were visited
    pub functions: Vec<StmtId>,
}

impl<'ast> Resolutions<'ast> {
    pub fn function(&self, id: StmtId) -> Option<&'ast FnDecl> {
        self.declarations.get(&id).copied().and_then(Stmt::as_fn)
    }
}

#[derive(Debug)]
pub struct Resolver<'ast> {
    scope_stack: ScopeStack,
    loop_stack: Vec<StmtId>,
    result: Resolutions<'ast>,
}

impl<'ast> Resolver<'ast> {
    pub fn resolve_names(module: &'ast Module) -> CompileResult<Resolutions<'ast>> {
        let mut resolver = Self {
            scope_stack: ScopeStack::new(),
            loop_stack: Vec::new(),
            result: Resolutions {
                bindings: HashMap::new(),
                break_targets: HashMap::new(),
                declarations: HashMap::new(),
                functions: Vec::new(),
            },
        };

        resolver.resolve_statements(&module.items)?;

        tracing::debug!(
            identifiers = resolver.result.bindings.len(),
            functions = resolver.result.functions.len(),
            "resolved names"
        );

        Ok(resolver.result)
    }

    fn report(&self, line: usize, message: String) -> CompileError {
        CompileError::Resolve(Diagnostic::new(Stage::Resolver, line, message))
    }

    /// Resolves the statements of one scope. Function names are hoisted so
    /// siblings can call each other regardless of order, and function bodies
    /// are visited once the rest of the scope is done.
    fn resolve_statements(&mut self, statements: &'ast [Stmt]) -> CompileResult<()> {
        for statement in statements {
            if let StmtKind::Fn(decl) = &statement.kind {
                if let Some(Binding::Function(_)) =
                    self.scope_stack.get_shallow_binding(&decl.ident.name)
                {
                    return Err(self.report(
                        statement.line,
                        format!("redefinition of function `{}`", decl.ident.name),
                    ));
                }

                self.scope_stack
                    .add_binding(&decl.ident, Binding::Function(statement.id));
                self.result.declarations.insert(statement.id, statement);
                self.result.functions.push(statement.id);
            }
        }

        for statement in statements {
            self.resolve_statement(statement)?;
        }

        // A later `let` may have shadowed a sibling function. Bodies see the
        // scope as it was right after hoisting.
        for statement in statements {
            if let StmtKind::Fn(decl) = &statement.kind {
                self.scope_stack
                    .add_binding(&decl.ident, Binding::Function(statement.id));
            }
        }

        for statement in statements {
            if let StmtKind::Fn(decl) = &statement.kind {
                self.resolve_function(statement.id, decl)?;
            }
        }

        Ok(())
    }

    fn resolve_function(&mut self, id: StmtId, decl: &'ast FnDecl) -> CompileResult<()> {
        let Some(body) = &decl.body else {
            return Ok(());
        };

        self.scope_stack.push_scope(ScopeKind::Function);

        for (index, param) in decl.params.iter().enumerate() {
            if self
                .scope_stack
                .get_shallow_binding(&param.ident.name)
                .is_some()
            {
                return Err(self.report(
                    param.line,
                    format!("duplicate parameter `{}`", param.ident.name),
                ));
            }

            self.scope_stack.add_binding(
                &param.ident,
                Binding::Parameter {
                    function: id,
                    index,
                },
            );
        }

        // Loops of the enclosing function can't be broken out of from here
        let enclosing_loops = std::mem::take(&mut self.loop_stack);

        self.resolve_block(body)?;

        self.loop_stack = enclosing_loops;
        self.scope_stack.pop_scope();

        Ok(())
    }

    fn resolve_block(&mut self, block: &'ast Block) -> CompileResult<()> {
        self.scope_stack.push_scope(ScopeKind::Block);
        self.resolve_statements(&block.statements)?;
        self.scope_stack.pop_scope();

        Ok(())
    }

    fn resolve_loop_body(&mut self, id: StmtId, body: &'ast Block) -> CompileResult<()> {
        self.loop_stack.push(id);
        self.resolve_block(body)?;
        self.loop_stack.pop();

        Ok(())
    }

    fn resolve_statement(&mut self, statement: &'ast Stmt) -> CompileResult<()> {
        match &statement.kind {
            // Bodies are handled by `resolve_statements`
            StmtKind::Fn(_) | StmtKind::Error => {}
            StmtKind::Let(local) => {
                // The initializer can't see the name it initializes
                if let Some(value) = &local.value {
                    self.resolve_expression(value)?;
                }

                self.scope_stack
                    .add_binding(&local.ident, Binding::Local(statement.id));
                self.result.declarations.insert(statement.id, statement);
            }
            StmtKind::Loop(body) => self.resolve_loop_body(statement.id, body)?,
            StmtKind::While { condition, body } => {
                self.resolve_expression(condition)?;
                self.resolve_loop_body(statement.id, body)?;
            }
            StmtKind::If(if_stmt) => {
                self.resolve_expression(&if_stmt.condition)?;
                self.resolve_block(&if_stmt.truthy)?;

                if let Some(falsy) = &if_stmt.falsy {
                    self.resolve_block(falsy)?;
                }
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.resolve_expression(value)?;
                }
            }
            StmtKind::Break => {
                let Some(target) = self.loop_stack.last().copied() else {
                    return Err(self.report(statement.line, "`break` outside of a loop".into()));
                };

                self.result.break_targets.insert(statement.id, target);
            }
            StmtKind::Assign { subject, value } => {
                self.resolve_expression(value)?;
                self.resolve_expression(subject)?;
            }
            StmtKind::Expr(expression) => self.resolve_expression(expression)?,
        }

        Ok(())
    }

    fn resolve_expression(&mut self, expression: &Expr) -> CompileResult<()> {
        match &expression.kind {
            ExprKind::Identifier(ident) => {
                let Some(binding) = self.scope_stack.get_binding(&ident.name) else {
                    return Err(self.report(
                        expression.line,
                        format!("undefined identifier `{}`", ident.name),
                    ));
                };

                self.result.bindings.insert(expression.id, binding);
            }
            ExprKind::Call { callee, args } => {
                for arg in args {
                    self.resolve_expression(arg)?;
                }

                self.resolve_expression(callee)?;
            }
            ExprKind::Unary { operand, .. } => self.resolve_expression(operand)?,
            ExprKind::Binary { lhs, rhs, .. } => {
                self.resolve_expression(lhs)?;
                self.resolve_expression(rhs)?;
            }
            ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::Error => {}
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Root,
    Function,
    Block,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    bindings: HashMap<String, Binding>,
}

#[derive(Debug)]
struct ScopeStack {
    stack: Vec<Scope>,
}

impl ScopeStack {
    fn new() -> Self {
        Self {
            stack: vec![Scope {
                kind: ScopeKind::Root,
                bindings: HashMap::new(),
            }],
        }
    }

    /// Creates a new block or function scope
    fn push_scope(&mut self, kind: ScopeKind) {
        self.stack.push(Scope {
            kind,
            bindings: HashMap::new(),
        });
    }

    /// Destroys the current block or function scope
    fn pop_scope(&mut self) {
        debug_assert!(
            self.stack.len() > 1,
            "Attempted to pop the root scope"
        );

        self.stack.pop();
    }

    /// Looks for a binding only within the current (most nested) scope
    fn get_shallow_binding(&self, name: &str) -> Option<Binding> {
        self.stack
            .last()
            .and_then(|scope| scope.bindings.get(name).copied())
    }

    /// Adds a binding to the current (most nested) scope, shadowing any
    /// previous binding of the same name
    fn add_binding(&mut self, ident: &Identifier, binding: Binding) {
        if let Some(scope) = self.stack.last_mut() {
            scope.bindings.insert(ident.name.clone(), binding);
        }
    }

    /// Traverses the scope stack from innermost to outermost. Once a function
    /// boundary is crossed only functions stay visible.
    fn get_binding(&self, name: &str) -> Option<Binding> {
        let mut crossed_function = false;

        for scope in self.stack.iter().rev() {
            if let Some(binding) = scope.bindings.get(name).copied() {
                if !crossed_function || matches!(binding, Binding::Function(_)) {
                    return Some(binding);
                }
            }

            if scope.kind == ScopeKind::Function {
                crossed_function = true;
            }
        }

        None
    }
}
