use std::rc::Rc;

use hashbrown::HashMap;

use crate::{
    error::{CompileError, CompileResult, Diagnostic, Stage},
    frontend::ast::{
        Block, Expr, ExprId, ExprKind, FnDecl, Module, Stmt, StmtId, StmtKind, Ty, TyId, TyKind,
        UnaryOperator,
    },
    middle::{
        attributes::FunctionAttributes,
        resolve::{Binding, Resolutions},
        ty::{FunctionType, PrimitiveKind, Type, resolve_types},
    },
};

/// C functions receive their arguments in registers, of which there are six
pub const MAX_C_FUNCTION_PARAMETERS: usize = 6;

/// Answers type queries about the AST. Every answer is computed on first use
/// and cached by node id.
#[derive(Debug)]
pub struct Checker<'r, 'ast> {
    resolutions: &'r Resolutions<'ast>,
    expr_types: HashMap<ExprId, Type>,
    fn_types: HashMap<StmtId, Type>,
    let_types: HashMap<StmtId, Type>,
    ty_types: HashMap<TyId, Type>,
}

impl<'r, 'ast> Checker<'r, 'ast> {
    pub fn new(resolutions: &'r Resolutions<'ast>) -> Self {
        Self {
            resolutions,
            expr_types: HashMap::new(),
            fn_types: HashMap::new(),
            let_types: HashMap::new(),
            ty_types: HashMap::new(),
        }
    }

    pub fn resolutions(&self) -> &'r Resolutions<'ast> {
        self.resolutions
    }

    fn report(&self, line: usize, message: impl Into<String>) -> CompileError {
        CompileError::Type(Diagnostic::new(Stage::Checker, line, message))
    }

    /// Eagerly checks every function in the program, stopping at the first
    /// error
    pub fn check_program(&mut self, module: &Module) -> CompileResult<()> {
        for item in &module.items {
            if !matches!(item.kind, StmtKind::Fn(_)) {
                return Err(self.report(
                    item.line,
                    "only functions are allowed at the top level",
                ));
            }
        }

        let resolutions = self.resolutions;

        for &id in &resolutions.functions {
            let Some(stmt) = resolutions.declarations.get(&id).copied() else {
                return Err(CompileError::internal(format!("function {id} was not recorded")));
            };

            if let StmtKind::Fn(decl) = &stmt.kind {
                self.check_function(stmt, decl)?;
            }
        }

        tracing::debug!(
            expressions = self.expr_types.len(),
            functions = self.fn_types.len(),
            "checked program"
        );

        Ok(())
    }

    fn check_function(&mut self, stmt: &Stmt, decl: &FnDecl) -> CompileResult<()> {
        let attributes = FunctionAttributes::of(decl)?;
        let name = &decl.ident.name;

        match (&decl.body, &attributes.c_function) {
            (None, None) => {
                return Err(self.report(
                    stmt.line,
                    format!("function `{name}` has no body"),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(self.report(
                    stmt.line,
                    format!("`c_function` declaration `{name}` cannot have a body"),
                ));
            }
            _ => {}
        }

        // Both shims move every argument through a C argument register
        let c_interface = match (&attributes.c_function, &attributes.c_export) {
            (Some(_), _) => Some("`c_function` declarations"),
            (None, Some(_)) => Some("`c_export` functions"),
            (None, None) => None,
        };

        if let Some(kind) = c_interface.filter(|_| decl.params.len() > MAX_C_FUNCTION_PARAMETERS) {
            return Err(self.report(
                stmt.line,
                format!("{kind} take at most {MAX_C_FUNCTION_PARAMETERS} parameters"),
            ));
        }

        let ty = self.type_of_fn(stmt.id)?;
        let Some(function) = ty.as_function() else {
            return Err(CompileError::internal("function without a function type"));
        };

        for (param, ty) in decl.params.iter().zip(&function.parameters) {
            if *ty == Type::Void {
                return Err(self.report(
                    param.line,
                    format!("parameter `{}` cannot have type `void`", param.ident.name),
                ));
            }
        }

        if let Some(body) = &decl.body {
            let return_type = function.return_type.clone();
            self.check_block(body, &return_type)?;
        }

        Ok(())
    }

    fn check_block(&mut self, block: &Block, return_type: &Type) -> CompileResult<()> {
        for statement in &block.statements {
            self.check_statement(statement, return_type)?;
        }

        Ok(())
    }

    fn expect_condition(&mut self, condition: &Expr) -> CompileResult<()> {
        let ty = self.type_of_expr(condition)?;

        match resolve_types(&ty, &Type::Int) {
            Ok(_) => Ok(()),
            Err(_) => Err(self.report(
                condition.line,
                format!("condition must be `int`, found `{ty}`"),
            )),
        }
    }

    fn check_statement(&mut self, statement: &Stmt, return_type: &Type) -> CompileResult<()> {
        match &statement.kind {
            // Nested functions are checked on their own
            StmtKind::Fn(_) | StmtKind::Error | StmtKind::Break => {}
            StmtKind::Let(_) => {
                self.type_of_let(statement.id)?;
            }
            StmtKind::Loop(body) => self.check_block(body, return_type)?,
            StmtKind::While { condition, body } => {
                self.expect_condition(condition)?;
                self.check_block(body, return_type)?;
            }
            StmtKind::If(if_stmt) => {
                self.expect_condition(&if_stmt.condition)?;
                self.check_block(&if_stmt.truthy, return_type)?;

                if let Some(falsy) = &if_stmt.falsy {
                    self.check_block(falsy, return_type)?;
                }
            }
            StmtKind::Return(Some(value)) => {
                let ty = self.type_of_expr(value)?;

                resolve_types(&ty, return_type)
                    .map_err(|message| self.report(statement.line, message))?;
            }
            StmtKind::Return(None) => {
                if !matches!(return_type, Type::Void | Type::Error) {
                    return Err(self.report(
                        statement.line,
                        format!("missing return value of type `{return_type}`"),
                    ));
                }
            }
            StmtKind::Assign { subject, value } => {
                let target = self.type_of_assignment_target(subject)?;
                let ty = self.type_of_expr(value)?;

                resolve_types(&ty, &target)
                    .map_err(|message| self.report(statement.line, message))?;
            }
            StmtKind::Expr(expression) => {
                self.type_of_expr(expression)?;
            }
        }

        Ok(())
    }

    /// Only locals and parameters can be assigned to
    fn type_of_assignment_target(&mut self, subject: &Expr) -> CompileResult<Type> {
        let ExprKind::Identifier(ident) = &subject.kind else {
            return Err(self.report(subject.line, "cannot assign to this expression"));
        };

        match self.resolutions.bindings.get(&subject.id).copied() {
            Some(Binding::Local(_) | Binding::Parameter { .. }) => self.type_of_expr(subject),
            Some(Binding::Function(_)) => Err(self.report(
                subject.line,
                format!("cannot assign to function `{}`", ident.name),
            )),
            None => Err(CompileError::internal(format!(
                "identifier `{}` was not resolved",
                ident.name
            ))),
        }
    }

    pub fn type_of_ty(&mut self, ty: &Ty) -> CompileResult<Type> {
        if let Some(resolved) = self.ty_types.get(&ty.id) {
            return Ok(resolved.clone());
        }

        let resolved = match &ty.kind {
            TyKind::Error => Type::Error,
            TyKind::Void => Type::Void,
            TyKind::Identifier(ident) => match ident.name.parse::<PrimitiveKind>() {
                Ok(kind) => kind.into(),
                Err(_) => {
                    return Err(self.report(ty.line, format!("unknown type `{}`", ident.name)));
                }
            },
            TyKind::Pointer(inner) => Type::pointer_to(self.type_of_ty(inner)?),
        };

        self.ty_types.insert(ty.id, resolved.clone());

        Ok(resolved)
    }

    pub fn type_of_fn(&mut self, id: StmtId) -> CompileResult<Type> {
        if let Some(ty) = self.fn_types.get(&id) {
            return Ok(ty.clone());
        }

        let Some(decl) = self.resolutions.function(id) else {
            return Err(CompileError::internal(format!("{id} is not a function")));
        };

        let parameters = decl
            .params
            .iter()
            .map(|param| self.type_of_ty(&param.ty))
            .collect::<CompileResult<Vec<_>>>()?;
        let return_type = self.type_of_ty(&decl.return_ty)?;

        let ty = Type::Function(Rc::new(FunctionType {
            decl: id,
            parameters,
            return_type,
        }));
        self.fn_types.insert(id, ty.clone());

        Ok(ty)
    }

    pub fn type_of_param(&mut self, function: StmtId, index: usize) -> CompileResult<Type> {
        let ty = self.type_of_fn(function)?;

        ty.as_function()
            .and_then(|function| function.parameters.get(index).cloned())
            .ok_or_else(|| CompileError::internal(format!("no parameter {index} in {function}")))
    }

    pub fn type_of_let(&mut self, id: StmtId) -> CompileResult<Type> {
        let Some(stmt) = self.resolutions.declarations.get(&id).copied() else {
            return Err(CompileError::internal(format!("{id} is not a declaration")));
        };

        match self.let_types.get(&id) {
            Some(Type::Unknown) => return Err(self.report(stmt.line, "could not infer type")),
            Some(ty) => return Ok(ty.clone()),
            None => {}
        }

        let Some(local) = stmt.as_let() else {
            return Err(CompileError::internal(format!("{id} is not a let statement")));
        };

        self.let_types.insert(id, Type::Unknown);

        let declared = local.ty.as_ref().map(|ty| self.type_of_ty(ty)).transpose()?;
        let value = local
            .value
            .as_ref()
            .map(|value| self.type_of_expr(value))
            .transpose()?;

        let ty = match (declared, value) {
            (Some(declared), Some(value)) => resolve_types(&value, &declared)
                .map(|_| declared)
                .map_err(|message| self.report(stmt.line, message))?,
            (Some(ty), None) | (None, Some(ty)) => ty,
            (None, None) => Type::Unknown,
        };

        match ty {
            Type::Unknown => return Err(self.report(stmt.line, "could not infer type")),
            Type::Void => {
                return Err(self.report(
                    stmt.line,
                    format!("`{}` cannot have type `void`", local.ident.name),
                ));
            }
            _ => {}
        }

        self.let_types.insert(id, ty.clone());

        Ok(ty)
    }

    fn type_of_binding(&mut self, binding: Binding) -> CompileResult<Type> {
        match binding {
            Binding::Function(id) => self.type_of_fn(id),
            Binding::Parameter { function, index } => self.type_of_param(function, index),
            Binding::Local(id) => self.type_of_let(id),
        }
    }

    pub fn type_of_expr(&mut self, expression: &Expr) -> CompileResult<Type> {
        if let Some(ty) = self.expr_types.get(&expression.id) {
            return Ok(ty.clone());
        }

        let ty = match &expression.kind {
            ExprKind::Error => Type::Error,
            ExprKind::Int(_) => Type::Int,
            ExprKind::Str(_) => Type::pointer_to(Type::Str),
            ExprKind::Identifier(ident) => {
                let Some(binding) = self.resolutions.bindings.get(&expression.id).copied() else {
                    return Err(CompileError::internal(format!(
                        "identifier `{}` was not resolved",
                        ident.name
                    )));
                };

                self.type_of_binding(binding)?
            }
            ExprKind::Call { callee, args } => {
                let callee_ty = self.type_of_expr(callee)?;

                let Type::Function(function) = callee_ty else {
                    return Err(self.report(expression.line, "call to non-function"));
                };

                if function.parameters.len() != args.len() {
                    return Err(self.report(
                        expression.line,
                        format!(
                            "argument mismatch, expected {}, got {}",
                            function.parameters.len(),
                            args.len()
                        ),
                    ));
                }

                for (arg, parameter) in args.iter().zip(&function.parameters) {
                    let ty = self.type_of_expr(arg)?;

                    resolve_types(&ty, parameter).map_err(|message| {
                        self.report(expression.line, format!("argument mismatch, {message}"))
                    })?;
                }

                function.return_type.clone()
            }
            ExprKind::Unary { operator, operand } => {
                let ty = self.type_of_expr(operand)?;

                if resolve_types(&ty, &Type::Int).is_err() {
                    let symbol = match operator {
                        UnaryOperator::Not => "!",
                        UnaryOperator::Negate => "-",
                    };

                    return Err(self.report(
                        expression.line,
                        format!("cannot apply `{symbol}` to type `{ty}`"),
                    ));
                }

                Type::Int
            }
            ExprKind::Binary { operator, lhs, rhs } => {
                let left = self.type_of_expr(lhs)?;
                let right = self.type_of_expr(rhs)?;

                if resolve_types(&left, &Type::Int).is_err()
                    || resolve_types(&right, &Type::Int).is_err()
                {
                    return Err(self.report(
                        expression.line,
                        format!("cannot `{operator}` type `{left}` with `{right}`"),
                    ));
                }

                Type::Int
            }
        };

        self.expr_types.insert(expression.id, ty.clone());

        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        frontend::{SourceFile, parser::Parser},
        middle::resolve::Resolver,
    };

    fn check(source: &str) -> CompileResult<()> {
        let source = SourceFile::from_memory(source);
        let module = Parser::parse_module(&source)?;
        let resolutions = Resolver::resolve_names(&module)?;

        Checker::new(&resolutions).check_program(&module)
    }

    fn check_error(source: &str) -> String {
        match check(source) {
            Err(error) => error.to_string(),
            Ok(()) => panic!("expected a type error"),
        }
    }

    #[test]
    fn accepts_well_typed_programs() {
        let source = indoc! {r#"
            #[c_function("puts")]
            fn sbc_puts(s: *str) -> int;

            #[c_export("entry")]
            fn main() -> int {
                let greeting = "hello";
                let count: int = 0;
                while count < 3 {
                    sbc_puts(greeting);
                    count = count + 1;
                }
                let callback = helper;
                return callback(count, -1);
            }

            fn helper(a: int, b: int) -> int {
                if !(a == b) { return a % 2; } else { return b; }
            }
        "#};

        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn rejects_argument_count_mismatch() {
        let message = check_error(indoc! {"
            fn f(a: int) -> int { return a; }
            fn main() -> int { return f(1, 2); }
        "});

        assert_eq!(message, "Checker: argument mismatch, expected 1, got 2 on line 2");
    }

    #[test]
    fn rejects_argument_type_mismatch() {
        let message = check_error(indoc! {r#"
            fn f(a: int) -> int { return a; }
            fn main() -> int { return f("no"); }
        "#});

        assert_eq!(
            message,
            "Checker: argument mismatch, type `*str` is not assignable to `int` on line 2"
        );
    }

    #[test]
    fn rejects_calling_non_functions() {
        let message = check_error("fn main() -> int { let x = 1; return x(); }");

        assert_eq!(message, "Checker: call to non-function on line 1");
    }

    #[test]
    fn rejects_assignment_to_functions() {
        let message = check_error(indoc! {"
            fn main() {
                main = main;
            }
        "});

        assert_eq!(message, "Checker: cannot assign to function `main` on line 2");
    }

    #[test]
    fn let_without_type_or_value_cannot_be_inferred() {
        let message = check_error(indoc! {"
            fn main() {
                let x;
            }
        "});

        assert_eq!(message, "Checker: could not infer type on line 2");
    }

    #[test]
    fn return_types_must_match() {
        assert_eq!(
            check_error("fn main() -> int { return \"s\"; }"),
            "Checker: type `*str` is not assignable to `int` on line 1"
        );
        assert_eq!(
            check_error("fn main() -> int { return; }"),
            "Checker: missing return value of type `int` on line 1"
        );
    }

    #[test]
    fn binary_operands_must_be_ints() {
        assert_eq!(
            check_error("fn main() -> int { return 1 + \"s\"; }"),
            "Checker: cannot `add` type `int` with `*str` on line 1"
        );
    }

    #[test]
    fn unknown_type_names_fail() {
        assert_eq!(
            check_error("fn main(x: float) {}"),
            "Checker: unknown type `float` on line 1"
        );
    }

    #[test]
    fn top_level_must_be_functions() {
        assert_eq!(
            check_error("let x = 1;"),
            "Checker: only functions are allowed at the top level on line 1"
        );
    }

    #[test]
    fn validates_declarations() {
        assert_eq!(
            check_error("fn f() -> int;"),
            "Checker: function `f` has no body on line 1"
        );
        assert_eq!(
            check_error("#[c_function(\"g\")] fn f() {}"),
            "Checker: `c_function` declaration `f` cannot have a body on line 1"
        );
        assert_eq!(
            check_error(indoc! {r#"
                #[c_function("g")]
                fn f(a: int, b: int, c: int, d: int, e: int, f: int, g: int);
            "#}),
            "Checker: `c_function` declarations take at most 6 parameters on line 1"
        );
        assert_eq!(
            check_error(indoc! {r#"
                #[c_export("entry")]
                fn f(a: int, b: int, c: int, d: int, e: int, f: int, g: int) {}
            "#}),
            "Checker: `c_export` functions take at most 6 parameters on line 1"
        );
    }

    #[test]
    fn pointer_mismatch_names_both_pointer_types() {
        let message = check_error(indoc! {r#"
            fn f(s: *int) -> int { return 0; }
            fn main() -> int { return f("x"); }
        "#});

        assert_eq!(
            message,
            "Checker: argument mismatch, type `*str` is not assignable to `*int` on line 2"
        );
    }

    #[test]
    fn function_types_are_nominal() {
        let message = check_error(indoc! {"
            fn a() -> int { return 1; }
            fn b() -> int { return 2; }
            fn main() {
                let f = a;
                f = b;
            }
        "});

        assert_eq!(
            message,
            "Checker: type `fn() -> int` is not assignable to `fn() -> int` on line 5"
        );
    }
}
