use crate::{
    error::{CompileError, CompileResult, Diagnostic, Stage},
    frontend::{
        SourceFile,
        ast::{
            Attr, BinaryOperator, Block, BlockId, Expr, ExprId, ExprKind, FnDecl, Identifier,
            IfStmt, LetStmt, Module, Param, Stmt, StmtId, StmtKind, Ty, TyId, TyKind,
            UnaryOperator,
        },
        lexer::{Keyword, Lexer, Token, TokenKind, TokenValue},
    },
    index::IdGenerator,
};

type ParseResult<T> = Result<T, Diagnostic>;

#[derive(Debug)]
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    stmt_ids: IdGenerator<StmtId>,
    expr_ids: IdGenerator<ExprId>,
    ty_ids: IdGenerator<TyId>,
    block_ids: IdGenerator<BlockId>,
    diagnostics: Vec<Diagnostic>,
}

impl<'source> Parser<'source> {
    /// Parses a whole file. Syntax errors are collected and reported together
    /// once the end of the file is reached.
    pub fn parse_module(source_file: &'source SourceFile) -> CompileResult<Module<'source>> {
        let mut parser = Self {
            lexer: Lexer::new(source_file),
            stmt_ids: IdGenerator::new(),
            expr_ids: IdGenerator::new(),
            ty_ids: IdGenerator::new(),
            block_ids: IdGenerator::new(),
            diagnostics: Vec::new(),
        };

        let mut module = Module {
            source_file,
            items: Vec::new(),
        };

        while let Some(kind) = parser.peek_kind() {
            // A stray closing brace can't be consumed by any statement
            if kind == TokenKind::CloseBrace {
                let token = parser.lexer.next();
                parser.report(token.map_or(0, |t| t.line), "unexpected `}`");
                continue;
            }

            module.items.push(parser.parse_statement());
        }

        let mut diagnostics = parser.lexer.take_diagnostics();
        diagnostics.append(&mut parser.diagnostics);
        // Stable, so lexer problems come first within a line
        diagnostics.sort_by_key(|diagnostic| diagnostic.line);

        if !diagnostics.is_empty() {
            return Err(CompileError::Syntax(diagnostics));
        }

        tracing::debug!(items = module.items.len(), "parsed module");

        Ok(module)
    }

    fn report(&mut self, line: usize, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(Stage::Parser, line, message));
    }

    fn peek_kind(&mut self) -> Option<TokenKind> {
        self.lexer.peek().map(|token| token.kind)
    }

    fn peek_line(&mut self) -> usize {
        let line = self.lexer.peek().map(|token| token.line);
        line.unwrap_or_else(|| self.lexer.line_number())
    }

    fn at(&mut self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    /// Consumes the next token only if it has the given kind
    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) { self.lexer.next() } else { None }
    }

    /// Builds the diagnostic for the token at the cursor without consuming it
    fn unexpected(&mut self, expecting: &str) -> Diagnostic {
        let line = self.peek_line();
        let found = match self.lexer.peek() {
            Some(token) => token.kind.to_string(),
            None => "end of file".to_string(),
        };

        Diagnostic::new(
            Stage::Parser,
            line,
            format!("expected {expecting} but found {found}"),
        )
    }

    fn expect_next_to_be(&mut self, kind: TokenKind) -> ParseResult<Token> {
        match self.eat(kind) {
            Some(token) => Ok(token),
            None => Err(self.unexpected(&kind.to_string())),
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<Token> {
        self.expect_next_to_be(TokenKind::Keyword(keyword))
    }

    /// Skips to the end of the current statement: past the next `;` or up to
    /// (not including) the `}` closing the current block. Nested braces are
    /// skipped as a unit.
    fn synchronize(&mut self) {
        let mut depth = 0usize;

        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Semicolon if depth == 0 => {
                    self.lexer.next();
                    return;
                }
                TokenKind::CloseBrace if depth == 0 => return,
                TokenKind::CloseBrace => depth -= 1,
                TokenKind::OpenBrace => depth += 1,
                _ => {}
            }

            self.lexer.next();
        }
    }

    fn parse_identifier(&mut self) -> ParseResult<Identifier> {
        let token = self.expect_next_to_be(TokenKind::Identifier)?;

        Ok(Identifier {
            span: token.span,
            name: self.lexer.source().value_of_span(token.span).to_string(),
        })
    }

    fn parse_block(&mut self) -> ParseResult<Block> {
        let open_brace = self.expect_next_to_be(TokenKind::OpenBrace)?;
        let mut statements = Vec::new();

        while !matches!(self.peek_kind(), Some(TokenKind::CloseBrace) | None) {
            statements.push(self.parse_statement());
        }

        self.expect_next_to_be(TokenKind::CloseBrace)?;

        Ok(Block {
            id: self.block_ids.next(),
            line: open_brace.line,
            statements,
        })
    }

    /// Parses one statement, recovering from any syntax error inside it
    fn parse_statement(&mut self) -> Stmt {
        let line = self.peek_line();

        match self.parse_statement_kind() {
            Ok(kind) => Stmt {
                id: self.stmt_ids.next(),
                line,
                kind,
            },
            Err(diagnostic) => {
                self.diagnostics.push(diagnostic);
                self.synchronize();

                Stmt {
                    id: self.stmt_ids.next(),
                    line,
                    kind: StmtKind::Error,
                }
            }
        }
    }

    fn parse_statement_kind(&mut self) -> ParseResult<StmtKind> {
        let Some(kind) = self.peek_kind() else {
            return Err(self.unexpected("statement"));
        };

        match kind {
            TokenKind::Hash | TokenKind::Keyword(Keyword::Fn) => {
                let attrs = self.parse_attributes()?;

                if !self.at(TokenKind::Keyword(Keyword::Fn)) {
                    return Err(self.unexpected("`fn` after attributes"));
                }

                Ok(StmtKind::Fn(Box::new(self.parse_function(attrs)?)))
            }
            TokenKind::Keyword(Keyword::Let) => Ok(StmtKind::Let(Box::new(self.parse_let()?))),
            TokenKind::Keyword(Keyword::Loop) => {
                self.expect_keyword(Keyword::Loop)?;
                Ok(StmtKind::Loop(self.parse_block()?))
            }
            TokenKind::Keyword(Keyword::While) => {
                self.expect_keyword(Keyword::While)?;
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;

                Ok(StmtKind::While { condition, body })
            }
            TokenKind::Keyword(Keyword::If) => Ok(StmtKind::If(Box::new(self.parse_if()?))),
            TokenKind::Keyword(Keyword::Return) => {
                self.expect_keyword(Keyword::Return)?;

                let value = if self.at(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };

                self.expect_next_to_be(TokenKind::Semicolon)?;

                Ok(StmtKind::Return(value))
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.expect_keyword(Keyword::Break)?;
                self.expect_next_to_be(TokenKind::Semicolon)?;

                Ok(StmtKind::Break)
            }
            _ => {
                let expression = self.parse_expression()?;

                let kind = if self.eat(TokenKind::Equals).is_some() {
                    StmtKind::Assign {
                        subject: expression,
                        value: self.parse_expression()?,
                    }
                } else {
                    StmtKind::Expr(expression)
                };

                self.expect_next_to_be(TokenKind::Semicolon)?;

                Ok(kind)
            }
        }
    }

    /// #[name] or #[name(args, ...)]
    fn parse_attributes(&mut self) -> ParseResult<Vec<Attr>> {
        let mut attrs = Vec::new();

        while let Some(hash) = self.eat(TokenKind::Hash) {
            self.expect_next_to_be(TokenKind::OpenBracket)?;
            let ident = self.parse_identifier()?;

            let args = if self.at(TokenKind::OpenParen) {
                self.parse_call_arguments()?
            } else {
                Vec::new()
            };

            self.expect_next_to_be(TokenKind::CloseBracket)?;

            attrs.push(Attr {
                ident,
                line: hash.line,
                args,
            });
        }

        Ok(attrs)
    }

    /// fn name(param: ty, ...) -> return_type { ... }
    ///
    /// The body may be replaced by `;` for externally defined functions.
    fn parse_function(&mut self, attrs: Vec<Attr>) -> ParseResult<FnDecl> {
        let fn_keyword = self.expect_keyword(Keyword::Fn)?;
        let ident = self.parse_identifier()?;

        self.expect_next_to_be(TokenKind::OpenParen)?;

        let mut params = Vec::new();

        while !self.at(TokenKind::CloseParen) {
            let line = self.peek_line();
            let ident = self.parse_identifier()?;
            self.expect_next_to_be(TokenKind::Colon)?;
            let ty = self.parse_type()?;

            params.push(Param { ident, line, ty });

            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen)?;

        let return_ty = if self.eat(TokenKind::Arrow).is_some() {
            self.parse_type()?
        } else {
            Ty {
                id: self.ty_ids.next(),
                line: fn_keyword.line,
                kind: TyKind::Void,
            }
        };

        let body = if self.eat(TokenKind::Semicolon).is_some() {
            None
        } else {
            Some(self.parse_block()?)
        };

        Ok(FnDecl {
            ident,
            attrs,
            params,
            return_ty,
            body,
        })
    }

    /// let name: ty = value;
    fn parse_let(&mut self) -> ParseResult<LetStmt> {
        self.expect_keyword(Keyword::Let)?;
        let ident = self.parse_identifier()?;

        let ty = if self.eat(TokenKind::Colon).is_some() {
            Some(self.parse_type()?)
        } else {
            None
        };

        let value = if self.eat(TokenKind::Equals).is_some() {
            Some(self.parse_expression()?)
        } else {
            None
        };

        self.expect_next_to_be(TokenKind::Semicolon)?;

        Ok(LetStmt { ident, ty, value })
    }

    fn parse_if(&mut self) -> ParseResult<IfStmt> {
        self.expect_keyword(Keyword::If)?;

        let condition = self.parse_expression()?;
        let truthy = self.parse_block()?;

        let falsy = match self.eat(TokenKind::Keyword(Keyword::Else)) {
            None => None,
            Some(_) if self.at(TokenKind::Keyword(Keyword::If)) => {
                let line = self.peek_line();
                let nested = self.parse_if()?;

                Some(Block {
                    id: self.block_ids.next(),
                    line,
                    statements: vec![Stmt {
                        id: self.stmt_ids.next(),
                        line,
                        kind: StmtKind::If(Box::new(nested)),
                    }],
                })
            }
            Some(_) => Some(self.parse_block()?),
        };

        Ok(IfStmt {
            condition,
            truthy,
            falsy,
        })
    }

    fn parse_type(&mut self) -> ParseResult<Ty> {
        let line = self.peek_line();

        let kind = if self.eat(TokenKind::Asterisk).is_some() {
            TyKind::Pointer(Box::new(self.parse_type()?))
        } else if self.at(TokenKind::Identifier) {
            TyKind::Identifier(self.parse_identifier()?)
        } else {
            return Err(self.unexpected("type"));
        };

        Ok(Ty {
            id: self.ty_ids.next(),
            line,
            kind,
        })
    }

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_relational_expression()
    }

    fn new_binary(&mut self, operator: BinaryOperator, lhs: Expr, rhs: Expr) -> Expr {
        Expr {
            id: self.expr_ids.next(),
            line: lhs.line,
            kind: ExprKind::Binary {
                operator,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    fn parse_relational_expression(&mut self) -> ParseResult<Expr> {
        let mut expression = self.parse_equality_expression()?;

        while self.peek_kind().is_some_and(|k| k.is_relational_operator()) {
            let operator = match self.lexer.next().map(|t| t.kind) {
                Some(TokenKind::LessThan) => BinaryOperator::Lt,
                Some(TokenKind::LessThanOrEqualTo) => BinaryOperator::Le,
                Some(TokenKind::GreaterThan) => BinaryOperator::Gt,
                _ => BinaryOperator::Ge,
            };
            let rhs = self.parse_equality_expression()?;

            expression = self.new_binary(operator, expression, rhs);
        }

        Ok(expression)
    }

    fn parse_equality_expression(&mut self) -> ParseResult<Expr> {
        let mut expression = self.parse_term_expression()?;

        while self.peek_kind().is_some_and(|k| k.is_equality_operator()) {
            let operator = match self.lexer.next().map(|t| t.kind) {
                Some(TokenKind::DoubleEquals) => BinaryOperator::Eq,
                _ => BinaryOperator::Ne,
            };
            let rhs = self.parse_term_expression()?;

            expression = self.new_binary(operator, expression, rhs);
        }

        Ok(expression)
    }

    fn parse_term_expression(&mut self) -> ParseResult<Expr> {
        let mut expression = self.parse_factor_expression()?;

        while self.peek_kind().is_some_and(|k| k.is_term_operator()) {
            let operator = match self.lexer.next().map(|t| t.kind) {
                Some(TokenKind::Plus) => BinaryOperator::Add,
                _ => BinaryOperator::Sub,
            };
            let rhs = self.parse_factor_expression()?;

            expression = self.new_binary(operator, expression, rhs);
        }

        Ok(expression)
    }

    fn parse_factor_expression(&mut self) -> ParseResult<Expr> {
        let mut expression = self.parse_unary_expression()?;

        while self.peek_kind().is_some_and(|k| k.is_factor_operator()) {
            let operator = match self.lexer.next().map(|t| t.kind) {
                Some(TokenKind::Asterisk) => BinaryOperator::Mul,
                Some(TokenKind::Divide) => BinaryOperator::Div,
                _ => BinaryOperator::Mod,
            };
            let rhs = self.parse_unary_expression()?;

            expression = self.new_binary(operator, expression, rhs);
        }

        Ok(expression)
    }

    fn parse_unary_expression(&mut self) -> ParseResult<Expr> {
        if !self.peek_kind().is_some_and(|k| k.is_unary_operator()) {
            return self.parse_call_expression();
        }

        let Some(token) = self.lexer.next() else {
            return Err(self.unexpected("expression"));
        };

        let operator = match token.kind {
            TokenKind::Bang => UnaryOperator::Not,
            _ => UnaryOperator::Negate,
        };
        let operand = self.parse_unary_expression()?;

        Ok(Expr {
            id: self.expr_ids.next(),
            line: token.line,
            kind: ExprKind::Unary {
                operator,
                operand: Box::new(operand),
            },
        })
    }

    fn parse_call_expression(&mut self) -> ParseResult<Expr> {
        let mut expression = self.parse_atomic_expression()?;

        while self.at(TokenKind::OpenParen) {
            let args = self.parse_call_arguments()?;

            expression = Expr {
                id: self.expr_ids.next(),
                line: expression.line,
                kind: ExprKind::Call {
                    callee: Box::new(expression),
                    args,
                },
            };
        }

        Ok(expression)
    }

    /// (arg, arg, ...)
    fn parse_call_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect_next_to_be(TokenKind::OpenParen)?;

        let mut args = Vec::new();

        while !self.at(TokenKind::CloseParen) {
            args.push(self.parse_expression()?);

            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen)?;

        Ok(args)
    }

    fn parse_atomic_expression(&mut self) -> ParseResult<Expr> {
        let line = self.peek_line();

        let kind = match self.peek_kind() {
            Some(TokenKind::Identifier) => ExprKind::Identifier(self.parse_identifier()?),
            Some(TokenKind::IntegerLiteral) | Some(TokenKind::StringLiteral) => {
                match self.lexer.next().map(|t| t.value) {
                    Some(TokenValue::Integer(value)) => ExprKind::Int(value),
                    Some(TokenValue::String(value)) => ExprKind::Str(value),
                    _ => ExprKind::Error,
                }
            }
            Some(TokenKind::OpenParen) => {
                self.expect_next_to_be(TokenKind::OpenParen)?;
                let expression = self.parse_expression()?;
                self.expect_next_to_be(TokenKind::CloseParen)?;

                return Ok(expression);
            }
            _ => return Err(self.unexpected("expression")),
        };

        Ok(Expr {
            id: self.expr_ids.next(),
            line,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn parse(source: &SourceFile) -> Module<'_> {
        match Parser::parse_module(source) {
            Ok(module) => module,
            Err(error) => panic!("unexpected parse failure: {error}"),
        }
    }

    fn return_value<'a>(module: &'a Module<'a>) -> &'a Expr {
        let body = module.items[0]
            .as_fn()
            .and_then(|decl| decl.body.as_ref())
            .expect("function with a body");

        match &body.statements[0].kind {
            StmtKind::Return(Some(expression)) => expression,
            other => panic!("expected return, found {other:?}"),
        }
    }

    /// Renders an expression fully parenthesized
    fn render(expression: &Expr) -> String {
        match &expression.kind {
            ExprKind::Identifier(ident) => ident.name.clone(),
            ExprKind::Int(value) => value.to_string(),
            ExprKind::Str(value) => format!("{value:?}"),
            ExprKind::Call { callee, args } => format!(
                "{}({})",
                render(callee),
                args.iter().map(render).collect::<Vec<_>>().join(", ")
            ),
            ExprKind::Unary { operator, operand } => {
                let symbol = match operator {
                    UnaryOperator::Not => "!",
                    UnaryOperator::Negate => "-",
                };
                format!("({symbol}{})", render(operand))
            }
            ExprKind::Binary { operator, lhs, rhs } => {
                format!("({} {operator} {})", render(lhs), render(rhs))
            }
            ExprKind::Error => "<error>".to_string(),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let source = SourceFile::from_memory("fn main() -> int { return 1 + 2 * 3; }");
        let module = parse(&source);

        assert_eq!(render(return_value(&module)), "(1 add (2 mul 3))");
    }

    #[test]
    fn binary_operators_are_left_associative() {
        let source = SourceFile::from_memory("fn main() -> int { return 10 - 4 - 3; }");
        let module = parse(&source);

        assert_eq!(render(return_value(&module)), "((10 sub 4) sub 3)");
    }

    #[test]
    fn relational_is_loosest() {
        let source = SourceFile::from_memory("fn main() -> int { return a == b < c + 1; }");
        let module = parse(&source);

        assert_eq!(render(return_value(&module)), "((a eq b) lt (c add 1))");
    }

    #[test]
    fn unary_and_calls() {
        let source = SourceFile::from_memory("fn main() -> int { return -f(1, !x)(2) * 3; }");
        let module = parse(&source);

        assert_eq!(
            render(return_value(&module)),
            "((-f(1, (!x))(2)) mul 3)"
        );
    }

    #[test]
    fn parses_attributes_and_declarations() {
        let source = SourceFile::from_memory(indoc! {r#"
            #[c_function("puts")]
            fn sbc_puts(s: *str) -> int;

            fn main() {}
        "#});
        let module = parse(&source);

        let decl = module.items[0].as_fn().expect("function");
        assert_eq!(decl.ident.name, "sbc_puts");
        assert_eq!(decl.attrs[0].ident.name, "c_function");
        assert_eq!(decl.attrs[0].line, 1);
        assert!(matches!(decl.attrs[0].args[0].kind, ExprKind::Str(ref s) if s == "puts"));
        assert!(matches!(decl.params[0].ty.kind, TyKind::Pointer(_)));
        assert!(decl.body.is_none());

        let main = module.items[1].as_fn().expect("function");
        assert!(matches!(main.return_ty.kind, TyKind::Void));
        assert_eq!(module.items[1].line, 4);
    }

    #[test]
    fn else_if_chains_nest() {
        let source = SourceFile::from_memory(indoc! {"
            fn main() {
                if a { } else if b { } else { x = 1; }
            }
        "});
        let module = parse(&source);
        let body = module.items[0].as_fn().and_then(|f| f.body.as_ref()).expect("body");

        let StmtKind::If(outer) = &body.statements[0].kind else {
            panic!("expected if");
        };
        let falsy = outer.falsy.as_ref().expect("else branch");
        let StmtKind::If(inner) = &falsy.statements[0].kind else {
            panic!("expected nested if");
        };
        assert!(matches!(
            inner.falsy.as_ref().map(|b| &b.statements[0].kind),
            Some(StmtKind::Assign { .. })
        ));
    }

    #[test]
    fn ids_are_unique_per_category() {
        let source = SourceFile::from_memory(indoc! {"
            fn main() {
                let a = 1 + 2;
                let b = a * 3;
                loop { break; }
            }
        "});
        let module = parse(&source);
        let body = module.items[0].as_fn().and_then(|f| f.body.as_ref()).expect("body");

        let mut ids = body.statements.iter().map(|s| s.id).collect::<Vec<_>>();
        ids.push(module.items[0].id);
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn recovers_and_reports_every_error() {
        let source = SourceFile::from_memory(indoc! {"
            fn main() {
                let = 1;
                let ok = 2;
                return ok +;
            }
        "});

        let Err(CompileError::Syntax(diagnostics)) = Parser::parse_module(&source) else {
            panic!("expected syntax errors");
        };

        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].line, 2);
        assert_eq!(
            diagnostics[0].message,
            "expected identifier but found `=`"
        );
        assert_eq!(diagnostics[1].line, 4);
        assert_eq!(
            diagnostics[1].to_string(),
            "Parser: expected expression but found `;` on line 4"
        );
    }

    #[test]
    fn stray_closing_brace_does_not_hang() {
        let source = SourceFile::from_memory("} fn main() {}");

        let Err(CompileError::Syntax(diagnostics)) = Parser::parse_module(&source) else {
            panic!("expected syntax errors");
        };

        assert_eq!(diagnostics[0].message, "unexpected `}`");
    }

    #[test]
    fn reports_unterminated_strings_from_the_lexer() {
        let source = SourceFile::from_memory("fn main() {\n  let s = \"oops;\n}");

        let Err(error) = Parser::parse_module(&source) else {
            panic!("expected failure");
        };

        assert!(
            error
                .diagnostics()
                .iter()
                .any(|d| d.stage == Stage::Lexer && d.line == 2
                    && d.message == "unterminated string literal")
        );
    }
}
