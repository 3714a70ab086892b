use crate::ast::*;
use crate::diagnostics::{ParseError, VesperError};
use crate::lexer;
use crate::span::Span;
use crate::token::{Keyword, Token, TokenKind};

/// Parses a root program. The root pushes its own frame when interpreted.
pub fn parse(source: &str) -> Result<Node, VesperError> {
    let tokens = lexer::lex(source)?;
    parse_tokens(tokens, false).map_err(VesperError::from)
}

/// Parses an imported script, which runs in the caller's current frame.
pub fn parse_script(source: &str) -> Result<Node, VesperError> {
    let tokens = lexer::lex(source)?;
    parse_tokens(tokens, true).map_err(VesperError::from)
}

pub fn parse_tokens(tokens: Vec<Token>, is_script: bool) -> Result<Node, ParseError> {
    Parser::new(tokens).parse_program(is_script)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    fn parse_program(mut self, is_script: bool) -> Result<Node, ParseError> {
        let start = self.peek().span;
        let mut statements = Vec::new();
        while !self.is_at_end() {
            self.skip_semicolons();
            if self.is_at_end() {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        let span = statements
            .iter()
            .fold(start, |acc, stmt| acc.merge(stmt.span()));
        Ok(Node::Program {
            statements,
            is_script,
            span,
        })
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Keyword(Keyword::Package) => self.parse_package(),
            TokenKind::Keyword(Keyword::Class) => self.parse_class(),
            TokenKind::Keyword(Keyword::Def) => self.parse_function_declaration(false, false),
            TokenKind::Keyword(Keyword::Private) | TokenKind::Keyword(Keyword::Static) => {
                let (is_private, is_static) = self.parse_method_modifiers();
                self.parse_function_declaration(is_private, is_static)
            }
            TokenKind::Keyword(Keyword::Import) => {
                let start = self.advance().span;
                let target = self.parse_expression()?;
                let span = start.merge(target.span());
                Ok(Node::Import {
                    target: Box::new(target),
                    span,
                })
            }
            TokenKind::Keyword(Keyword::Export) => {
                let start = self.advance().span;
                let target = self.parse_expression()?;
                let span = start.merge(target.span());
                Ok(Node::Export {
                    target: Box::new(target),
                    span,
                })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::Case) => self.parse_case(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Repeat) => self.parse_repeat(),
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::Return) => {
                let (value, condition, span) = self.parse_guarded_tail()?;
                Ok(Node::Return {
                    value,
                    condition,
                    span,
                })
            }
            TokenKind::Keyword(Keyword::Throw) => {
                let (value, condition, span) = self.parse_guarded_tail()?;
                Ok(Node::Throw {
                    value,
                    condition,
                    span,
                })
            }
            TokenKind::Keyword(Keyword::Exit) => {
                let (value, condition, span) = self.parse_guarded_tail()?;
                Ok(Node::Exit {
                    value,
                    condition,
                    span,
                })
            }
            TokenKind::Keyword(Keyword::Break) => {
                let start = self.advance().span;
                let condition = self.parse_when_guard()?;
                let span = condition
                    .as_ref()
                    .map(|c| start.merge(c.span()))
                    .unwrap_or(start);
                Ok(Node::Break { condition, span })
            }
            TokenKind::Keyword(Keyword::Next) => {
                let start = self.advance().span;
                let condition = self.parse_when_guard()?;
                let span = condition
                    .as_ref()
                    .map(|c| start.merge(c.span()))
                    .unwrap_or(start);
                Ok(Node::Next { condition, span })
            }
            TokenKind::Keyword(Keyword::Print) => {
                let start = self.advance().span;
                let expression = self.parse_expression()?;
                let span = start.merge(expression.span());
                Ok(Node::Print {
                    expression: Box::new(expression),
                    newline: false,
                    span,
                })
            }
            TokenKind::Keyword(Keyword::Println) => {
                let start = self.advance().span;
                let expression = self.parse_expression()?;
                let span = start.merge(expression.span());
                Ok(Node::Print {
                    expression: Box::new(expression),
                    newline: true,
                    span,
                })
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_method_modifiers(&mut self) -> (bool, bool) {
        let mut is_private = false;
        let mut is_static = false;
        loop {
            if self.match_keyword(Keyword::Private) {
                is_private = true;
            } else if self.match_keyword(Keyword::Static) {
                is_static = true;
            } else {
                break;
            }
        }
        (is_private, is_static)
    }

    /// `return` / `throw` / `exit` with an optional value and an optional
    /// trailing `when` guard.
    fn parse_guarded_tail(
        &mut self,
    ) -> Result<(Option<Box<Node>>, Option<Box<Node>>, Span), ParseError> {
        let start = self.advance().span;
        let value = if !self.check_keyword(Keyword::When)
            && self.starts_expression()
            && self.continues_line()
        {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        let condition = self.parse_when_guard()?;
        let mut span = start;
        if let Some(value) = &value {
            span = span.merge(value.span());
        }
        if let Some(condition) = &condition {
            span = span.merge(condition.span());
        }
        Ok((value, condition, span))
    }

    fn parse_when_guard(&mut self) -> Result<Option<Box<Node>>, ParseError> {
        if self.match_keyword(Keyword::When) {
            Ok(Some(Box::new(self.parse_expression()?)))
        } else {
            Ok(None)
        }
    }

    fn parse_package(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::Package)?.span;
        let (name, _) = self.expect_identifier("package name")?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::PackageDeclaration {
            name,
            body,
            span: start.merge(end),
        })
    }

    fn parse_class(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::Class)?.span;
        let (name, _) = self.expect_identifier("class name")?;
        let base_class = if self.match_with(|k| matches!(k, TokenKind::Less)) {
            let (base, _) = self.expect_identifier("base class name")?;
            Some(base)
        } else {
            None
        };
        let mut methods = Vec::new();
        while !self.check_keyword(Keyword::End) {
            if self.is_at_end() {
                return Err(ParseError::UnbalancedBlock { span: start });
            }
            let (is_private, is_static) = self.parse_method_modifiers();
            methods.push(self.parse_function_declaration(is_private, is_static)?);
        }
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::ClassDeclaration {
            name,
            base_class,
            methods,
            span: start.merge(end),
        })
    }

    fn parse_function_declaration(
        &mut self,
        is_private: bool,
        is_static: bool,
    ) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::Def)?.span;
        let (name, _) = self.expect_identifier("function name")?;
        self.expect_with("'('", |k| matches!(k, TokenKind::LeftParen))?;
        let parameters = self.parse_parameters()?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::FunctionDeclaration {
            name,
            parameters,
            body,
            is_private,
            is_static,
            span: start.merge(end),
        })
    }

    fn parse_parameters(&mut self) -> Result<Vec<Parameter>, ParseError> {
        let mut parameters = Vec::new();
        if !self.check(|k| matches!(k, TokenKind::RightParen)) {
            loop {
                let (name, span) = self.expect_identifier("parameter name")?;
                let default = if self.match_with(|k| matches!(k, TokenKind::Equals)) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                parameters.push(Parameter {
                    name,
                    default,
                    span,
                });
                if !self.match_with(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
        }
        self.expect_with("')'", |k| matches!(k, TokenKind::RightParen))?;
        Ok(parameters)
    }

    fn parse_if(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::If)?.span;
        let condition = self.parse_expression()?;
        let body = self.parse_block_until(&[Keyword::Elsif, Keyword::Else, Keyword::End])?;
        let mut elsif_blocks = Vec::new();
        while self.match_keyword(Keyword::Elsif) {
            let elsif_condition = self.parse_expression()?;
            let elsif_body =
                self.parse_block_until(&[Keyword::Elsif, Keyword::Else, Keyword::End])?;
            elsif_blocks.push((elsif_condition, elsif_body));
        }
        let else_body = if self.match_keyword(Keyword::Else) {
            self.parse_block_until(&[Keyword::End])?
        } else {
            Vec::new()
        };
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::If {
            condition: Box::new(condition),
            body,
            elsif_blocks,
            else_body,
            span: start.merge(end),
        })
    }

    fn parse_case(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::Case)?.span;
        let test = self.parse_expression()?;
        let mut when_blocks = Vec::new();
        while self.match_keyword(Keyword::When) {
            let condition = self.parse_expression()?;
            let body = self.parse_block_until(&[Keyword::When, Keyword::Else, Keyword::End])?;
            when_blocks.push((condition, body));
        }
        let else_body = if self.match_keyword(Keyword::Else) {
            self.parse_block_until(&[Keyword::End])?
        } else {
            Vec::new()
        };
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::Case {
            test: Box::new(test),
            when_blocks,
            else_body,
            span: start.merge(end),
        })
    }

    fn parse_for(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::For)?.span;
        let (value_iterator, _) = self.expect_identifier("loop iterator")?;
        let index_iterator = if self.match_with(|k| matches!(k, TokenKind::Comma)) {
            let (name, _) = self.expect_identifier("loop index iterator")?;
            Some(name)
        } else {
            None
        };
        self.expect_keyword(Keyword::In)?;
        let collection = self.parse_expression()?;
        self.expect_keyword(Keyword::Do)?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::ForLoop {
            value_iterator,
            index_iterator,
            collection: Box::new(collection),
            body,
            span: start.merge(end),
        })
    }

    fn parse_while(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::While)?.span;
        let condition = self.parse_expression()?;
        self.expect_keyword(Keyword::Do)?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::WhileLoop {
            condition: Box::new(condition),
            body,
            span: start.merge(end),
        })
    }

    fn parse_repeat(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::Repeat)?.span;
        let count = self.parse_expression()?;
        let alias = if self.match_keyword(Keyword::As) {
            let (name, _) = self.expect_identifier("repeat alias")?;
            Some(name)
        } else {
            None
        };
        self.expect_keyword(Keyword::Do)?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::RepeatLoop {
            count: Box::new(count),
            alias,
            body,
            span: start.merge(end),
        })
    }

    fn parse_try(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::Try)?.span;
        let try_body = self.parse_block_until(&[Keyword::Catch, Keyword::Finally, Keyword::End])?;
        let catch = if self.match_keyword(Keyword::Catch) {
            let (error_type_name, error_message_name) =
                if self.match_with(|k| matches!(k, TokenKind::LeftParen)) {
                    let (first, _) = self.expect_identifier("catch binding")?;
                    let second = if self.match_with(|k| matches!(k, TokenKind::Comma)) {
                        let (name, _) = self.expect_identifier("catch binding")?;
                        Some(name)
                    } else {
                        None
                    };
                    self.expect_with("')'", |k| matches!(k, TokenKind::RightParen))?;
                    match second {
                        // `catch (t, m)` binds the error type and message;
                        // `catch (m)` binds only the message.
                        Some(message) => (Some(first), Some(message)),
                        None => (None, Some(first)),
                    }
                } else {
                    (None, None)
                };
            let body = self.parse_block_until(&[Keyword::Finally, Keyword::End])?;
            Some(CatchClause {
                error_type_name,
                error_message_name,
                body,
            })
        } else {
            None
        };
        let finally_body = if self.match_keyword(Keyword::Finally) {
            self.parse_block_until(&[Keyword::End])?
        } else {
            Vec::new()
        };
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::Try {
            try_body,
            catch,
            finally_body,
            span: start.merge(end),
        })
    }

    fn parse_block_until(&mut self, terminators: &[Keyword]) -> Result<Vec<Node>, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_semicolons();
            if self.is_at_end() {
                return Err(ParseError::UnexpectedEof { context: "block" });
            }
            if let TokenKind::Keyword(kw) = self.peek().kind {
                if terminators.contains(&kw) {
                    break;
                }
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_expression_statement(&mut self) -> Result<Node, ParseError> {
        let expr = self.parse_expression()?;
        let Some(op) = self.peek_assign_op() else {
            return Ok(expr);
        };
        self.advance();
        let value = self.parse_expression()?;
        let span = expr.span().merge(value.span());
        match expr {
            Node::Identifier { name, .. } => Ok(Node::Assignment {
                target: AssignTarget::Name(name),
                op,
                value: Box::new(value),
                span,
            }),
            Node::SelfRef {
                name: Some(name), ..
            } => Ok(Node::Assignment {
                target: AssignTarget::SelfMember(name),
                op,
                value: Box::new(value),
                span,
            }),
            node @ (Node::Index { .. } | Node::Slice { .. }) => Ok(Node::IndexAssignment {
                object: Box::new(node),
                op,
                value: Box::new(value),
                span,
            }),
            Node::MemberAccess { object, member, .. } => Ok(Node::MemberAssignment {
                object,
                member,
                op,
                value: Box::new(value),
                span,
            }),
            other => Err(ParseError::InvalidAssignmentTarget {
                span: other.span(),
            }),
        }
    }

    fn peek_assign_op(&self) -> Option<AssignOp> {
        match self.peek().kind {
            TokenKind::Equals => Some(AssignOp::Assign),
            TokenKind::PlusEqual => Some(AssignOp::Add),
            TokenKind::MinusEqual => Some(AssignOp::Subtract),
            TokenKind::StarEqual => Some(AssignOp::Multiply),
            TokenKind::SlashEqual => Some(AssignOp::Divide),
            TokenKind::PercentEqual => Some(AssignOp::Modulo),
            TokenKind::StarStarEqual => Some(AssignOp::Power),
            TokenKind::AmpersandEqual => Some(AssignOp::BitAnd),
            TokenKind::PipeEqual => Some(AssignOp::BitOr),
            TokenKind::CaretEqual => Some(AssignOp::BitXor),
            TokenKind::LessLessEqual => Some(AssignOp::Shl),
            TokenKind::GreaterGreaterEqual => Some(AssignOp::Shr),
            TokenKind::TildeEqual => Some(AssignOp::BitNot),
            _ => None,
        }
    }

    fn parse_expression(&mut self) -> Result<Node, ParseError> {
        let condition = self.parse_binary(1)?;
        if self.match_with(|k| matches!(k, TokenKind::Question)) {
            let then_expr = self.parse_expression()?;
            self.expect_with("':'", |k| matches!(k, TokenKind::Colon))?;
            let else_expr = self.parse_expression()?;
            let span = condition.span().merge(else_expr.span());
            return Ok(Node::Ternary {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span,
            });
        }
        Ok(condition)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Node, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let Some((op, precedence, right_assoc)) = binary_op(&self.peek().kind) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let next_min = if right_assoc {
                precedence
            } else {
                precedence + 1
            };
            let right = self.parse_binary(next_min)?;
            let span = left.span().merge(right.span());
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnOp::Negate),
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Tilde => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.advance().span;
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span());
            return Ok(Node::Unary {
                op,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_primary()?;
        loop {
            if self.match_with(|k| matches!(k, TokenKind::Dot)) {
                let (member, member_span) = self.expect_identifier("member name")?;
                if self.check(|k| matches!(k, TokenKind::LeftParen)) && self.continues_line() {
                    let arguments = self.parse_call_arguments()?;
                    let span = node.span().merge(self.prev().span);
                    node = Node::MethodCall {
                        object: Box::new(node),
                        method: member,
                        arguments,
                        span,
                    };
                } else if let Node::SelfRef { name: None, span } = node {
                    node = Node::SelfRef {
                        name: Some(member),
                        span: span.merge(member_span),
                    };
                } else {
                    let span = node.span().merge(member_span);
                    node = Node::MemberAccess {
                        object: Box::new(node),
                        member,
                        span,
                    };
                }
            } else if self.check(|k| matches!(k, TokenKind::LeftBracket)) && self.continues_line() {
                node = self.parse_index_or_slice(node)?;
            } else {
                break;
            }
        }
        Ok(node)
    }

    /// A `[` or `(` only continues the current postfix expression when it
    /// sits on the same line; a fresh line starts a new statement.
    fn continues_line(&self) -> bool {
        self.prev().span.line == self.peek().span.line
    }

    /// Inside brackets a bare `:` separates slice components, so the
    /// component expressions stop below the ternary level.
    fn parse_index_or_slice(&mut self, object: Node) -> Result<Node, ParseError> {
        let open = self
            .expect_with("'['", |k| matches!(k, TokenKind::LeftBracket))?
            .span;
        let mut start = None;
        if !self.check(|k| matches!(k, TokenKind::Colon)) {
            start = Some(Box::new(self.parse_binary(1)?));
        }
        if self.match_with(|k| matches!(k, TokenKind::Colon)) {
            let mut stop = None;
            if !self.check(|k| matches!(k, TokenKind::Colon | TokenKind::RightBracket)) {
                stop = Some(Box::new(self.parse_binary(1)?));
            }
            let mut step = None;
            if self.match_with(|k| matches!(k, TokenKind::Colon))
                && !self.check(|k| matches!(k, TokenKind::RightBracket))
            {
                step = Some(Box::new(self.parse_binary(1)?));
            }
            let close = self
                .expect_with("']'", |k| matches!(k, TokenKind::RightBracket))?
                .span;
            let span = object.span().merge(open).merge(close);
            return Ok(Node::Slice {
                object: Box::new(object),
                start,
                stop,
                step,
                span,
            });
        }
        let close = self
            .expect_with("']'", |k| matches!(k, TokenKind::RightBracket))?
            .span;
        let index = start.ok_or(ParseError::UnexpectedToken {
            expected: "index expression",
            found: TokenKind::RightBracket,
            span: close,
        })?;
        let span = object.span().merge(open).merge(close);
        Ok(Node::Index {
            object: Box::new(object),
            index,
            span,
        })
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::IntegerLiteral(ref text) => {
                self.advance();
                let cleaned = text.replace('_', "");
                let value = cleaned
                    .parse::<i64>()
                    .map_err(|_| ParseError::UnexpectedToken {
                        expected: "integer literal",
                        found: token.kind.clone(),
                        span: token.span,
                    })?;
                Ok(Node::Literal {
                    value: Literal::Int(value),
                    span: token.span,
                })
            }
            TokenKind::FloatLiteral(ref text) => {
                self.advance();
                let cleaned = text.replace('_', "");
                let value = cleaned
                    .parse::<f64>()
                    .map_err(|_| ParseError::UnexpectedToken {
                        expected: "float literal",
                        found: token.kind.clone(),
                        span: token.span,
                    })?;
                Ok(Node::Literal {
                    value: Literal::Float(value),
                    span: token.span,
                })
            }
            TokenKind::StringLiteral(value) => {
                self.advance();
                Ok(Node::Literal {
                    value: Literal::String(value),
                    span: token.span,
                })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Node::Literal {
                    value: Literal::Bool(true),
                    span: token.span,
                })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Node::Literal {
                    value: Literal::Bool(false),
                    span: token.span,
                })
            }
            TokenKind::Keyword(Keyword::SelfKw) => {
                self.advance();
                Ok(Node::SelfRef {
                    name: None,
                    span: token.span,
                })
            }
            TokenKind::Identifier(name) => {
                self.advance();
                let mut name = name;
                let mut span = token.span;
                while self.check(|k| matches!(k, TokenKind::ColonColon)) {
                    self.advance();
                    let (segment, seg_span) = self.expect_identifier("qualified name segment")?;
                    name = format!("{name}::{segment}");
                    span = span.merge(seg_span);
                }
                if self.check(|k| matches!(k, TokenKind::LeftParen)) && self.continues_line() {
                    let arguments = self.parse_call_arguments()?;
                    let span = span.merge(self.prev().span);
                    return Ok(Node::FunctionCall {
                        name,
                        arguments,
                        span,
                    });
                }
                Ok(Node::Identifier { name, span })
            }
            TokenKind::LeftParen => {
                if self.lambda_ahead() {
                    return self.parse_lambda();
                }
                self.advance();
                let inner = self.parse_expression()?;
                self.expect_with("')'", |k| matches!(k, TokenKind::RightParen))?;
                Ok(inner)
            }
            TokenKind::LeftBracket => self.parse_list_or_range(),
            TokenKind::LeftBrace => self.parse_hash(),
            _ => Err(ParseError::UnexpectedToken {
                expected: "expression",
                found: token.kind,
                span: token.span,
            }),
        }
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<Node>, ParseError> {
        self.expect_with("'('", |k| matches!(k, TokenKind::LeftParen))?;
        let mut arguments = Vec::new();
        if !self.check(|k| matches!(k, TokenKind::RightParen)) {
            loop {
                arguments.push(self.parse_expression()?);
                if !self.match_with(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
        }
        self.expect_with("')'", |k| matches!(k, TokenKind::RightParen))?;
        Ok(arguments)
    }

    fn parse_list_or_range(&mut self) -> Result<Node, ParseError> {
        let open = self
            .expect_with("'['", |k| matches!(k, TokenKind::LeftBracket))?
            .span;
        if self.check(|k| matches!(k, TokenKind::RightBracket)) {
            let close = self.advance().span;
            return Ok(Node::ListLiteral {
                elements: Vec::new(),
                span: open.merge(close),
            });
        }
        let first = self.parse_expression()?;
        if self.match_with(|k| matches!(k, TokenKind::DotDot)) {
            let end_expr = self.parse_expression()?;
            let close = self
                .expect_with("']'", |k| matches!(k, TokenKind::RightBracket))?
                .span;
            return Ok(Node::RangeLiteral {
                start: Box::new(first),
                end: Box::new(end_expr),
                span: open.merge(close),
            });
        }
        let mut elements = vec![first];
        while self.match_with(|k| matches!(k, TokenKind::Comma)) {
            elements.push(self.parse_expression()?);
        }
        let close = self
            .expect_with("']'", |k| matches!(k, TokenKind::RightBracket))?
            .span;
        Ok(Node::ListLiteral {
            elements,
            span: open.merge(close),
        })
    }

    fn parse_hash(&mut self) -> Result<Node, ParseError> {
        let open = self
            .expect_with("'{'", |k| matches!(k, TokenKind::LeftBrace))?
            .span;
        let mut entries = Vec::new();
        if !self.check(|k| matches!(k, TokenKind::RightBrace)) {
            loop {
                let key = self.parse_expression()?;
                self.expect_with("':'", |k| matches!(k, TokenKind::Colon))?;
                let value = self.parse_expression()?;
                entries.push((key, value));
                if !self.match_with(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
        }
        let close = self
            .expect_with("'}'", |k| matches!(k, TokenKind::RightBrace))?
            .span;
        Ok(Node::HashLiteral {
            entries,
            span: open.merge(close),
        })
    }

    fn parse_lambda(&mut self) -> Result<Node, ParseError> {
        let start = self
            .expect_with("'('", |k| matches!(k, TokenKind::LeftParen))?
            .span;
        let parameters = self.parse_parameters()?;
        if self.match_with(|k| matches!(k, TokenKind::ThinArrow)) {
            let body_expr = self.parse_expression()?;
            let span = start.merge(body_expr.span());
            return Ok(Node::Lambda {
                parameters,
                body: vec![body_expr],
                span,
            });
        }
        self.expect_keyword(Keyword::Do)?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Node::Lambda {
            parameters,
            body,
            span: start.merge(end),
        })
    }

    /// A parenthesized group is a lambda when the matching `)` is followed
    /// by `->` or `do`.
    fn lambda_ahead(&self) -> bool {
        let mut depth = 0usize;
        let mut index = self.index;
        while let Some(token) = self.tokens.get(index) {
            match token.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(index + 1).map(|t| &t.kind),
                            Some(TokenKind::ThinArrow) | Some(TokenKind::Keyword(Keyword::Do))
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            index += 1;
        }
        false
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Identifier(_)
                | TokenKind::IntegerLiteral(_)
                | TokenKind::FloatLiteral(_)
                | TokenKind::StringLiteral(_)
                | TokenKind::Keyword(Keyword::True)
                | TokenKind::Keyword(Keyword::False)
                | TokenKind::Keyword(Keyword::SelfKw)
                | TokenKind::LeftParen
                | TokenKind::LeftBracket
                | TokenKind::LeftBrace
                | TokenKind::Minus
                | TokenKind::Bang
                | TokenKind::Tilde
        )
    }

    fn skip_semicolons(&mut self) {
        while self.match_with(|k| matches!(k, TokenKind::Semicolon)) {}
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn prev(&self) -> &Token {
        &self.tokens[self.index.saturating_sub(1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check(&self, pred: impl Fn(&TokenKind) -> bool) -> bool {
        pred(&self.peek().kind)
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek().kind, TokenKind::Keyword(kw) if kw == keyword)
    }

    fn match_with(&mut self, pred: impl Fn(&TokenKind) -> bool) -> bool {
        if self.check(pred) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_with(
        &mut self,
        expected: &'static str,
        pred: impl Fn(&TokenKind) -> bool,
    ) -> Result<Token, ParseError> {
        if self.check(&pred) {
            Ok(self.advance())
        } else {
            let token = self.peek().clone();
            Err(ParseError::UnexpectedToken {
                expected,
                found: token.kind,
                span: token.span,
            })
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Token, ParseError> {
        self.expect_with(keyword.lexeme(), |k| {
            matches!(k, TokenKind::Keyword(kw) if *kw == keyword)
        })
    }

    fn expect_identifier(&mut self, expected: &'static str) -> Result<(String, Span), ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok((name, token.span))
            }
            found => Err(ParseError::UnexpectedToken {
                expected,
                found,
                span: token.span,
            }),
        }
    }
}

fn binary_op(kind: &TokenKind) -> Option<(BinOp, u8, bool)> {
    let entry = match kind {
        TokenKind::PipePipe => (BinOp::Or, 1, false),
        TokenKind::AmpersandAmpersand => (BinOp::And, 2, false),
        TokenKind::Pipe => (BinOp::BitOr, 3, false),
        TokenKind::Caret => (BinOp::BitXor, 4, false),
        TokenKind::Ampersand => (BinOp::BitAnd, 5, false),
        TokenKind::EqualEqual => (BinOp::Eq, 6, false),
        TokenKind::BangEqual => (BinOp::Neq, 6, false),
        TokenKind::Less => (BinOp::Lt, 7, false),
        TokenKind::LessEqual => (BinOp::Le, 7, false),
        TokenKind::Greater => (BinOp::Gt, 7, false),
        TokenKind::GreaterEqual => (BinOp::Ge, 7, false),
        TokenKind::LessLess => (BinOp::Shl, 8, false),
        TokenKind::GreaterGreater => (BinOp::Shr, 8, false),
        TokenKind::Plus => (BinOp::Add, 9, false),
        TokenKind::Minus => (BinOp::Subtract, 9, false),
        TokenKind::Star => (BinOp::Multiply, 10, false),
        TokenKind::Slash => (BinOp::Divide, 10, false),
        TokenKind::Percent => (BinOp::Modulo, 10, false),
        TokenKind::StarStar => (BinOp::Power, 11, true),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Node {
        parse(source).expect("parsing should succeed")
    }

    fn statements(node: Node) -> Vec<Node> {
        match node {
            Node::Program { statements, .. } => statements,
            other => panic!("expected program, got {other:?}"),
        }
    }

    #[test]
    fn parses_slice_assignment() {
        let stmts = statements(parse_ok("x[1:4] = [9, 9]"));
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Node::IndexAssignment { object, op, .. } => {
                assert_eq!(*op, AssignOp::Assign);
                assert!(matches!(**object, Node::Slice { .. }));
            }
            other => panic!("expected index assignment, got {other:?}"),
        }
    }

    #[test]
    fn parses_lambda_arrow_and_block_forms() {
        let stmts = statements(parse_ok("f = (x) -> x * 2\ng = (a, b = 1) do\nreturn a + b\nend"));
        assert_eq!(stmts.len(), 2);
        for stmt in &stmts {
            match stmt {
                Node::Assignment { value, .. } => {
                    assert!(matches!(**value, Node::Lambda { .. }))
                }
                other => panic!("expected assignment, got {other:?}"),
            }
        }
    }

    #[test]
    fn parses_class_with_base_and_ctor() {
        let stmts = statements(parse_ok(
            "class B < A\ndef ctor(x)\n@x = x\nend\nprivate def hidden()\nreturn 0\nend\nend",
        ));
        match &stmts[0] {
            Node::ClassDeclaration {
                name,
                base_class,
                methods,
                ..
            } => {
                assert_eq!(name, "B");
                assert_eq!(base_class.as_deref(), Some("A"));
                assert_eq!(methods.len(), 2);
                assert!(matches!(
                    methods[1],
                    Node::FunctionDeclaration {
                        is_private: true,
                        ..
                    }
                ));
            }
            other => panic!("expected class declaration, got {other:?}"),
        }
    }

    #[test]
    fn parses_break_with_when_guard() {
        let stmts = statements(parse_ok(
            "for i in [1, 2, 3] do\nbreak when i > 2\nnext when i == 1\nend",
        ));
        match &stmts[0] {
            Node::ForLoop { body, .. } => {
                assert!(matches!(body[0], Node::Break { condition: Some(_), .. }));
                assert!(matches!(body[1], Node::Next { condition: Some(_), .. }));
            }
            other => panic!("expected for loop, got {other:?}"),
        }
    }

    #[test]
    fn parses_qualified_function_call() {
        let stmts = statements(parse_ok("math::double(2)"));
        match &stmts[0] {
            Node::FunctionCall { name, .. } => assert_eq!(name, "math::double"),
            other => panic!("expected function call, got {other:?}"),
        }
    }

    #[test]
    fn parses_ternary_and_member_assignment() {
        let stmts = statements(parse_ok("h.count += x > 0 ? 1 : 2"));
        match &stmts[0] {
            Node::MemberAssignment { member, op, value, .. } => {
                assert_eq!(member, "count");
                assert_eq!(*op, AssignOp::Add);
                assert!(matches!(**value, Node::Ternary { .. }));
            }
            other => panic!("expected member assignment, got {other:?}"),
        }
    }

    #[test]
    fn rejects_literal_assignment_target() {
        let err = parse("3 = 4").unwrap_err();
        assert!(matches!(
            err,
            VesperError::Parse(ParseError::InvalidAssignmentTarget { .. })
        ));
    }
}
