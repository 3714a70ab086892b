use crate::span::Span;
use std::cmp;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VesperError {
    #[error("lexing error: {0}")]
    Lex(#[from] LexError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl VesperError {
    pub fn span(&self) -> Option<Span> {
        match self {
            VesperError::Lex(err) => err.span(),
            VesperError::Parse(err) => err.span(),
            VesperError::Runtime(err) => Some(err.span()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LexError {
    #[error("unexpected character `{ch}` at {span:?}")]
    UnexpectedChar { ch: char, span: Span },
    #[error("unterminated string literal starting at {span:?}")]
    UnterminatedString { span: Span },
    #[error("invalid numeric literal at {span:?}")]
    InvalidNumber { span: Span },
    #[error("Non-ASCII identifier characters are not allowed")]
    NonAsciiIdentifierChar { ch: char, span: Span },
}

impl LexError {
    pub fn span(&self) -> Option<Span> {
        match self {
            LexError::UnexpectedChar { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::InvalidNumber { span }
            | LexError::NonAsciiIdentifierChar { span, .. } => Some(*span),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum ParseError {
    #[error("unexpected token {found:?} expected {expected} at {span:?}")]
    UnexpectedToken {
        expected: &'static str,
        found: crate::token::TokenKind,
        span: Span,
    },
    #[error("unexpected end of file while parsing {context}")]
    UnexpectedEof { context: &'static str },
    #[error("invalid assignment target at {span:?}")]
    InvalidAssignmentTarget { span: Span },
    #[error("unbalanced block starting at {span:?}")]
    UnbalancedBlock { span: Span },
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::InvalidAssignmentTarget { span }
            | ParseError::UnbalancedBlock { span } => Some(*span),
            ParseError::UnexpectedEof { .. } => None,
        }
    }
}

/// The typed failures the evaluator raises. `try` absorbs any of these;
/// `catch` can bind the kind name (`error_type`) and the message.
#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("{message}")]
    Syntax { span: Span, message: String },
    #[error("unknown builtin `{name}`")]
    UnknownBuiltin { span: Span, name: String },
    #[error("unexpected arguments for builtin `{name}`")]
    BuiltinUnexpectedArgument { span: Span, name: String },
    #[error("{message}")]
    Conversion { span: Span, message: String },
    #[error("{message}")]
    InvalidOperation { span: Span, message: String },
    #[error("{message}")]
    InvalidContext { span: Span, message: String },
    #[error("{message}")]
    Index { span: Span, message: String },
    #[error("{message}")]
    Range { span: Span, message: String },
    #[error("key `{key}` not found in hash")]
    HashKey { span: Span, key: String },
    #[error("variable `{name}` is undefined")]
    VariableUndefined { span: Span, name: String },
    #[error("`{name}` is not a legal variable name")]
    IllegalName { span: Span, name: String },
    #[error("function `{name}` is undefined")]
    FunctionUndefined { span: Span, name: String },
    #[error("parameter count mismatch calling `{name}`")]
    ParameterCountMismatch { span: Span, name: String },
    #[error("class `{name}` is undefined")]
    ClassUndefined { span: Span, name: String },
    #[error("method `{method}` is not implemented for class `{class_name}`")]
    UnimplementedMethod {
        span: Span,
        class_name: String,
        method: String,
    },
    #[error("package `{name}` is undefined")]
    PackageUndefined { span: Span, name: String },
    #[error("attempted to divide by zero")]
    DivideByZero { span: Span },
    #[error("the list is empty")]
    EmptyList { span: Span },
    #[error("{message}")]
    Thrown {
        span: Span,
        error_type: String,
        message: String,
    },
}

impl RuntimeError {
    pub fn span(&self) -> Span {
        match self {
            RuntimeError::Syntax { span, .. }
            | RuntimeError::UnknownBuiltin { span, .. }
            | RuntimeError::BuiltinUnexpectedArgument { span, .. }
            | RuntimeError::Conversion { span, .. }
            | RuntimeError::InvalidOperation { span, .. }
            | RuntimeError::InvalidContext { span, .. }
            | RuntimeError::Index { span, .. }
            | RuntimeError::Range { span, .. }
            | RuntimeError::HashKey { span, .. }
            | RuntimeError::VariableUndefined { span, .. }
            | RuntimeError::IllegalName { span, .. }
            | RuntimeError::FunctionUndefined { span, .. }
            | RuntimeError::ParameterCountMismatch { span, .. }
            | RuntimeError::ClassUndefined { span, .. }
            | RuntimeError::UnimplementedMethod { span, .. }
            | RuntimeError::PackageUndefined { span, .. }
            | RuntimeError::DivideByZero { span }
            | RuntimeError::EmptyList { span }
            | RuntimeError::Thrown { span, .. } => *span,
        }
    }

    /// The language-visible kind name, bound by `catch (t, m)`.
    pub fn error_type(&self) -> &str {
        match self {
            RuntimeError::Syntax { .. } => "SyntaxError",
            RuntimeError::UnknownBuiltin { .. } => "UnknownBuiltinError",
            RuntimeError::BuiltinUnexpectedArgument { .. } => "BuiltinUnexpectedArgumentError",
            RuntimeError::Conversion { .. } => "ConversionError",
            RuntimeError::InvalidOperation { .. } => "InvalidOperationError",
            RuntimeError::InvalidContext { .. } => "InvalidContextError",
            RuntimeError::Index { .. } => "IndexError",
            RuntimeError::Range { .. } => "RangeError",
            RuntimeError::HashKey { .. } => "HashKeyError",
            RuntimeError::VariableUndefined { .. } => "VariableUndefinedError",
            RuntimeError::IllegalName { .. } => "IllegalNameError",
            RuntimeError::FunctionUndefined { .. } => "FunctionUndefinedError",
            RuntimeError::ParameterCountMismatch { .. } => "ParameterCountMismatchError",
            RuntimeError::ClassUndefined { .. } => "ClassUndefinedError",
            RuntimeError::UnimplementedMethod { .. } => "UnimplementedMethodError",
            RuntimeError::PackageUndefined { .. } => "PackageUndefinedError",
            RuntimeError::DivideByZero { .. } => "DivideByZeroError",
            RuntimeError::EmptyList { .. } => "EmptyListError",
            RuntimeError::Thrown { error_type, .. } => error_type,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

pub fn format_error(source: &str, error: &VesperError) -> String {
    format_with_span(source, error.span(), &error.to_string())
}

pub fn format_diagnostic(source: &str, span: Option<Span>, message: &str) -> String {
    format_with_span(source, span, message)
}

pub fn print_error(source: &str, error: &VesperError) {
    eprintln!("{}", format_error(source, error));
}

fn format_with_span(source: &str, span: Option<Span>, message: &str) -> String {
    if let Some(span) = span {
        let line_str = line_at(source, span.line);
        let pointer_len = cmp::max(1, span.end.saturating_sub(span.start));
        let caret_offset = span.column.saturating_sub(1);
        let caret = format!(
            "{}{}",
            " ".repeat(caret_offset),
            "^".repeat(cmp::min(
                pointer_len,
                line_str.len().saturating_sub(caret_offset).max(1)
            ))
        );
        format!(
            "error: {message}\n --> line {}, column {}\n{:>4} | {}\n     | {}\n",
            span.line, span.column, span.line, line_str, caret
        )
    } else {
        format!("error: {message}")
    }
}

fn line_at(source: &str, line: usize) -> String {
    source
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .to_string()
}
