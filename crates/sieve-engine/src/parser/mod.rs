//! Recursive descent parser for Sieve scripts.
//!
//! Grammar (RFC 5228, simplified):
//!
//! ```text
//! script      := command*
//! command     := IDENT argument* ( ';' | block )
//! block       := '{' command* '}'
//! argument    := number | string | string-list | tag | test | test-list
//! test-list   := '(' test (',' test)* ')'
//! string-list := '[' [ string (',' string)* ] ']'
//! ```
//!
//! One token of lookahead throughout. On a syntax error the parser reports
//! through the error handler, resynchronizes to the next `;` or matching
//! `}`, and keeps going so every well-formed construct is still parsed and
//! reported on. The AST is returned only when no errors were recorded.

mod stream;

use crate::ast::{ArgValue, Argument, Ast, Node, NodeKind};
use crate::error::{ErrorHandler, Location};
use crate::foundation::limits::MAX_NESTING_DEPTH;
use crate::foundation::{LineIndex, Span};
use crate::lexer::{tokenize, Token};
use crate::script::Script;
use stream::TokenStream;

/// Parser-internal error; converted into handler diagnostics at the
/// recovery points.
#[derive(Debug, Clone)]
pub(crate) struct ParseError {
    pub span: Span,
    pub message: String,
}

impl ParseError {
    fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }

    fn expected(what: &str, found: Option<&Token>, span: Span) -> Self {
        let message = match found {
            Some(token) => format!("expected {what}, found {}", token.describe()),
            None => format!("expected {what}, found end of script"),
        };
        Self::new(span, message)
    }
}

/// Parse a script into an AST.
///
/// Lexer and parser errors are accumulated in `ehandler`; `Some` is
/// returned iff this call added no errors.
pub fn parse(script: &Script, ehandler: &mut ErrorHandler) -> Option<Ast> {
    let errors_before = ehandler.error_count();
    let index = LineIndex::new(script.source());
    let (tokens, lex_errors) = tokenize(script.source());
    for (err, range) in &lex_errors {
        ehandler.error(
            Some(Location::new(script.name(), index.position(range.start))),
            err.to_string(),
        );
    }

    let mut parser = Parser {
        stream: TokenStream::new(&tokens, &index),
        script_name: script.name().to_string(),
        ehandler,
        depth: 0,
    };
    let commands = parser.parse_top_level();

    if parser.ehandler.error_count() > errors_before {
        return None;
    }
    Some(Ast {
        script_name: script.name().to_string(),
        commands,
    })
}

struct Parser<'a> {
    stream: TokenStream<'a>,
    script_name: String,
    ehandler: &'a mut ErrorHandler,
    depth: usize,
}

impl Parser<'_> {
    fn report(&mut self, err: ParseError) {
        self.ehandler.error(
            Some(Location::new(self.script_name.clone(), err.span)),
            err.message,
        );
    }

    fn parse_top_level(&mut self) -> Vec<Node> {
        let mut commands = Vec::new();
        while !self.stream.at_end() {
            match self.parse_command() {
                Ok(node) => commands.push(node),
                Err(err) => {
                    self.report(err);
                    self.stream.synchronize(false);
                }
            }
        }
        commands
    }

    fn parse_command(&mut self) -> Result<Node, ParseError> {
        let span = self.stream.current_span();
        let identifier = match self.stream.peek() {
            Some(Token::Identifier(name)) => name.clone(),
            other => {
                return Err(ParseError::expected(
                    "command",
                    other,
                    self.stream.current_span(),
                ))
            }
        };
        self.stream.advance();

        let mut node = Node::new(NodeKind::Command, identifier, span);
        self.parse_arguments(&mut node)?;

        match self.stream.peek() {
            Some(Token::Semicolon) => {
                self.stream.advance();
            }
            Some(Token::LBrace) => {
                self.stream.advance();
                node.has_block = true;
                node.block = self.parse_block()?;
            }
            other => {
                return Err(ParseError::expected(
                    "';' or a block",
                    other,
                    self.stream.current_span(),
                ))
            }
        }
        Ok(node)
    }

    /// Parse commands up to and including the closing `}`.
    fn parse_block(&mut self) -> Result<Vec<Node>, ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(ParseError::new(
                self.stream.current_span(),
                "nesting too deep",
            ));
        }
        let mut commands = Vec::new();
        loop {
            match self.stream.peek() {
                Some(Token::RBrace) => {
                    self.stream.advance();
                    break;
                }
                None => {
                    let err =
                        ParseError::expected("'}'", None, self.stream.current_span());
                    self.depth -= 1;
                    return Err(err);
                }
                Some(_) => match self.parse_command() {
                    Ok(node) => commands.push(node),
                    Err(err) => {
                        self.report(err);
                        self.stream.synchronize(true);
                    }
                },
            }
        }
        self.depth -= 1;
        Ok(commands)
    }

    /// Parse the argument sequence of a command or test: literals and tags
    /// into `node.arguments`, sub-tests into `node.tests`.
    fn parse_arguments(&mut self, node: &mut Node) -> Result<(), ParseError> {
        loop {
            let span = self.stream.current_span();
            match self.stream.peek() {
                Some(Token::Number(n)) => {
                    let value = ArgValue::Number(*n);
                    self.stream.advance();
                    node.arguments.push(Argument::new(value, span));
                }
                Some(Token::String(s)) => {
                    let value = ArgValue::String(s.clone());
                    self.stream.advance();
                    node.arguments.push(Argument::new(value, span));
                }
                Some(Token::Tag(name)) => {
                    let value = ArgValue::Tag(name.clone());
                    self.stream.advance();
                    node.arguments.push(Argument::new(value, span));
                }
                Some(Token::LBracket) => {
                    let list = self.parse_string_list()?;
                    node.arguments.push(Argument::new(list, span));
                }
                Some(Token::Identifier(_)) => {
                    let test = self.parse_test()?;
                    node.tests.push(test);
                }
                Some(Token::LParen) => {
                    self.parse_test_list(node)?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_test(&mut self) -> Result<Node, ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(ParseError::new(
                self.stream.current_span(),
                "test nesting too deep",
            ));
        }
        let span = self.stream.current_span();
        let identifier = match self.stream.peek() {
            Some(Token::Identifier(name)) => name.clone(),
            other => {
                let err = ParseError::expected("test", other, self.stream.current_span());
                self.depth -= 1;
                return Err(err);
            }
        };
        self.stream.advance();
        let mut node = Node::new(NodeKind::Test, identifier, span);
        let result = self.parse_arguments(&mut node);
        self.depth -= 1;
        result?;
        Ok(node)
    }

    /// `'(' test (',' test)* ')'` — at least one test.
    fn parse_test_list(&mut self, node: &mut Node) -> Result<(), ParseError> {
        self.stream.advance(); // '('
        loop {
            node.tests.push(self.parse_test()?);
            match self.stream.peek() {
                Some(Token::Comma) => {
                    self.stream.advance();
                }
                Some(Token::RParen) => {
                    self.stream.advance();
                    return Ok(());
                }
                other => {
                    return Err(ParseError::expected(
                        "',' or ')'",
                        other,
                        self.stream.current_span(),
                    ))
                }
            }
        }
    }

    /// `'[' [ string (',' string)* ] ']'` — the empty list is legal.
    fn parse_string_list(&mut self) -> Result<ArgValue, ParseError> {
        self.stream.advance(); // '['
        let mut items = Vec::new();
        if self.stream.check(&Token::RBracket) {
            self.stream.advance();
            return Ok(ArgValue::StringList(items));
        }
        loop {
            match self.stream.peek() {
                Some(Token::String(s)) => {
                    items.push(s.clone());
                    self.stream.advance();
                }
                other => {
                    return Err(ParseError::expected(
                        "string",
                        other,
                        self.stream.current_span(),
                    ))
                }
            }
            match self.stream.peek() {
                Some(Token::Comma) => {
                    self.stream.advance();
                }
                Some(Token::RBracket) => {
                    self.stream.advance();
                    return Ok(ArgValue::StringList(items));
                }
                other => {
                    return Err(ParseError::expected(
                        "',' or ']'",
                        other,
                        self.stream.current_span(),
                    ))
                }
            }
        }
    }
}
