//! Parser for posh
//!
//! Recursive descent over the token stream produced by [`Lexer`]. Errors are
//! collected rather than returned one at a time: after a syntax error the
//! parser skips to the next command separator and carries on, so one parse
//! attempt reports every problem it can find.
//!
//! The same parser answers the "is this input complete" question for the
//! REPL and for `execute_stream` through [`check_complete`].

mod word;

pub use word::{parse_arith_word, parse_word};

use crate::ast::{
    AndOr, ArrayElement, Assignment, CaseArm, CaseTerminator, Command, CompoundCommand, Connector,
    FunctionDef, List, ListItem, Pipeline, Program, Redirect, RedirectTarget, SimpleCommand, Word,
};
use crate::lexer::{
    is_name_char, is_name_start, Keyword, LexError, Lexer, Operator, RedirectOp, Token, TokenKind,
};
use std::fmt;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("line {line}: syntax error near unexpected token {found}")]
    UnexpectedToken { found: String, line: usize },
    #[error("line {line}: syntax error: unexpected end of file (expected {expected})")]
    UnexpectedEof { expected: &'static str, line: usize },
    #[error("line {line}: syntax error: missing `{keyword}' to close `{opener}'")]
    MissingKeyword {
        keyword: &'static str,
        opener: &'static str,
        line: usize,
    },
    #[error("line {line}: invalid redirection: {message}")]
    BadRedirect { message: String, line: usize },
    #[error("line {line}: invalid array assignment: {message}")]
    BadArray { message: String, line: usize },
    #[error("line {line}: ${{{text}}}: bad substitution")]
    BadSubstitution { text: String, line: usize },
    #[error("line {line}: in command substitution: {source}")]
    InSubstitution {
        line: usize,
        #[source]
        source: Box<ParseError>,
    },
}

impl ParseError {
    /// True when more input could still turn this into a valid program
    pub fn is_incomplete(&self) -> bool {
        match self {
            ParseError::Lex(e) => e.is_incomplete(),
            ParseError::UnexpectedEof { .. } | ParseError::MissingKeyword { .. } => true,
            _ => false,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            ParseError::Lex(e) => e.position().line,
            ParseError::UnexpectedToken { line, .. }
            | ParseError::UnexpectedEof { line, .. }
            | ParseError::MissingKeyword { line, .. }
            | ParseError::BadRedirect { line, .. }
            | ParseError::BadArray { line, .. }
            | ParseError::BadSubstitution { line, .. }
            | ParseError::InSubstitution { line, .. } => *line,
        }
    }
}

/// Every error found in one parse attempt, in source order. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseErrors(Vec<ParseError>);

impl ParseErrors {
    pub fn first(&self) -> Option<&ParseError> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParseError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<ParseError> {
        self.0
    }

    /// Input ended inside an open construct and nothing else went wrong
    pub fn is_incomplete(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(ParseError::is_incomplete)
    }
}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseErrors {}

impl From<ParseError> for ParseErrors {
    fn from(err: ParseError) -> Self {
        ParseErrors(vec![err])
    }
}

/// Answer to "would the REPL need another line"
#[derive(Debug, Clone, PartialEq)]
pub enum Completeness {
    Complete,
    Incomplete,
    Invalid(ParseErrors),
}

type PResult<T> = Result<T, ParseError>;

/// Parser state
pub struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    /// End offset of the last consumed token, heredoc bodies excluded
    last_end: usize,
    lex_error: Option<LexError>,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        let mut tokens = Vec::new();
        let mut lex_error = None;
        for token in Lexer::new(src) {
            match token {
                Ok(t) if t.kind == TokenKind::Comment => {}
                Ok(t) => tokens.push(t),
                Err(e) => {
                    lex_error = Some(e);
                    break;
                }
            }
        }
        Parser {
            src,
            tokens,
            pos: 0,
            last_end: 0,
            lex_error,
            errors: Vec::new(),
        }
    }

    /// Parse the entire input into a Program
    pub fn parse_program(mut self) -> Result<Program, ParseErrors> {
        if let Some(err) = self.lex_error.take() {
            return Err(ParseErrors(vec![err.into()]));
        }

        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            let token = match self.peek() {
                Some(t) => t.clone(),
                None => break,
            };
            if self.at_list_end() {
                self.errors.push(unexpected(&token));
                self.recover();
                continue;
            }
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(err) => {
                    self.errors.push(err);
                    self.recover();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(List { items })
        } else {
            Err(ParseErrors(self.errors))
        }
    }

    /// Peek at the current token without consuming it
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    /// Consume and return the current token
    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        if !matches!(token.kind, TokenKind::HeredocBody { .. }) {
            self.last_end = token.span.end;
        }
        Some(token)
    }

    fn current_line(&self) -> usize {
        self.peek()
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.pos.line)
    }

    fn eof(&self, expected: &'static str) -> ParseError {
        ParseError::UnexpectedEof {
            expected,
            line: self.current_line(),
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek_kind() == Some(TokenKind::Newline) {
            self.advance();
        }
    }

    /// Skip past the offending token to the next separator
    fn recover(&mut self) {
        if self.advance().is_none() {
            return;
        }
        while let Some(kind) = self.peek_kind() {
            self.advance();
            if matches!(
                kind,
                TokenKind::Newline | TokenKind::Operator(Operator::Semi)
            ) {
                break;
            }
        }
    }

    /// Tokens that close the list of a compound command
    fn at_list_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(TokenKind::Keyword(
                Keyword::Then
                    | Keyword::Elif
                    | Keyword::Else
                    | Keyword::Fi
                    | Keyword::Do
                    | Keyword::Done
                    | Keyword::Esac
                    | Keyword::RBrace
            )) | Some(TokenKind::Operator(
                Operator::RParen
                    | Operator::DoubleSemi
                    | Operator::SemiAmp
                    | Operator::DoubleSemiAmp
            ))
        )
    }

    fn expect_keyword(&mut self, kw: Keyword, opener: &'static str, line: usize) -> PResult<()> {
        match self.peek() {
            Some(t) if t.is_keyword(kw) => {
                self.advance();
                Ok(())
            }
            Some(t) => Err(unexpected(t)),
            None => Err(ParseError::MissingKeyword {
                keyword: kw.as_str(),
                opener,
                line,
            }),
        }
    }

    /// A list of and-or items, stopping before a closing keyword
    fn parse_list(&mut self) -> PResult<List> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek().is_none() || self.at_list_end() {
                break;
            }
            items.push(self.parse_item()?);
        }
        Ok(List { items })
    }

    fn parse_item(&mut self) -> PResult<ListItem> {
        let (start, line) = match self.peek() {
            Some(t) => (t.span.start, t.pos.line),
            None => return Err(self.eof("command")),
        };
        let and_or = self.parse_and_or()?;
        let end = self.last_end.max(start);
        let mut background = false;
        match self.peek_kind() {
            Some(TokenKind::Operator(Operator::Semi)) => {
                self.advance();
            }
            Some(TokenKind::Operator(Operator::Amp)) => {
                self.advance();
                background = true;
            }
            Some(TokenKind::Newline) | None => {}
            Some(_) if self.at_list_end() => {}
            Some(_) => {
                if let Some(t) = self.peek() {
                    return Err(unexpected(t));
                }
            }
        }
        Ok(ListItem {
            and_or,
            background,
            text: self.src[start..end].trim().to_string(),
            line,
        })
    }

    fn parse_and_or(&mut self) -> PResult<AndOr> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();
        loop {
            let connector = match self.peek_kind() {
                Some(TokenKind::Operator(Operator::AndAnd)) => Connector::And,
                Some(TokenKind::Operator(Operator::OrOr)) => Connector::Or,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            rest.push((connector, self.parse_pipeline()?));
        }
        Ok(AndOr { first, rest })
    }

    fn parse_pipeline(&mut self) -> PResult<Pipeline> {
        let negated = if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Bang)) {
            self.advance();
            true
        } else {
            false
        };

        let mut commands = vec![self.parse_command()?];
        loop {
            match self.peek_kind() {
                Some(TokenKind::Operator(Operator::Pipe)) => {
                    self.advance();
                }
                Some(TokenKind::Operator(Operator::PipeAmp)) => {
                    self.advance();
                    // `a |& b` is `a 2>&1 | b`
                    if let Some(last) = commands.last_mut() {
                        push_redirect(
                            last,
                            Redirect {
                                fd: Some(2),
                                op: RedirectOp::GreatAnd,
                                target: RedirectTarget::Word(Word::literal("1")),
                            },
                        );
                    }
                }
                _ => break,
            }
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }
        Ok(Pipeline { negated, commands })
    }

    fn parse_command(&mut self) -> PResult<Command> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.eof("command")),
        };
        match token.kind {
            TokenKind::Keyword(
                Keyword::If
                | Keyword::For
                | Keyword::While
                | Keyword::Until
                | Keyword::Case
                | Keyword::LBrace,
            )
            | TokenKind::Operator(Operator::LParen)
            | TokenKind::ArithCommand => {
                let compound = self.parse_compound()?;
                let redirects = self.parse_trailing_redirects()?;
                Ok(Command::Compound(compound, redirects))
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_function_keyword(),
            TokenKind::Word if self.at_function_definition() => {
                self.advance();
                self.advance();
                self.advance();
                let body = self.parse_function_body()?;
                Ok(Command::FunctionDef(FunctionDef {
                    name: token.text,
                    body: Box::new(body),
                    line: token.pos.line,
                }))
            }
            TokenKind::Word | TokenKind::Redirect { .. } => {
                self.parse_simple().map(Command::Simple)
            }
            _ => Err(unexpected(&token)),
        }
    }

    /// `name ( )`
    fn at_function_definition(&self) -> bool {
        let name_ok = self.peek().map_or(false, |t| {
            t.quoting.is_unquoted() && is_function_name(&t.text)
        });
        name_ok
            && self.peek_at(1).map_or(false, |t| t.is_operator(Operator::LParen))
            && self.peek_at(2).map_or(false, |t| t.is_operator(Operator::RParen))
    }

    fn parse_function_keyword(&mut self) -> PResult<Command> {
        self.advance();
        let name_tok = match self.advance() {
            Some(t) if matches!(t.kind, TokenKind::Word) && is_function_name(&t.text) => t,
            Some(t) => return Err(unexpected(&t)),
            None => return Err(self.eof("function name")),
        };
        if self.peek_kind() == Some(TokenKind::Operator(Operator::LParen)) {
            self.advance();
            match self.advance() {
                Some(t) if t.is_operator(Operator::RParen) => {}
                Some(t) => return Err(unexpected(&t)),
                None => return Err(self.eof("`)'")),
            }
        }
        let body = self.parse_function_body()?;
        Ok(Command::FunctionDef(FunctionDef {
            name: name_tok.text,
            body: Box::new(body),
            line: name_tok.pos.line,
        }))
    }

    fn parse_function_body(&mut self) -> PResult<Command> {
        self.skip_newlines();
        match self.peek() {
            Some(t)
                if matches!(
                    t.kind,
                    TokenKind::Keyword(
                        Keyword::If
                            | Keyword::For
                            | Keyword::While
                            | Keyword::Until
                            | Keyword::Case
                            | Keyword::LBrace
                    ) | TokenKind::Operator(Operator::LParen)
                        | TokenKind::ArithCommand
                ) => {}
            Some(t) => return Err(unexpected(t)),
            None => return Err(self.eof("function body")),
        }
        let compound = self.parse_compound()?;
        let redirects = self.parse_trailing_redirects()?;
        Ok(Command::Compound(compound, redirects))
    }

    fn parse_trailing_redirects(&mut self) -> PResult<Vec<Redirect>> {
        let mut redirects = Vec::new();
        while matches!(self.peek_kind(), Some(TokenKind::Redirect { .. })) {
            redirects.push(self.parse_redirect()?);
        }
        Ok(redirects)
    }

    fn parse_simple(&mut self) -> PResult<SimpleCommand> {
        let mut cmd = SimpleCommand {
            line: self.current_line(),
            ..SimpleCommand::default()
        };
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Redirect { .. } => {
                    let redirect = self.parse_redirect()?;
                    cmd.redirects.push(redirect);
                }
                TokenKind::Word | TokenKind::Keyword(_) => {
                    let token = match self.advance() {
                        Some(t) => t,
                        None => break,
                    };
                    if cmd.words.is_empty() && token.kind == TokenKind::Word {
                        if let Some(assignment) = parse_assignment(&token)? {
                            cmd.assignments.push(assignment);
                            continue;
                        }
                    }
                    cmd.words.push(parse_word(&token.text, token.pos.line)?);
                }
                _ => break,
            }
        }
        if cmd.words.is_empty() && cmd.assignments.is_empty() && cmd.redirects.is_empty() {
            return match self.peek() {
                Some(t) => Err(unexpected(t)),
                None => Err(self.eof("command")),
            };
        }
        Ok(cmd)
    }

    fn parse_redirect(&mut self) -> PResult<Redirect> {
        let op_tok = match self.advance() {
            Some(t) => t,
            None => return Err(self.eof("redirection")),
        };
        let (op, fd) = match op_tok.kind {
            TokenKind::Redirect { op, fd } => (op, fd),
            _ => return Err(unexpected(&op_tok)),
        };
        let line = op_tok.pos.line;
        let target_tok = match self.peek() {
            Some(t) if matches!(t.kind, TokenKind::Word | TokenKind::Keyword(_)) => t.clone(),
            Some(t) => {
                return Err(ParseError::BadRedirect {
                    message: format!("expected a word after `{}', found {}", op.as_str(), t),
                    line,
                })
            }
            None => return Err(self.eof("redirection target")),
        };
        self.advance();

        let target = if op.is_heredoc() {
            let body = match self.peek() {
                Some(t) if matches!(t.kind, TokenKind::HeredocBody { .. }) => t.clone(),
                _ => {
                    return Err(ParseError::BadRedirect {
                        message: format!("missing here-document body for `{}'", target_tok.text),
                        line,
                    })
                }
            };
            self.advance();
            let quoted = matches!(body.kind, TokenKind::HeredocBody { quoted: true });
            RedirectTarget::Heredoc(word::parse_heredoc(&body.text, quoted, line)?)
        } else {
            RedirectTarget::Word(parse_word(&target_tok.text, line)?)
        };
        Ok(Redirect { fd, op, target })
    }

    fn parse_compound(&mut self) -> PResult<CompoundCommand> {
        let token = match self.advance() {
            Some(t) => t,
            None => return Err(self.eof("command")),
        };
        let line = token.pos.line;
        match token.kind {
            TokenKind::Keyword(Keyword::If) => self.parse_if(line),
            TokenKind::Keyword(Keyword::For) => self.parse_for(line),
            TokenKind::Keyword(Keyword::While) => {
                let (cond, body) = self.parse_loop("while", line)?;
                Ok(CompoundCommand::While { cond, body })
            }
            TokenKind::Keyword(Keyword::Until) => {
                let (cond, body) = self.parse_loop("until", line)?;
                Ok(CompoundCommand::Until { cond, body })
            }
            TokenKind::Keyword(Keyword::Case) => self.parse_case(line),
            TokenKind::Keyword(Keyword::LBrace) => {
                let body = self.parse_list()?;
                self.expect_keyword(Keyword::RBrace, "{", line)?;
                Ok(CompoundCommand::Brace(body))
            }
            TokenKind::Operator(Operator::LParen) => {
                let body = self.parse_list()?;
                match self.peek() {
                    Some(t) if t.is_operator(Operator::RParen) => {
                        self.advance();
                        Ok(CompoundCommand::Subshell(body))
                    }
                    Some(t) => Err(unexpected(t)),
                    None => Err(ParseError::MissingKeyword {
                        keyword: ")",
                        opener: "(",
                        line,
                    }),
                }
            }
            TokenKind::ArithCommand => Ok(CompoundCommand::Arith(parse_arith_word(
                &token.text,
                line,
            )?)),
            _ => Err(unexpected(&token)),
        }
    }

    fn parse_if(&mut self, line: usize) -> PResult<CompoundCommand> {
        let mut branches = Vec::new();
        let cond = self.parse_list()?;
        self.expect_keyword(Keyword::Then, "if", line)?;
        let body = self.parse_list()?;
        branches.push((cond, body));

        let mut else_branch = None;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Keyword(Keyword::Elif)) => {
                    self.advance();
                    let cond = self.parse_list()?;
                    self.expect_keyword(Keyword::Then, "elif", line)?;
                    let body = self.parse_list()?;
                    branches.push((cond, body));
                }
                Some(TokenKind::Keyword(Keyword::Else)) => {
                    self.advance();
                    else_branch = Some(self.parse_list()?);
                    self.expect_keyword(Keyword::Fi, "if", line)?;
                    break;
                }
                _ => {
                    self.expect_keyword(Keyword::Fi, "if", line)?;
                    break;
                }
            }
        }
        Ok(CompoundCommand::If {
            branches,
            else_branch,
        })
    }

    fn parse_loop(&mut self, opener: &'static str, line: usize) -> PResult<(List, List)> {
        let cond = self.parse_list()?;
        self.expect_keyword(Keyword::Do, opener, line)?;
        let body = self.parse_list()?;
        self.expect_keyword(Keyword::Done, opener, line)?;
        Ok((cond, body))
    }

    fn parse_for(&mut self, line: usize) -> PResult<CompoundCommand> {
        let name_tok = match self.advance() {
            Some(t) if t.kind == TokenKind::ArithCommand => return self.parse_arith_for(&t, line),
            Some(t) if t.kind == TokenKind::Word && crate::lexer::is_valid_name(&t.text) => t,
            Some(t) => return Err(unexpected(&t)),
            None => return Err(self.eof("variable name")),
        };
        self.skip_newlines();

        let words = if self.peek_kind() == Some(TokenKind::Keyword(Keyword::In)) {
            self.advance();
            let mut words = Vec::new();
            loop {
                match self.peek_kind() {
                    Some(TokenKind::Word | TokenKind::Keyword(_)) => {
                        if let Some(t) = self.advance() {
                            words.push(parse_word(&t.text, t.pos.line)?);
                        }
                    }
                    Some(TokenKind::Operator(Operator::Semi)) => {
                        self.advance();
                        break;
                    }
                    Some(TokenKind::Newline) | None => break,
                    Some(_) => {
                        if let Some(t) = self.peek() {
                            return Err(unexpected(t));
                        }
                    }
                }
            }
            Some(words)
        } else {
            if self.peek_kind() == Some(TokenKind::Operator(Operator::Semi)) {
                self.advance();
            }
            None
        };

        self.skip_newlines();
        self.expect_keyword(Keyword::Do, "for", line)?;
        let body = self.parse_list()?;
        self.expect_keyword(Keyword::Done, "for", line)?;
        Ok(CompoundCommand::For {
            var: name_tok.text,
            words,
            body,
        })
    }

    fn parse_arith_for(&mut self, header: &Token, line: usize) -> PResult<CompoundCommand> {
        let sections: Vec<&str> = header.text.split(';').collect();
        if sections.len() != 3 {
            return Err(ParseError::UnexpectedToken {
                found: format!("`(({}))'", header.text),
                line,
            });
        }
        let mut clauses = Vec::with_capacity(3);
        for section in sections {
            let section = section.trim();
            clauses.push(if section.is_empty() {
                None
            } else {
                Some(parse_arith_word(section, line)?)
            });
        }
        let mut clauses = clauses.into_iter();
        let (init, cond, step) = (
            clauses.next().flatten(),
            clauses.next().flatten(),
            clauses.next().flatten(),
        );

        if self.peek_kind() == Some(TokenKind::Operator(Operator::Semi)) {
            self.advance();
        }
        self.skip_newlines();
        self.expect_keyword(Keyword::Do, "for", line)?;
        let body = self.parse_list()?;
        self.expect_keyword(Keyword::Done, "for", line)?;
        Ok(CompoundCommand::ArithFor {
            init,
            cond,
            step,
            body,
        })
    }

    fn parse_case(&mut self, line: usize) -> PResult<CompoundCommand> {
        let subject = match self.advance() {
            Some(t) if matches!(t.kind, TokenKind::Word | TokenKind::Keyword(_)) => {
                parse_word(&t.text, t.pos.line)?
            }
            Some(t) => return Err(unexpected(&t)),
            None => return Err(self.eof("case subject")),
        };
        self.skip_newlines();
        self.expect_keyword(Keyword::In, "case", line)?;

        let mut arms = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                Some(TokenKind::Keyword(Keyword::Esac)) => {
                    self.advance();
                    break;
                }
                None => {
                    return Err(ParseError::MissingKeyword {
                        keyword: "esac",
                        opener: "case",
                        line,
                    })
                }
                _ => {}
            }

            if self.peek_kind() == Some(TokenKind::Operator(Operator::LParen)) {
                self.advance();
            }
            let mut patterns = Vec::new();
            loop {
                match self.advance() {
                    Some(t) if matches!(t.kind, TokenKind::Word | TokenKind::Keyword(_)) => {
                        patterns.push(parse_word(&t.text, t.pos.line)?);
                    }
                    Some(t) => return Err(unexpected(&t)),
                    None => {
                        return Err(ParseError::MissingKeyword {
                            keyword: "esac",
                            opener: "case",
                            line,
                        })
                    }
                }
                match self.advance() {
                    Some(t) if t.is_operator(Operator::Pipe) => continue,
                    Some(t) if t.is_operator(Operator::RParen) => break,
                    Some(t) => return Err(unexpected(&t)),
                    None => {
                        return Err(ParseError::MissingKeyword {
                            keyword: "esac",
                            opener: "case",
                            line,
                        })
                    }
                }
            }

            let body = self.parse_list()?;
            let terminator = match self.peek_kind() {
                Some(TokenKind::Operator(Operator::DoubleSemi)) => CaseTerminator::Break,
                Some(TokenKind::Operator(Operator::SemiAmp)) => CaseTerminator::FallThrough,
                Some(TokenKind::Operator(Operator::DoubleSemiAmp)) => CaseTerminator::Continue,
                Some(TokenKind::Keyword(Keyword::Esac)) => {
                    arms.push(CaseArm {
                        patterns,
                        body,
                        terminator: CaseTerminator::Break,
                    });
                    continue;
                }
                Some(_) => {
                    return match self.peek() {
                        Some(t) => Err(unexpected(t)),
                        None => Err(self.eof("`;;'")),
                    }
                }
                None => {
                    return Err(ParseError::MissingKeyword {
                        keyword: "esac",
                        opener: "case",
                        line,
                    })
                }
            };
            self.advance();
            arms.push(CaseArm {
                patterns,
                body,
                terminator,
            });
        }
        Ok(CompoundCommand::Case { subject, arms })
    }
}

fn unexpected(token: &Token) -> ParseError {
    ParseError::UnexpectedToken {
        found: token.to_string(),
        line: token.pos.line,
    }
}

fn push_redirect(cmd: &mut Command, redirect: Redirect) {
    match cmd {
        Command::Simple(simple) => simple.redirects.push(redirect),
        Command::Compound(_, redirects) => redirects.push(redirect),
        Command::FunctionDef(_) => {}
    }
}

fn is_function_name(s: &str) -> bool {
    !s.is_empty()
        && Keyword::from_word(s).is_none()
        && s
            .chars()
            .all(|c| is_name_char(c) || matches!(c, '-' | '.' | ':' | '+' | '@'))
}

/// Recognize `name=`, `name+=`, `name[idx]=` and `name=(...)` words
fn parse_assignment(token: &Token) -> PResult<Option<Assignment>> {
    let text = token.text.as_str();
    let line = token.pos.line;
    let name_end = text
        .char_indices()
        .find(|&(i, c)| {
            if i == 0 {
                !is_name_start(c)
            } else {
                !is_name_char(c)
            }
        })
        .map_or(text.len(), |(i, _)| i);
    if name_end == 0 {
        return Ok(None);
    }
    let name = &text[..name_end];
    let mut rest = &text[name_end..];

    let mut index = None;
    if rest.starts_with('[') {
        let close = match matching_bracket(rest) {
            Some(c) => c,
            None => return Ok(None),
        };
        index = Some(parse_arith_word(&rest[1..close], line)?);
        rest = &rest[close + 1..];
    }

    let (append, value) = if let Some(v) = rest.strip_prefix("+=") {
        (true, v)
    } else if let Some(v) = rest.strip_prefix('=') {
        (false, v)
    } else {
        return Ok(None);
    };

    if value.starts_with('(') && value.ends_with(')') && value.len() >= 2 {
        if index.is_some() {
            return Err(ParseError::BadArray {
                message: format!("{}: cannot assign a list to an array element", name),
                line,
            });
        }
        let elements = parse_array_elements(&value[1..value.len() - 1], line)?;
        return Ok(Some(Assignment::Array {
            name: name.to_string(),
            elements,
            append,
        }));
    }

    Ok(Some(Assignment::Scalar {
        name: name.to_string(),
        index,
        value: parse_word(value, line)?,
        append,
    }))
}

/// Index of the `]` matching the `[` at the start of `s`
fn matching_bracket(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_array_elements(inner: &str, line: usize) -> PResult<Vec<ArrayElement>> {
    let mut elements = Vec::new();
    for token in Lexer::new(inner) {
        let token = token?;
        match token.kind {
            TokenKind::Newline | TokenKind::Comment => {}
            TokenKind::Word | TokenKind::Keyword(_) => {
                let text = token.text.as_str();
                let indexed = if text.starts_with('[') {
                    matching_bracket(text).and_then(|close| {
                        text[close + 1..]
                            .strip_prefix('=')
                            .map(|value| (&text[1..close], value))
                    })
                } else {
                    None
                };
                let element = match indexed {
                    Some((index, value)) => ArrayElement {
                        index: Some(parse_arith_word(index, line)?),
                        value: parse_word(value, line)?,
                    },
                    None => ArrayElement {
                        index: None,
                        value: parse_word(text, line)?,
                    },
                };
                elements.push(element);
            }
            _ => {
                return Err(ParseError::BadArray {
                    message: format!("unexpected {}", token),
                    line,
                })
            }
        }
    }
    Ok(elements)
}

/// Parse source text into a program
pub fn parse(src: &str) -> Result<Program, ParseErrors> {
    trace!(len = src.len(), "parse");
    Parser::new(src).parse_program()
}

/// Whether `src` is a complete program, a valid prefix of one, or invalid
pub fn check_complete(src: &str) -> Completeness {
    match parse(src) {
        Ok(_) => Completeness::Complete,
        Err(errors) if errors.is_incomplete() => Completeness::Incomplete,
        Err(errors) => Completeness::Invalid(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Parameter, ParamOp, WordPart};

    fn simple(program: &Program, idx: usize) -> &SimpleCommand {
        match &program.items[idx].and_or.first.commands[0] {
            Command::Simple(s) => s,
            other => panic!("expected simple command, got {:?}", other),
        }
    }

    #[test]
    fn parse_simple_command_with_redirects() {
        let program = parse("FOO=bar echo hi > out 2>&1").unwrap();
        let cmd = simple(&program, 0);
        assert_eq!(cmd.assignments.len(), 1);
        assert_eq!(cmd.words.len(), 2);
        assert_eq!(cmd.redirects.len(), 2);
        assert_eq!(cmd.redirects[1].fd, Some(2));
        assert_eq!(cmd.redirects[1].op, RedirectOp::GreatAnd);
    }

    #[test]
    fn parse_and_or_and_background() {
        let program = parse("a && b || c &\nd").unwrap();
        assert_eq!(program.items.len(), 2);
        assert!(program.items[0].background);
        assert_eq!(program.items[0].text, "a && b || c");
        assert_eq!(program.items[0].and_or.rest.len(), 2);
        assert_eq!(program.items[0].and_or.rest[1].0, Connector::Or);
    }

    #[test]
    fn parse_pipeline_negation_and_pipe_amp() {
        let program = parse("! a | b |& c").unwrap();
        let pipeline = &program.items[0].and_or.first;
        assert!(pipeline.negated);
        assert_eq!(pipeline.commands.len(), 3);
        match &pipeline.commands[1] {
            Command::Simple(s) => assert_eq!(s.redirects[0].fd, Some(2)),
            _ => panic!("expected simple"),
        }
    }

    #[test]
    fn parse_if_elif_else() {
        let program = parse("if a; then b; elif c; then d; else e; fi").unwrap();
        match &program.items[0].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::If { branches, else_branch }, _) => {
                assert_eq!(branches.len(), 2);
                assert!(else_branch.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_for_variants() {
        let program = parse("for x in a b c; do echo $x; done\nfor y; do :; done").unwrap();
        match &program.items[0].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::For { var, words, .. }, _) => {
                assert_eq!(var, "x");
                assert_eq!(words.as_ref().map(Vec::len), Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.items[1].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::For { words, .. }, _) => assert!(words.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_arith_for() {
        let program = parse("for ((i=0; i<3; i++)); do echo $i; done").unwrap();
        match &program.items[0].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::ArithFor { init, cond, step, .. }, _) => {
                assert!(init.is_some() && cond.is_some() && step.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_case_terminators() {
        let program = parse("case $x in\n a|b) echo ab;;\n (c) echo c;&\n *) echo d;;&\nesac").unwrap();
        match &program.items[0].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::Case { arms, .. }, _) => {
                assert_eq!(arms.len(), 3);
                assert_eq!(arms[0].patterns.len(), 2);
                assert_eq!(arms[1].terminator, CaseTerminator::FallThrough);
                assert_eq!(arms[2].terminator, CaseTerminator::Continue);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_function_definitions() {
        let program = parse("greet() { echo hi; }\nfunction bye { echo bye; }").unwrap();
        for item in &program.items {
            match &item.and_or.first.commands[0] {
                Command::FunctionDef(def) => {
                    assert!(matches!(*def.body, Command::Compound(CompoundCommand::Brace(_), _)))
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn parse_array_assignments() {
        let program = parse("arr=(one 'two three' [5]=six) arr[2]=x").unwrap();
        let cmd = simple(&program, 0);
        match &cmd.assignments[0] {
            Assignment::Array { name, elements, append } => {
                assert_eq!(name, "arr");
                assert_eq!(elements.len(), 3);
                assert!(elements[2].index.is_some());
                assert!(!append);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&cmd.assignments[1], Assignment::Scalar { index: Some(_), .. }));
    }

    #[test]
    fn keyword_in_argument_position_is_a_word() {
        let program = parse("echo if then fi").unwrap();
        assert_eq!(simple(&program, 0).words.len(), 4);
    }

    #[test]
    fn heredoc_redirect_target() {
        let program = parse("cat <<EOF\nhello $USER\nEOF\n").unwrap();
        let cmd = simple(&program, 0);
        match &cmd.redirects[0].target {
            RedirectTarget::Heredoc(word) => {
                assert!(word.parts.iter().any(|p| matches!(p, WordPart::Param(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn errors_are_collected() {
        let errors = parse("echo ok; fi\nthen\necho fine").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors.first(), Some(ParseError::UnexpectedToken { line: 1, .. })));
        assert!(!errors.is_incomplete());
    }

    #[test]
    fn missing_keyword_names_the_keyword() {
        let errors = parse("while true; do echo").unwrap_err();
        assert!(matches!(
            errors.first(),
            Some(ParseError::MissingKeyword { keyword: "done", opener: "while", .. })
        ));
    }

    #[test]
    fn completeness_check() {
        assert_eq!(check_complete("if true; then echo hi"), Completeness::Incomplete);
        assert_eq!(check_complete("if true; then echo hi; fi"), Completeness::Complete);
        assert_eq!(check_complete("echo 'open"), Completeness::Incomplete);
        assert_eq!(check_complete("a &&"), Completeness::Incomplete);
        assert_eq!(check_complete("cat <<EOF\nbody"), Completeness::Incomplete);
        assert!(matches!(check_complete("fi"), Completeness::Invalid(_)));
        assert_eq!(check_complete("case x in a) ;; esac"), Completeness::Complete);
    }

    #[test]
    fn bad_redirection_target() {
        let errors = parse("echo > ;").unwrap_err();
        assert!(matches!(errors.first(), Some(ParseError::BadRedirect { .. })));
    }

    #[test]
    fn command_substitution_parsed_eagerly() {
        let program = parse("echo $(echo ${x:-y})").unwrap();
        let cmd = simple(&program, 0);
        match &cmd.words[1].parts[0] {
            WordPart::CommandSub(inner) => {
                let inner_cmd = simple(inner, 0);
                match &inner_cmd.words[1].parts[0] {
                    WordPart::Param(p) => {
                        assert_eq!(p.param, Parameter::Named("x".into()));
                        assert!(matches!(p.op, ParamOp::Default { colon: true, .. }));
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
