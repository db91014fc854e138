//! Tokenization for posh
//!
//! The lexer turns source text into a lazy stream of [`Token`]s. It knows about
//! quoting, escapes, operators, redirections and the opaque expansion spans
//! (`$(...)`, `` `...` ``, `$((...))`, `${...}`), but it never interprets the
//! contents of a word: splitting a word into literal and expansion fragments is
//! the parser's job (see `parser::word`).
//!
//! Here-document bodies are taken from the lines following the logical line
//! that contains the `<<` operator. The body is emitted as a
//! [`TokenKind::HeredocBody`] token right after the delimiter word, and the
//! lexer skips over the consumed body lines when it reaches the end of that
//! line.

use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// A location in the source text (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

/// Byte range of a token in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("line {}: unterminated single quote", .0.line)]
    UnterminatedSingleQuote(Position),
    #[error("line {}: unterminated double quote", .0.line)]
    UnterminatedDoubleQuote(Position),
    #[error("line {}: unterminated backquote", .0.line)]
    UnterminatedBacktick(Position),
    #[error("line {}: unterminated `{kind}'", pos.line)]
    UnterminatedExpansion { kind: &'static str, pos: Position },
    #[error("line {}: here-document delimited by end of file (wanted `{delimiter}')", pos.line)]
    UnterminatedHeredoc { delimiter: String, pos: Position },
    #[error("line {}: unexpected end of file after backslash", .0.line)]
    TrailingBackslash(Position),
}

impl LexError {
    /// Where the offending construct started
    pub fn position(&self) -> Position {
        match self {
            LexError::UnterminatedSingleQuote(p)
            | LexError::UnterminatedDoubleQuote(p)
            | LexError::UnterminatedBacktick(p)
            | LexError::TrailingBackslash(p) => *p,
            LexError::UnterminatedExpansion { pos, .. }
            | LexError::UnterminatedHeredoc { pos, .. } => *pos,
        }
    }

    /// Every lexical error means the input ended inside an open construct,
    /// so more input could always complete it.
    pub fn is_incomplete(&self) -> bool {
        true
    }
}

/// Control and list operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Semi,          // ;
    DoubleSemi,    // ;;
    SemiAmp,       // ;&
    DoubleSemiAmp, // ;;&
    Amp,           // &
    AndAnd,        // &&
    OrOr,          // ||
    Pipe,          // |
    PipeAmp,       // |&
    LParen,        // (
    RParen,        // )
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Semi => ";",
            Operator::DoubleSemi => ";;",
            Operator::SemiAmp => ";&",
            Operator::DoubleSemiAmp => ";;&",
            Operator::Amp => "&",
            Operator::AndAnd => "&&",
            Operator::OrOr => "||",
            Operator::Pipe => "|",
            Operator::PipeAmp => "|&",
            Operator::LParen => "(",
            Operator::RParen => ")",
        }
    }
}

/// Redirection operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    Less,      // <
    Great,     // >
    DGreat,    // >>
    Clobber,   // >|
    LessGreat, // <>
    LessAnd,   // <&
    GreatAnd,  // >&
    AndGreat,  // &>
    AndDGreat, // &>>
    DLess,     // <<
    DLessDash, // <<-
    TLess,     // <<<
}

impl RedirectOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectOp::Less => "<",
            RedirectOp::Great => ">",
            RedirectOp::DGreat => ">>",
            RedirectOp::Clobber => ">|",
            RedirectOp::LessGreat => "<>",
            RedirectOp::LessAnd => "<&",
            RedirectOp::GreatAnd => ">&",
            RedirectOp::AndGreat => "&>",
            RedirectOp::AndDGreat => "&>>",
            RedirectOp::DLess => "<<",
            RedirectOp::DLessDash => "<<-",
            RedirectOp::TLess => "<<<",
        }
    }

    pub fn is_heredoc(&self) -> bool {
        matches!(self, RedirectOp::DLess | RedirectOp::DLessDash)
    }
}

/// Reserved words. They are only reserved in command position; the parser
/// turns them back into plain words everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Then,
    Elif,
    Else,
    Fi,
    For,
    In,
    Do,
    Done,
    While,
    Until,
    Case,
    Esac,
    Function,
    LBrace,
    RBrace,
    Bang,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Keyword> {
        Some(match word {
            "if" => Keyword::If,
            "then" => Keyword::Then,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "fi" => Keyword::Fi,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "do" => Keyword::Do,
            "done" => Keyword::Done,
            "while" => Keyword::While,
            "until" => Keyword::Until,
            "case" => Keyword::Case,
            "esac" => Keyword::Esac,
            "function" => Keyword::Function,
            "{" => Keyword::LBrace,
            "}" => Keyword::RBrace,
            "!" => Keyword::Bang,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Then => "then",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::Fi => "fi",
            Keyword::For => "for",
            Keyword::In => "in",
            Keyword::Do => "do",
            Keyword::Done => "done",
            Keyword::While => "while",
            Keyword::Until => "until",
            Keyword::Case => "case",
            Keyword::Esac => "esac",
            Keyword::Function => "function",
            Keyword::LBrace => "{",
            Keyword::RBrace => "}",
            Keyword::Bang => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A word (command name, argument, assignment), raw text with quotes intact
    Word,
    Keyword(Keyword),
    Operator(Operator),
    /// A redirection operator with its optional leading fd number (`2>`)
    Redirect { op: RedirectOp, fd: Option<u32> },
    /// Body of the preceding here-document. `quoted` means the delimiter was
    /// quoted and the body must not be expanded.
    HeredocBody { quoted: bool },
    /// `(( expr ))` in command position; text is the inner expression
    ArithCommand,
    Comment,
    Newline,
}

/// Which quoting forms appear in a token's raw text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quoting {
    pub single: bool,
    pub double: bool,
    pub escaped: bool,
}

impl Quoting {
    pub fn is_unquoted(&self) -> bool {
        !self.single && !self.double && !self.escaped
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub quoting: Quoting,
    pub span: Span,
    pub pos: Position,
}

impl Token {
    pub fn is_operator(&self, op: Operator) -> bool {
        self.kind == TokenKind::Operator(op)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Operator(op) => write!(f, "`{}'", op.as_str()),
            TokenKind::Redirect { op, .. } => write!(f, "`{}'", op.as_str()),
            TokenKind::Keyword(kw) => write!(f, "`{}'", kw.as_str()),
            _ => write!(f, "`{}'", self.text),
        }
    }
}

/// First character of a variable or function name (Unicode letters allowed)
pub fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

pub fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_name_start(c) => chars.all(is_name_char),
        _ => false,
    }
}

fn is_meta(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b';' | b'&' | b'|' | b'<' | b'>' | b'(' | b')')
}

// Span scanners shared with the word parser. They work on bytes: every
// delimiter is ASCII, and ASCII bytes never occur inside multi-byte UTF-8
// sequences. Each returns the index just past the closing delimiter.

/// `i` is just past the opening `'`
pub(crate) fn skip_single_quoted(s: &[u8], mut i: usize) -> Option<usize> {
    while i < s.len() {
        if s[i] == b'\'' {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// `i` is just past the opening `$'`; backslash escapes the next byte
pub(crate) fn skip_ansi_quoted(s: &[u8], mut i: usize) -> Option<usize> {
    while i < s.len() {
        match s[i] {
            b'\\' => i += 2,
            b'\'' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// `i` is just past the opening `"`
pub(crate) fn skip_double_quoted(s: &[u8], mut i: usize) -> Option<usize> {
    while i < s.len() {
        match s[i] {
            b'\\' => i += 2,
            b'"' => return Some(i + 1),
            b'$' => i = skip_dollar(s, i)?,
            b'`' => i = skip_backtick(s, i + 1)?,
            _ => i += 1,
        }
    }
    None
}

/// `i` is just past the opening backquote
pub(crate) fn skip_backtick(s: &[u8], mut i: usize) -> Option<usize> {
    while i < s.len() {
        match s[i] {
            b'\\' => i += 2,
            b'`' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// `i` points at a `$`. Plain `$name` forms are not spans and return `i + 1`.
pub(crate) fn skip_dollar(s: &[u8], i: usize) -> Option<usize> {
    match s.get(i + 1) {
        Some(b'(') if s.get(i + 2) == Some(&b'(') => skip_group(s, i + 2, b'(', b')'),
        Some(b'(') => skip_command_sub(s, i + 2),
        Some(b'{') => skip_group(s, i + 2, b'{', b'}'),
        Some(b'\'') => skip_ansi_quoted(s, i + 2),
        _ => Some(i + 1),
    }
}

/// `i` is just past the opening delimiter. Nested quotes and expansions are
/// skipped as units; bare `open`/`close` bytes nest.
pub(crate) fn skip_group(s: &[u8], mut i: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    while i < s.len() {
        let b = s[i];
        if b == close {
            if depth == 0 {
                return Some(i + 1);
            }
            depth -= 1;
            i += 1;
            continue;
        }
        if b == open {
            depth += 1;
            i += 1;
            continue;
        }
        match b {
            b'\\' => i += 2,
            b'\'' => i = skip_single_quoted(s, i + 1)?,
            b'"' => i = skip_double_quoted(s, i + 1)?,
            b'`' => i = skip_backtick(s, i + 1)?,
            b'$' => i = skip_dollar(s, i)?,
            _ => i += 1,
        }
    }
    None
}

/// Where a `case` being skipped over is in its grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseScan {
    /// Between `case` and `in`
    Subject,
    /// Reading patterns up to their closing `)`
    Pattern,
    /// Inside an arm's commands
    Body,
}

/// `i` is just past the `(` of `$(`. The body is tokenized as commands, so
/// quotes, comments, here-document bodies and the `)` ending a `case`
/// pattern are all skipped the way the parser will see them.
pub(crate) fn skip_command_sub(s: &[u8], i: usize) -> Option<usize> {
    let body = std::str::from_utf8(s.get(i..)?).ok()?;
    let mut depth = 0usize;
    let mut cases: Vec<CaseScan> = Vec::new();
    let mut command_start = true;
    for token in Lexer::without_positions(body) {
        let token = token.ok()?;
        let at_start = command_start;
        command_start = false;
        let top = cases.last().copied();
        match token.kind {
            TokenKind::Comment | TokenKind::HeredocBody { .. } => command_start = at_start,
            TokenKind::Newline => command_start = true,
            TokenKind::Keyword(Keyword::Case) if at_start => cases.push(CaseScan::Subject),
            TokenKind::Keyword(Keyword::In) if top == Some(CaseScan::Subject) => {
                cases.pop();
                cases.push(CaseScan::Pattern);
            }
            TokenKind::Keyword(Keyword::Esac)
                if top == Some(CaseScan::Pattern) || (at_start && top == Some(CaseScan::Body)) =>
            {
                cases.pop();
            }
            TokenKind::Keyword(kw) => {
                command_start = at_start
                    && matches!(
                        kw,
                        Keyword::If
                            | Keyword::Then
                            | Keyword::Elif
                            | Keyword::Else
                            | Keyword::Do
                            | Keyword::While
                            | Keyword::Until
                            | Keyword::LBrace
                            | Keyword::Bang
                    );
            }
            TokenKind::Operator(Operator::LParen) if top == Some(CaseScan::Pattern) => {}
            TokenKind::Operator(Operator::RParen) if top == Some(CaseScan::Pattern) => {
                cases.pop();
                cases.push(CaseScan::Body);
                command_start = true;
            }
            TokenKind::Operator(Operator::DoubleSemi | Operator::SemiAmp | Operator::DoubleSemiAmp)
                if top == Some(CaseScan::Body) =>
            {
                cases.pop();
                cases.push(CaseScan::Pattern);
            }
            TokenKind::Operator(Operator::RParen) => {
                if depth == 0 {
                    return Some(i + token.span.end);
                }
                depth -= 1;
            }
            TokenKind::Operator(Operator::LParen) => {
                depth += 1;
                command_start = true;
            }
            TokenKind::Operator(_) => command_start = true,
            _ => {}
        }
    }
    None
}

/// Lazy tokenizer over a source string.
///
/// A lexer cannot be rewound; to re-scan, construct a new one over the same
/// text.
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Byte offsets at which each line starts
    line_starts: Vec<usize>,
    pending: VecDeque<Token>,
    /// Set after a `<<`/`<<-` operator: the next word is a delimiter.
    /// The flag records whether leading tabs are stripped.
    heredoc_delimiter: Option<bool>,
    /// Where lexing resumes once the current line's newline is reached
    heredoc_resume: Option<usize>,
    /// Whether the next word would start a command
    command_position: bool,
    failed: bool,
    /// Off for span scanning, where only byte offsets matter
    track_positions: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        let mut lexer = Lexer::without_positions(src);
        lexer.line_starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        lexer.track_positions = true;
        lexer
    }

    /// A lexer whose tokens all report line 1, column 1
    fn without_positions(src: &'a str) -> Self {
        Lexer {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line_starts: vec![0],
            pending: VecDeque::new(),
            heredoc_delimiter: None,
            heredoc_resume: None,
            command_position: true,
            failed: false,
            track_positions: false,
        }
    }

    /// The text being tokenized
    pub fn source(&self) -> &'a str {
        self.src
    }

    /// Resolve a byte offset to a line/column position
    pub fn position_at(&self, offset: usize) -> Position {
        if !self.track_positions {
            return Position {
                offset,
                line: 1,
                column: 1,
            };
        }
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line_idx];
        let column = self.src[line_start..offset.min(self.src.len())].chars().count() + 1;
        Position {
            offset,
            line: line_idx + 1,
            column,
        }
    }

    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn make_token(&self, kind: TokenKind, text: String, quoting: Quoting, start: usize) -> Token {
        Token {
            kind,
            text,
            quoting,
            span: Span {
                start,
                end: self.pos,
            },
            pos: self.position_at(start),
        }
    }

    fn skip_blanks(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek_byte(0) {
                Some(b' ') | Some(b'\t') => self.pos += 1,
                Some(b'\\') if self.peek_byte(1) == Some(b'\n') => {
                    if self.pos + 2 == self.bytes.len() {
                        return Err(LexError::TrailingBackslash(self.position_at(self.pos)));
                    }
                    self.pos += 2;
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        if let Some(token) = self.pending.pop_front() {
            return Ok(Some(token));
        }
        self.skip_blanks()?;
        let start = self.pos;
        let b = match self.peek_byte(0) {
            Some(b) => b,
            None => return Ok(None),
        };

        let token = match b {
            b'\n' => {
                self.pos += 1;
                let token = self.make_token(TokenKind::Newline, "\n".into(), Quoting::default(), start);
                if let Some(resume) = self.heredoc_resume.take() {
                    if resume > self.pos {
                        self.pos = resume;
                    }
                }
                token
            }
            b'#' => {
                while let Some(c) = self.peek_byte(0) {
                    if c == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
                let text = self.src[start..self.pos].to_string();
                self.make_token(TokenKind::Comment, text, Quoting::default(), start)
            }
            b'(' if self.command_position && self.peek_byte(1) == Some(b'(') => {
                match self.scan_arith_command()? {
                    Some(token) => token,
                    None => self.scan_operator(start),
                }
            }
            b';' | b'&' | b'|' | b'(' | b')' | b'<' | b'>' => self.scan_operator(start),
            b'0'..=b'9' if self.fd_prefix_len().is_some() => self.scan_operator(start),
            _ => self.scan_word(start)?,
        };

        self.command_position = match token.kind {
            TokenKind::Comment => self.command_position,
            TokenKind::Newline | TokenKind::Keyword(_) => true,
            TokenKind::Operator(op) => op != Operator::RParen,
            _ => false,
        };
        Ok(Some(token))
    }

    /// Length of a digit run directly followed by `<` or `>`
    fn fd_prefix_len(&self) -> Option<usize> {
        let mut n = 0;
        while let Some(b) = self.peek_byte(n) {
            if b.is_ascii_digit() {
                n += 1;
            } else {
                break;
            }
        }
        match self.peek_byte(n) {
            Some(b'<') | Some(b'>') if n > 0 => Some(n),
            _ => None,
        }
    }

    fn scan_operator(&mut self, start: usize) -> Token {
        let fd = self.fd_prefix_len().and_then(|n| {
            let digits = &self.src[self.pos..self.pos + n];
            self.pos += n;
            digits.parse::<u32>().ok()
        });
        let rest = &self.src[self.pos..];
        let table: &[(&str, TokenKind)] = &[
            (";;&", TokenKind::Operator(Operator::DoubleSemiAmp)),
            (";;", TokenKind::Operator(Operator::DoubleSemi)),
            (";&", TokenKind::Operator(Operator::SemiAmp)),
            (";", TokenKind::Operator(Operator::Semi)),
            ("&&", TokenKind::Operator(Operator::AndAnd)),
            ("&>>", TokenKind::Redirect { op: RedirectOp::AndDGreat, fd: None }),
            ("&>", TokenKind::Redirect { op: RedirectOp::AndGreat, fd: None }),
            ("&", TokenKind::Operator(Operator::Amp)),
            ("||", TokenKind::Operator(Operator::OrOr)),
            ("|&", TokenKind::Operator(Operator::PipeAmp)),
            ("|", TokenKind::Operator(Operator::Pipe)),
            ("(", TokenKind::Operator(Operator::LParen)),
            (")", TokenKind::Operator(Operator::RParen)),
            ("<<<", TokenKind::Redirect { op: RedirectOp::TLess, fd: None }),
            ("<<-", TokenKind::Redirect { op: RedirectOp::DLessDash, fd: None }),
            ("<<", TokenKind::Redirect { op: RedirectOp::DLess, fd: None }),
            ("<&", TokenKind::Redirect { op: RedirectOp::LessAnd, fd: None }),
            ("<>", TokenKind::Redirect { op: RedirectOp::LessGreat, fd: None }),
            ("<", TokenKind::Redirect { op: RedirectOp::Less, fd: None }),
            (">>", TokenKind::Redirect { op: RedirectOp::DGreat, fd: None }),
            (">&", TokenKind::Redirect { op: RedirectOp::GreatAnd, fd: None }),
            (">|", TokenKind::Redirect { op: RedirectOp::Clobber, fd: None }),
            (">", TokenKind::Redirect { op: RedirectOp::Great, fd: None }),
        ];
        // The caller only dispatches here on an operator byte, so one entry matches.
        let (text, kind) = table
            .iter()
            .find(|(text, _)| rest.starts_with(text))
            .copied()
            .unwrap_or((";", TokenKind::Operator(Operator::Semi)));
        self.pos += text.len();
        let kind = match kind {
            TokenKind::Redirect { op, .. } => {
                if op.is_heredoc() {
                    self.heredoc_delimiter = Some(op == RedirectOp::DLessDash);
                }
                TokenKind::Redirect { op, fd }
            }
            other => other,
        };
        self.make_token(kind, self.src[start..self.pos].to_string(), Quoting::default(), start)
    }

    /// `((` in command position. Returns `None` when the parentheses turn out
    /// not to close with `))`, in which case they are two subshell openers.
    fn scan_arith_command(&mut self) -> Result<Option<Token>, LexError> {
        let start = self.pos;
        let s = self.bytes;
        let mut i = start + 2;
        let mut depth = 0usize;
        while i < s.len() {
            match s[i] {
                b'(' => depth += 1,
                b')' if depth > 0 => depth -= 1,
                b')' => {
                    if s.get(i + 1) == Some(&b')') {
                        let text = self.src[start + 2..i].to_string();
                        self.pos = i + 2;
                        return Ok(Some(self.make_token(
                            TokenKind::ArithCommand,
                            text,
                            Quoting::default(),
                            start,
                        )));
                    }
                    return Ok(None);
                }
                b'\'' => {
                    i = skip_single_quoted(s, i + 1).ok_or(LexError::UnterminatedSingleQuote(
                        self.position_at(i),
                    ))?;
                    continue;
                }
                b'"' => {
                    i = skip_double_quoted(s, i + 1).ok_or(LexError::UnterminatedDoubleQuote(
                        self.position_at(i),
                    ))?;
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
        self.failed = true;
        Err(LexError::UnterminatedExpansion {
            kind: "((",
            pos: self.position_at(start),
        })
    }

    fn scan_word(&mut self, start: usize) -> Result<Token, LexError> {
        let s = self.bytes;
        let mut text = String::new();
        let mut quoting = Quoting::default();
        let mut seg_start = self.pos;

        while self.pos < s.len() {
            let b = s[self.pos];
            if is_meta(b) {
                if b == b'(' && is_array_assignment_prefix(&text, &self.src[seg_start..self.pos]) {
                    let open = self.pos;
                    let end = skip_group(s, open + 1, b'(', b')').ok_or_else(|| {
                        LexError::UnterminatedExpansion {
                            kind: "(",
                            pos: self.position_at(open),
                        }
                    })?;
                    self.pos = end;
                    continue;
                }
                break;
            }
            match b {
                b'\\' => {
                    if s.get(self.pos + 1) == Some(&b'\n') {
                        if self.pos + 2 == s.len() {
                            return Err(LexError::TrailingBackslash(self.position_at(self.pos)));
                        }
                        // line continuation: drop both bytes from the word
                        text.push_str(&self.src[seg_start..self.pos]);
                        self.pos += 2;
                        seg_start = self.pos;
                        continue;
                    }
                    if self.pos + 1 >= s.len() {
                        return Err(LexError::TrailingBackslash(self.position_at(self.pos)));
                    }
                    quoting.escaped = true;
                    self.pos += 1;
                    self.pos += self.src[self.pos..].chars().next().map_or(1, char::len_utf8);
                }
                b'\'' => {
                    quoting.single = true;
                    let at = self.pos;
                    self.pos = skip_single_quoted(s, at + 1)
                        .ok_or(LexError::UnterminatedSingleQuote(self.position_at(at)))?;
                }
                b'"' => {
                    quoting.double = true;
                    let at = self.pos;
                    self.pos = skip_double_quoted(s, at + 1)
                        .ok_or(LexError::UnterminatedDoubleQuote(self.position_at(at)))?;
                }
                b'`' => {
                    let at = self.pos;
                    self.pos = skip_backtick(s, at + 1)
                        .ok_or(LexError::UnterminatedBacktick(self.position_at(at)))?;
                }
                b'$' => {
                    let at = self.pos;
                    if s.get(at + 1) == Some(&b'\'') {
                        quoting.single = true;
                    }
                    self.pos = skip_dollar(s, at).ok_or_else(|| LexError::UnterminatedExpansion {
                        kind: dollar_kind(s, at),
                        pos: self.position_at(at),
                    })?;
                }
                _ => {
                    self.pos += self.src[self.pos..].chars().next().map_or(1, char::len_utf8);
                }
            }
        }
        text.push_str(&self.src[seg_start..self.pos]);

        if let Some(strip_tabs) = self.heredoc_delimiter.take() {
            return self.finish_heredoc_delimiter(text, quoting, start, strip_tabs);
        }

        let kind = match Keyword::from_word(&text) {
            Some(kw) if quoting.is_unquoted() => TokenKind::Keyword(kw),
            _ => TokenKind::Word,
        };
        Ok(self.make_token(kind, text, quoting, start))
    }

    /// The word after `<<` is the delimiter. Locate its body now, queue it as
    /// a `HeredocBody` token, and arrange for the body lines to be skipped.
    fn finish_heredoc_delimiter(
        &mut self,
        text: String,
        quoting: Quoting,
        start: usize,
        strip_tabs: bool,
    ) -> Result<Token, LexError> {
        let delimiter = unquote_delimiter(&text);
        let quoted = !quoting.is_unquoted();
        let body_start = match self.heredoc_resume {
            Some(resume) => resume,
            None => match self.find_line_end(self.pos) {
                Some(nl) => nl + 1,
                None => self.src.len(),
            },
        };

        let mut body = String::new();
        let mut cursor = body_start;
        let mut terminated = false;
        while cursor < self.src.len() {
            let line_end = self.src[cursor..]
                .find('\n')
                .map_or(self.src.len(), |n| cursor + n);
            let line = &self.src[cursor..line_end];
            let line = if strip_tabs { line.trim_start_matches('\t') } else { line };
            cursor = (line_end + 1).min(self.src.len());
            if line == delimiter {
                terminated = true;
                break;
            }
            body.push_str(line);
            body.push('\n');
        }
        if !terminated {
            self.failed = true;
            return Err(LexError::UnterminatedHeredoc {
                delimiter,
                pos: self.position_at(start),
            });
        }
        self.heredoc_resume = Some(cursor);

        let delim_token = self.make_token(TokenKind::Word, text, quoting, start);
        let mut body_token = self.make_token(
            TokenKind::HeredocBody { quoted },
            body,
            Quoting::default(),
            body_start,
        );
        body_token.span = Span {
            start: body_start,
            end: cursor,
        };
        self.pending.push_back(body_token);
        Ok(delim_token)
    }

    /// Offset of the newline ending the logical line that contains `from`
    fn find_line_end(&self, from: usize) -> Option<usize> {
        let s = self.bytes;
        let mut i = from;
        while i < s.len() {
            match s[i] {
                b'\n' => return Some(i),
                b'\\' => i += 2,
                b'\'' => i = skip_single_quoted(s, i + 1)?,
                b'"' => i = skip_double_quoted(s, i + 1)?,
                b'`' => i = skip_backtick(s, i + 1)?,
                b'$' => i = skip_dollar(s, i)?,
                b'#' if i == 0 || matches!(s[i - 1], b' ' | b'\t' | b';') => {
                    while i < s.len() && s[i] != b'\n' {
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        }
        None
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_token() {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn dollar_kind(s: &[u8], at: usize) -> &'static str {
    match (s.get(at + 1), s.get(at + 2)) {
        (Some(b'('), Some(b'(')) => "$((",
        (Some(b'('), _) => "$(",
        (Some(b'{'), _) => "${",
        _ => "$'",
    }
}

/// `name=` or `name+=` (the whole word so far), optionally with a subscript
fn is_array_assignment_prefix(done: &str, current: &str) -> bool {
    let word = format!("{}{}", done, current);
    let head = match word.strip_suffix("+=").or_else(|| word.strip_suffix('=')) {
        Some(h) => h,
        None => return false,
    };
    is_valid_name(head)
}

/// Quote removal for a heredoc delimiter word
fn unquote_delimiter(raw: &str) -> String {
    let mut out = String::new();
    let mut chars = raw.chars();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match (quote, c) {
            (None, '\'') | (None, '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '\\') | (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Tokenize a complete input string
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(src).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn texts(src: &str) -> Vec<String> {
        tokenize(src).unwrap().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn tokenize_simple_words() {
        assert_eq!(texts("echo hello world"), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn tokenize_compound_operators() {
        assert_eq!(
            kinds("a && b || c ;; d"),
            vec![
                TokenKind::Word,
                TokenKind::Operator(Operator::AndAnd),
                TokenKind::Word,
                TokenKind::Operator(Operator::OrOr),
                TokenKind::Word,
                TokenKind::Operator(Operator::DoubleSemi),
                TokenKind::Word,
            ]
        );
    }

    #[test]
    fn tokenize_fd_redirections() {
        let tokens = tokenize("cmd 2>&1 >>out <<<here").unwrap();
        assert_eq!(
            tokens[1].kind,
            TokenKind::Redirect { op: RedirectOp::GreatAnd, fd: Some(2) }
        );
        assert_eq!(tokens[2].text, "1");
        assert_eq!(
            tokens[3].kind,
            TokenKind::Redirect { op: RedirectOp::DGreat, fd: None }
        );
        assert_eq!(
            tokens[5].kind,
            TokenKind::Redirect { op: RedirectOp::TLess, fd: None }
        );
    }

    #[test]
    fn metacharacters_are_literal_inside_quotes() {
        let tokens = tokenize("echo 'a;b|c' \"x && y\"").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].text, "'a;b|c'");
        assert!(tokens[1].quoting.single);
        assert_eq!(tokens[2].text, "\"x && y\"");
        assert!(tokens[2].quoting.double);
    }

    #[test]
    fn escaped_metacharacter_stays_in_word() {
        let tokens = tokenize("echo a\\;b").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, "a\\;b");
        assert!(tokens[1].quoting.escaped);
    }

    #[test]
    fn expansion_spans_are_opaque() {
        let tokens = tokenize("echo $(echo \"a)b\" | tr a b) ${x:-a b} $((1 + (2*3)))").unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[1].text, "$(echo \"a)b\" | tr a b)");
        assert_eq!(tokens[2].text, "${x:-a b}");
        assert_eq!(tokens[3].text, "$((1 + (2*3)))");
    }

    #[test]
    fn keywords_only_when_unquoted() {
        let tokens = tokenize("if 'then' fi").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::If));
        assert_eq!(tokens[1].kind, TokenKind::Word);
        assert_eq!(tokens[2].kind, TokenKind::Keyword(Keyword::Fi));
    }

    #[test]
    fn heredoc_body_follows_delimiter() {
        let src = "cat <<EOF; echo after\nline one\n  line two\nEOF\necho next\n";
        let tokens = tokenize(src).unwrap();
        let body = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::HeredocBody { .. }))
            .unwrap();
        assert_eq!(body.text, "line one\n  line two\n");
        let words: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(words, vec!["cat", "EOF", "echo", "after", "echo", "next"]);
    }

    #[test]
    fn command_substitution_follows_the_grammar() {
        assert_eq!(
            texts("echo $(case a in a) echo matched;; esac) end"),
            vec!["echo", "$(case a in a) echo matched;; esac)", "end"]
        );
        assert_eq!(
            texts("echo $(case b in (a) :;; (b) echo b;; esac)"),
            vec!["echo", "$(case b in (a) :;; (b) echo b;; esac)"]
        );
        assert_eq!(texts("x=$(cat <<E\nit's\nE\n)"), vec!["x=$(cat <<E\nit's\nE\n)"]);
        assert_eq!(
            texts("echo $(echo hi # not ) yet\n) done"),
            vec!["echo", "$(echo hi # not ) yet\n)", "done"]
        );
        assert_eq!(texts("echo $( (echo a) ) b"), vec!["echo", "$( (echo a) )", "b"]);
        // An argument spelled `case` opens nothing
        assert_eq!(texts("echo $(echo case) x"), vec!["echo", "$(echo case)", "x"]);
    }

    #[test]
    fn heredoc_dash_strips_tabs_and_quoted_delimiter() {
        let src = "cat <<-'END'\n\t$HOME\n\tEND\n";
        let tokens = tokenize(src).unwrap();
        assert_eq!(tokens[3].kind, TokenKind::HeredocBody { quoted: true });
        assert_eq!(tokens[3].text, "$HOME\n");
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = tokenize("echo 'abc").unwrap_err();
        assert!(matches!(err, LexError::UnterminatedSingleQuote(p) if p.column == 6));
        assert!(matches!(
            tokenize("echo $(ls").unwrap_err(),
            LexError::UnterminatedExpansion { kind: "$(", .. }
        ));
        assert!(matches!(
            tokenize("cat <<EOF\nbody\n").unwrap_err(),
            LexError::UnterminatedHeredoc { .. }
        ));
    }

    #[test]
    fn arith_command_in_command_position() {
        let tokens = tokenize("((i += 1)); echo x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::ArithCommand);
        assert_eq!(tokens[0].text, "i += 1");
        assert_eq!(tokens[1].kind, TokenKind::Operator(Operator::Semi));

        // nested subshells are not arithmetic
        let kinds = kinds("((echo a) )");
        assert_eq!(kinds[0], TokenKind::Operator(Operator::LParen));
        assert_eq!(kinds[1], TokenKind::Operator(Operator::LParen));
    }

    #[test]
    fn array_assignment_is_one_word() {
        assert_eq!(texts("arr=(a 'b c' [3]=d) x"), vec!["arr=(a 'b c' [3]=d)", "x"]);
    }

    #[test]
    fn line_continuation_joins_words() {
        assert_eq!(texts("echo ab\\\ncd"), vec!["echo", "abcd"]);
    }

    #[test]
    fn multibyte_words_and_positions() {
        let tokens = tokenize("échø ñame\nnext").unwrap();
        assert_eq!(tokens[1].text, "ñame");
        assert_eq!(tokens[1].pos.column, 6);
        assert_eq!(tokens[3].pos.line, 2);
    }

    #[test]
    fn comments_are_tokens() {
        let tokens = tokenize("echo a # trailing").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Comment);
        assert_eq!(tokens[2].text, "# trailing");
    }
}
