//! Abstract Syntax Tree for posh
//!
//! The parser builds these nodes once; nothing here is mutated after
//! construction. Words keep their fragments unexpanded: turning a [`Word`]
//! into argument strings happens only at execution time.

use crate::lexer::RedirectOp;

/// A sequence of and-or lists separated by `;`, `&` or newlines.
/// A whole parsed program is a `List`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct List {
    pub items: Vec<ListItem>,
}

pub type Program = List;

#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub and_or: AndOr,
    /// Terminated by `&`
    pub background: bool,
    /// Source text of the and-or list, used for job listings
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AndOr {
    pub first: Pipeline,
    pub rest: Vec<(Connector, Pipeline)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Leading `!`
    pub negated: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Simple(SimpleCommand),
    Compound(CompoundCommand, Vec<Redirect>),
    FunctionDef(FunctionDef),
}

impl Command {
    pub fn line(&self) -> usize {
        match self {
            Command::Simple(simple) => simple.line,
            Command::Compound(_, _) => 0,
            Command::FunctionDef(def) => def.line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimpleCommand {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// `name=value`, `name+=value`, `name[idx]=value`
    Scalar {
        name: String,
        index: Option<Word>,
        value: Word,
        append: bool,
    },
    /// `name=(a b [5]=c)`
    Array {
        name: String,
        elements: Vec<ArrayElement>,
        append: bool,
    },
}

impl Assignment {
    pub fn name(&self) -> &str {
        match self {
            Assignment::Scalar { name, .. } | Assignment::Array { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayElement {
    pub index: Option<Word>,
    pub value: Word,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    /// Always a `Command::Compound`
    pub body: Box<Command>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompoundCommand {
    Brace(List),
    Subshell(List),
    If {
        /// `if`/`elif` conditions paired with their `then` bodies
        branches: Vec<(List, List)>,
        else_branch: Option<List>,
    },
    For {
        var: String,
        /// `None` iterates the positional parameters
        words: Option<Vec<Word>>,
        body: List,
    },
    ArithFor {
        init: Option<Word>,
        cond: Option<Word>,
        step: Option<Word>,
        body: List,
    },
    While {
        cond: List,
        body: List,
    },
    Until {
        cond: List,
        body: List,
    },
    Case {
        subject: Word,
        arms: Vec<CaseArm>,
    },
    /// `(( expr ))`
    Arith(Word),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub patterns: Vec<Word>,
    pub body: List,
    pub terminator: CaseTerminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTerminator {
    /// `;;`
    Break,
    /// `;&` runs the next arm's body unconditionally
    FallThrough,
    /// `;;&` keeps testing the following patterns
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    /// Explicit descriptor (`2>`), otherwise the operator's default
    pub fd: Option<u32>,
    pub op: RedirectOp,
    pub target: RedirectTarget,
}

impl Redirect {
    /// The descriptor this redirection rewrites
    pub fn target_fd(&self) -> u32 {
        self.fd.unwrap_or(match self.op {
            RedirectOp::Less
            | RedirectOp::LessGreat
            | RedirectOp::LessAnd
            | RedirectOp::DLess
            | RedirectOp::DLessDash
            | RedirectOp::TLess => 0,
            _ => 1,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedirectTarget {
    Word(Word),
    /// Here-document body, already split into fragments. A quoted
    /// delimiter yields a single quoted literal.
    Heredoc(Word),
}

/// An unexpanded word: an ordered sequence of fragments
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    pub fn literal(text: impl Into<String>) -> Self {
        Word {
            parts: vec![WordPart::Literal {
                text: text.into(),
                quoted: false,
            }],
        }
    }

    /// The word's text if it contains no expansions at all
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal { text, .. } | WordPart::Glob(text) => out.push_str(text),
                WordPart::DoubleQuoted(inner) => {
                    for p in inner {
                        match p {
                            WordPart::Literal { text, .. } => out.push_str(text),
                            _ => return None,
                        }
                    }
                }
                _ => return None,
            }
        }
        Some(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Plain text. `quoted` text came from single quotes, `$'...'` or a
    /// backslash escape and is exempt from splitting and globbing.
    Literal { text: String, quoted: bool },
    /// Unquoted text containing glob metacharacters
    Glob(String),
    /// Leading `~` or `~user`
    Tilde(Option<String>),
    Param(ParamExpansion),
    CommandSub(List),
    /// `$(( expr ))`; the expression may itself contain expansions
    Arith(Word),
    DoubleQuoted(Vec<WordPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamExpansion {
    pub param: Parameter,
    pub index: Option<Subscript>,
    pub op: ParamOp,
}

impl ParamExpansion {
    pub fn simple(param: Parameter) -> Self {
        ParamExpansion {
            param,
            index: None,
            op: ParamOp::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Named(String),
    Positional(usize),
    /// `? $ ! # @ * -`
    Special(char),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Subscript {
    /// `[@]`
    All,
    /// `[*]`
    Star,
    /// Arithmetic index
    Index(Word),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceAnchor {
    Anywhere,
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamOp {
    None,
    /// `${#name}`
    Length,
    /// `${name:-word}` / `${name-word}`
    Default { word: Word, colon: bool },
    /// `${name:=word}` / `${name=word}`
    Assign { word: Word, colon: bool },
    /// `${name:?word}` / `${name?word}`
    Error { word: Word, colon: bool },
    /// `${name:+word}` / `${name+word}`
    Alternate { word: Word, colon: bool },
    RemovePrefix { pattern: Word, longest: bool },
    RemoveSuffix { pattern: Word, longest: bool },
    Substring { offset: Word, length: Option<Word> },
    /// `${!name}`
    Indirect,
    /// `${!name[@]}`
    Keys,
    Replace {
        pattern: Word,
        replacement: Word,
        all: bool,
        anchor: ReplaceAnchor,
    },
}
