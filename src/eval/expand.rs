//! Word expansion: parameters, command substitution, arithmetic, tilde,
//! field splitting and pathname expansion, in that order.
//!
//! A word is first flattened into [`Chunk`]s that remember whether each
//! piece of text may still be split or globbed. Splitting then turns the
//! chunks into fields, and globbing runs per field.

use glob::{MatchOptions, Pattern};

use super::io::{IoFrame, Output, SharedBuffer};
use super::{ExecError, ExpandError, Shell};
use crate::arith::{self, ArithContext, ArithError};
use crate::ast::{ParamExpansion, ParamOp, Parameter, Subscript, Word, WordPart};
use crate::config;
use crate::parser;
use crate::sys;

use super::pattern::{self, ShellPattern};

const DEFAULT_IFS: &str = " \t\n";

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

#[derive(Debug, Clone, PartialEq)]
enum Chunk {
    /// `quoted` text is exempt from globbing; `split` text is subject to
    /// IFS splitting
    Text {
        text: String,
        quoted: bool,
        split: bool,
    },
    /// Field boundary between the elements of `$@` or an array
    Break,
}

impl Chunk {
    fn quoted(text: impl Into<String>) -> Self {
        Chunk::Text {
            text: text.into(),
            quoted: true,
            split: false,
        }
    }

    /// Result of an expansion: split and globbed unless double-quoted
    fn expanded(text: impl Into<String>, dq: bool) -> Self {
        Chunk::Text {
            text: text.into(),
            quoted: dq,
            split: !dq,
        }
    }
}

/// Value of a parameter before any operator is applied
#[derive(Debug, Clone, PartialEq)]
enum Lookup {
    Unset,
    Scalar(String),
    /// `$@`, `$*`, `${a[@]}`, `${a[*]}`
    List { items: Vec<String>, star: bool },
}

impl Lookup {
    /// Whether `-`, `=`, `?` and `+` treat the parameter as absent
    fn is_missing(&self, colon: bool) -> bool {
        match self {
            Lookup::Unset => true,
            Lookup::Scalar(s) => colon && s.is_empty(),
            Lookup::List { items, .. } => {
                items.is_empty() || (colon && items.iter().all(String::is_empty))
            }
        }
    }

    fn map(self, f: impl Fn(&str) -> String) -> Lookup {
        match self {
            Lookup::Unset => Lookup::Unset,
            Lookup::Scalar(s) => Lookup::Scalar(f(&s)),
            Lookup::List { items, star } => Lookup::List {
                items: items.iter().map(|s| f(s)).collect(),
                star,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Segment {
    text: String,
    quoted: bool,
}

type Field = Vec<Segment>;

/// Turns chunks into fields, splitting `split` text on IFS
struct Splitter<'a> {
    ifs: &'a str,
    fields: Vec<Field>,
    current: Field,
    /// The current field exists even if empty (quoted text was seen)
    started: bool,
    /// Last field ended on IFS whitespace, which may absorb one
    /// following non-whitespace delimiter
    after_ws: bool,
}

impl<'a> Splitter<'a> {
    fn new(ifs: &'a str) -> Self {
        Splitter {
            ifs,
            fields: Vec::new(),
            current: Vec::new(),
            started: false,
            after_ws: false,
        }
    }

    fn push_text(&mut self, text: &str, quoted: bool) {
        if text.is_empty() && !quoted {
            return;
        }
        self.current.push(Segment {
            text: text.to_string(),
            quoted,
        });
        self.started = true;
        self.after_ws = false;
    }

    fn finish(&mut self) {
        self.fields.push(std::mem::take(&mut self.current));
        self.started = false;
    }

    fn push_split(&mut self, text: &str) {
        let mut pending = String::new();
        for c in text.chars() {
            if !self.ifs.contains(c) {
                pending.push(c);
                continue;
            }
            if !pending.is_empty() {
                self.push_text(&std::mem::take(&mut pending), false);
            }
            if c.is_whitespace() {
                if self.started {
                    self.finish();
                    self.after_ws = true;
                }
            } else if self.started {
                self.finish();
                self.after_ws = false;
            } else if self.after_ws {
                self.after_ws = false;
            } else {
                self.finish();
            }
        }
        if !pending.is_empty() {
            self.push_text(&pending, false);
        }
    }

    fn push_break(&mut self) {
        if self.started {
            self.finish();
        }
        self.after_ws = false;
    }

    fn into_fields(mut self) -> Vec<Field> {
        if self.started {
            self.finish();
        }
        self.fields
    }
}

fn contains_list(parts: &[WordPart]) -> bool {
    parts.iter().any(|part| match part {
        WordPart::Param(pe) => {
            !matches!(pe.op, ParamOp::Length)
                && (pe.param == Parameter::Special('@') || pe.index == Some(Subscript::All))
        }
        _ => false,
    })
}

fn param_name(param: &Parameter) -> String {
    match param {
        Parameter::Named(name) => name.clone(),
        Parameter::Positional(n) => n.to_string(),
        Parameter::Special(c) => c.to_string(),
    }
}

/// Character-based slice used by `${x:off:len}` on strings and lists
fn slice_bounds(len: usize, offset: i64, length: Option<i64>) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if offset < 0 { len + offset } else { offset };
    if start < 0 || start > len {
        return None;
    }
    let end = match length {
        None => len,
        Some(l) if l < 0 => len + l,
        Some(l) => start.saturating_add(l).min(len),
    };
    if end <= start {
        return None;
    }
    Some((start as usize, end as usize))
}

/// Arithmetic variable access with the shell's dynamic variables
struct ShellArith<'a> {
    shell: &'a mut Shell,
}

impl ArithContext for ShellArith<'_> {
    fn lookup(&mut self, name: &str, index: Option<i64>) -> Option<String> {
        if index.is_none() {
            if let Some(value) = self.shell.dynamic_variable(name) {
                return Some(value);
            }
        }
        self.shell.env.lookup(name, index)
    }

    fn assign(&mut self, name: &str, index: Option<i64>, value: i64) -> Result<(), ArithError> {
        self.shell.env.assign(name, index, value)
    }
}

impl Shell {
    /// Expand command words into argument strings
    pub(crate) fn expand_words(&mut self, words: &[Word], io: &IoFrame) -> Result<Vec<String>, ExecError> {
        let mut out = Vec::new();
        for word in words {
            out.extend(self.expand_fields(word, io)?);
        }
        Ok(out)
    }

    /// Full expansion of one word: zero or more fields
    pub(crate) fn expand_fields(&mut self, word: &Word, io: &IoFrame) -> Result<Vec<String>, ExecError> {
        let mut chunks = Vec::new();
        self.push_parts(&word.parts, false, &mut chunks, io)?;

        let ifs = self
            .env
            .get_scalar("IFS")
            .unwrap_or_else(|| DEFAULT_IFS.to_string());
        let mut splitter = Splitter::new(&ifs);
        for chunk in &chunks {
            match chunk {
                Chunk::Text { text, split: true, .. } => splitter.push_split(text),
                Chunk::Text { text, quoted, .. } => splitter.push_text(text, *quoted),
                Chunk::Break => splitter.push_break(),
            }
        }

        let noglob = self.env.options.noglob;
        let mut fields = Vec::new();
        for field in splitter.into_fields() {
            let globbable = !noglob
                && field
                    .iter()
                    .any(|s| !s.quoted && pattern::has_glob_chars(&s.text));
            let literal: String = field.iter().map(|s| s.text.as_str()).collect();
            if globbable {
                let pattern: String = field
                    .iter()
                    .map(|s| {
                        if s.quoted {
                            Pattern::escape(&s.text)
                        } else {
                            s.text.clone()
                        }
                    })
                    .collect();
                let matches = self.glob(&pattern);
                if !matches.is_empty() {
                    fields.extend(matches);
                    continue;
                }
            }
            fields.push(literal);
        }
        Ok(fields)
    }

    /// Expansion without splitting or globbing: assignment values,
    /// here-documents, `case` subjects
    pub(crate) fn expand_string(&mut self, word: &Word, io: &IoFrame) -> Result<String, ExecError> {
        let mut chunks = Vec::new();
        self.push_parts(&word.parts, false, &mut chunks, io)?;
        let mut out = String::new();
        for chunk in chunks {
            match chunk {
                Chunk::Text { text, .. } => out.push_str(&text),
                Chunk::Break => out.push(' '),
            }
        }
        Ok(out)
    }

    /// Expand a word for pattern matching: quoted text matches literally
    pub(crate) fn expand_pattern(&mut self, word: &Word, io: &IoFrame) -> Result<String, ExecError> {
        let mut chunks = Vec::new();
        self.push_parts(&word.parts, false, &mut chunks, io)?;
        let mut out = String::new();
        for chunk in chunks {
            match chunk {
                Chunk::Text { text, quoted: true, .. } => out.push_str(&Pattern::escape(&text)),
                Chunk::Text { text, .. } => out.push_str(&text),
                Chunk::Break => out.push(' '),
            }
        }
        Ok(out)
    }

    /// Expand an arithmetic word and evaluate it
    pub(crate) fn arith_word(&mut self, word: &Word, io: &IoFrame) -> Result<i64, ExecError> {
        let text = self.expand_string(word, io)?;
        Ok(self.eval_arith(&text)?)
    }

    pub(crate) fn eval_arith(&mut self, text: &str) -> Result<i64, ArithError> {
        arith::evaluate(text, &mut ShellArith { shell: self })
    }

    /// `RANDOM`, `LINENO` and `SECONDS` are computed on every read
    pub(crate) fn dynamic_variable(&mut self, name: &str) -> Option<String> {
        match name {
            "RANDOM" => Some(self.next_random().to_string()),
            "LINENO" => Some(self.current_line.to_string()),
            "SECONDS" => Some(self.seconds().to_string()),
            _ => None,
        }
    }

    fn push_parts(
        &mut self,
        parts: &[WordPart],
        dq: bool,
        out: &mut Vec<Chunk>,
        io: &IoFrame,
    ) -> Result<(), ExecError> {
        for part in parts {
            match part {
                WordPart::Literal { text, quoted } => out.push(Chunk::Text {
                    text: text.clone(),
                    quoted: *quoted || dq,
                    split: false,
                }),
                WordPart::Glob(text) => out.push(Chunk::Text {
                    text: text.clone(),
                    quoted: dq,
                    split: false,
                }),
                WordPart::Tilde(user) => out.push(Chunk::quoted(self.expand_tilde(user.as_deref()))),
                WordPart::Param(pe) => self.push_param(pe, dq, out, io)?,
                WordPart::CommandSub(list) => {
                    let text = self.command_substitution(list, io)?;
                    out.push(Chunk::expanded(text, dq));
                }
                WordPart::Arith(word) => {
                    let value = self.arith_word(word, io)?;
                    out.push(Chunk::expanded(value.to_string(), dq));
                }
                WordPart::DoubleQuoted(inner) => {
                    // `""` is still a field; `"$@"` with no arguments is not
                    if !contains_list(inner) {
                        out.push(Chunk::quoted(""));
                    }
                    self.push_parts(inner, true, out, io)?;
                }
            }
        }
        Ok(())
    }

    fn expand_tilde(&self, user: Option<&str>) -> String {
        match user {
            None => self
                .env
                .get_scalar("HOME")
                .or_else(|| config::home_dir().map(|h| h.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "~".to_string()),
            Some(name) => sys::home_of(name).unwrap_or_else(|| format!("~{}", name)),
        }
    }

    fn ifs_join_char(&self) -> String {
        match self.env.get_scalar("IFS") {
            None => " ".to_string(),
            Some(ifs) => ifs.chars().next().map(String::from).unwrap_or_default(),
        }
    }

    fn push_value(&self, value: Lookup, dq: bool, out: &mut Vec<Chunk>) {
        match value {
            Lookup::Unset => {}
            Lookup::Scalar(text) => out.push(Chunk::expanded(text, dq)),
            Lookup::List { items, star: true } if dq => {
                out.push(Chunk::quoted(items.join(&self.ifs_join_char())));
            }
            Lookup::List { items, .. } => {
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        out.push(Chunk::Break);
                    }
                    out.push(Chunk::expanded(item, dq));
                }
            }
        }
    }

    fn require_set(&self, param: &Parameter, value: &Lookup) -> Result<(), ExpandError> {
        let exempt = matches!(param, Parameter::Special('@' | '*'));
        if self.env.options.nounset && *value == Lookup::Unset && !exempt {
            return Err(ExpandError::Unbound(param_name(param)));
        }
        Ok(())
    }

    fn push_param(
        &mut self,
        pe: &ParamExpansion,
        dq: bool,
        out: &mut Vec<Chunk>,
        io: &IoFrame,
    ) -> Result<(), ExecError> {
        match &pe.op {
            ParamOp::Keys => {
                let keys = self.array_keys(&pe.param)?;
                let star = pe.index == Some(Subscript::Star);
                self.push_value(Lookup::List { items: keys, star }, dq, out);
                return Ok(());
            }
            ParamOp::Indirect => {
                return match self.indirect_target(pe, io)? {
                    Some(target) => self.push_param(&target, dq, out, io),
                    None => Ok(()),
                };
            }
            _ => {}
        }

        let value = self.lookup(&pe.param, pe.index.as_ref(), io)?;
        match &pe.op {
            ParamOp::None => {
                self.require_set(&pe.param, &value)?;
                self.push_value(value, dq, out);
            }
            ParamOp::Length => {
                self.require_set(&pe.param, &value)?;
                let len = match value {
                    Lookup::Unset => 0,
                    Lookup::Scalar(s) => s.chars().count(),
                    Lookup::List { items, .. } => items.len(),
                };
                out.push(Chunk::expanded(len.to_string(), dq));
            }
            ParamOp::Default { word, colon } => {
                if value.is_missing(*colon) {
                    self.push_parts(&word.parts, dq, out, io)?;
                } else {
                    self.push_value(value, dq, out);
                }
            }
            ParamOp::Alternate { word, colon } => {
                if !value.is_missing(*colon) {
                    self.push_parts(&word.parts, dq, out, io)?;
                }
            }
            ParamOp::Assign { word, colon } => {
                if value.is_missing(*colon) {
                    let assigned = self.expand_string(word, io)?;
                    self.assign_parameter(pe, &assigned, io)?;
                    out.push(Chunk::expanded(assigned, dq));
                } else {
                    self.push_value(value, dq, out);
                }
            }
            ParamOp::Error { word, colon } => {
                if value.is_missing(*colon) {
                    let message = if word.parts.is_empty() {
                        if *colon {
                            "parameter null or not set".to_string()
                        } else {
                            "parameter not set".to_string()
                        }
                    } else {
                        self.expand_string(word, io)?
                    };
                    return Err(ExpandError::Param {
                        name: param_name(&pe.param),
                        message,
                    }
                    .into());
                }
                self.push_value(value, dq, out);
            }
            ParamOp::RemovePrefix { pattern: pat, longest } => {
                self.require_set(&pe.param, &value)?;
                let pat = ShellPattern::new(&self.expand_pattern(pat, io)?);
                let value = value.map(|s| pattern::remove_prefix(s, &pat, *longest));
                self.push_value(value, dq, out);
            }
            ParamOp::RemoveSuffix { pattern: pat, longest } => {
                self.require_set(&pe.param, &value)?;
                let pat = ShellPattern::new(&self.expand_pattern(pat, io)?);
                let value = value.map(|s| pattern::remove_suffix(s, &pat, *longest));
                self.push_value(value, dq, out);
            }
            ParamOp::Replace {
                pattern: pat,
                replacement,
                all,
                anchor,
            } => {
                self.require_set(&pe.param, &value)?;
                let pat = ShellPattern::new(&self.expand_pattern(pat, io)?);
                let replacement = self.expand_string(replacement, io)?;
                let value = value.map(|s| pattern::replace(s, &pat, &replacement, *all, *anchor));
                self.push_value(value, dq, out);
            }
            ParamOp::Substring { offset, length } => {
                self.require_set(&pe.param, &value)?;
                let offset = self.arith_word(offset, io)?;
                let length = match length {
                    Some(word) => Some(self.arith_word(word, io)?),
                    None => None,
                };
                let value = self.substring(&pe.param, value, offset, length);
                self.push_value(value, dq, out);
            }
            ParamOp::Keys | ParamOp::Indirect => {}
        }
        Ok(())
    }

    fn substring(&self, param: &Parameter, value: Lookup, offset: i64, length: Option<i64>) -> Lookup {
        match value {
            Lookup::Unset => Lookup::Unset,
            Lookup::Scalar(s) => {
                let chars: Vec<char> = s.chars().collect();
                match slice_bounds(chars.len(), offset, length) {
                    Some((start, end)) => Lookup::Scalar(chars[start..end].iter().collect()),
                    None => Lookup::Scalar(String::new()),
                }
            }
            Lookup::List { mut items, star } => {
                // Positional slices count `$0` as element zero
                if matches!(param, Parameter::Special('@' | '*')) {
                    items.insert(0, self.script_name.clone());
                }
                let items = match slice_bounds(items.len(), offset, length) {
                    Some((start, end)) => items[start..end].to_vec(),
                    None => Vec::new(),
                };
                Lookup::List { items, star }
            }
        }
    }

    fn lookup(
        &mut self,
        param: &Parameter,
        index: Option<&Subscript>,
        io: &IoFrame,
    ) -> Result<Lookup, ExecError> {
        let scalar = |s: Option<String>| s.map_or(Lookup::Unset, Lookup::Scalar);
        Ok(match param {
            Parameter::Positional(0) => Lookup::Scalar(self.script_name.clone()),
            Parameter::Positional(n) => scalar(self.env.positional.get(n - 1).cloned()),
            Parameter::Special('@') => Lookup::List {
                items: self.env.positional.clone(),
                star: false,
            },
            Parameter::Special('*') => Lookup::List {
                items: self.env.positional.clone(),
                star: true,
            },
            Parameter::Special('#') => Lookup::Scalar(self.env.positional.len().to_string()),
            Parameter::Special('?') => Lookup::Scalar(self.last_status.to_string()),
            Parameter::Special('$') => Lookup::Scalar(self.shell_pid.to_string()),
            Parameter::Special('!') => scalar(self.last_bg_pid.map(|p| p.to_string())),
            Parameter::Special('-') => Lookup::Scalar(self.option_flags()),
            Parameter::Special(_) => Lookup::Unset,
            Parameter::Named(name) => match index {
                None => match self.dynamic_variable(name) {
                    Some(value) => Lookup::Scalar(value),
                    None => scalar(self.env.get_scalar(name)),
                },
                Some(Subscript::All | Subscript::Star) => {
                    let items = self
                        .env
                        .get(name)
                        .map(|v| v.value.elements())
                        .unwrap_or_default();
                    Lookup::List {
                        items,
                        star: index == Some(&Subscript::Star),
                    }
                }
                Some(Subscript::Index(word)) => {
                    let i = self.arith_word(word, io)?;
                    let i = if i < 0 {
                        self.env.next_index(name) as i64 + i
                    } else {
                        i
                    };
                    match usize::try_from(i) {
                        Ok(i) => scalar(self.env.get_element(name, i)),
                        Err(_) => return Err(ExpandError::BadSubscript(name.clone()).into()),
                    }
                }
            },
        })
    }

    fn array_keys(&self, param: &Parameter) -> Result<Vec<String>, ExpandError> {
        match param {
            Parameter::Named(name) => Ok(self
                .env
                .get(name)
                .map(|v| v.value.keys())
                .unwrap_or_default()
                .into_iter()
                .map(|k| k.to_string())
                .collect()),
            other => Err(ExpandError::BadSubstitution(param_name(other))),
        }
    }

    /// `${!name}`: the value of `name` names the parameter to expand.
    /// An empty or unset name expands to nothing.
    fn indirect_target(
        &mut self,
        pe: &ParamExpansion,
        io: &IoFrame,
    ) -> Result<Option<ParamExpansion>, ExecError> {
        let value = self.lookup(&pe.param, pe.index.as_ref(), io)?;
        self.require_set(&pe.param, &value)?;
        let name = match value {
            Lookup::Scalar(s) => s,
            Lookup::List { items, .. } => items.join(" "),
            Lookup::Unset => return Ok(None),
        };
        if name.is_empty() {
            return Ok(None);
        }
        let word = parser::parse_word(&format!("${{{}}}", name), self.current_line)
            .map_err(|_| ExpandError::BadSubstitution(name.clone()))?;
        match word.parts.as_slice() {
            [WordPart::Param(target)] if target.op == ParamOp::None => Ok(Some(target.clone())),
            _ => Err(ExpandError::BadSubstitution(name).into()),
        }
    }

    /// `${name:=word}` and friends store into the named variable
    fn assign_parameter(&mut self, pe: &ParamExpansion, value: &str, io: &IoFrame) -> Result<(), ExecError> {
        let Parameter::Named(name) = &pe.param else {
            return Err(ExpandError::CannotAssign(param_name(&pe.param)).into());
        };
        match &pe.index {
            None => self.env.set_scalar(name, value)?,
            Some(Subscript::Index(word)) => {
                let i = self.arith_word(word, io)?;
                let i = usize::try_from(i).map_err(|_| ExpandError::BadSubscript(name.clone()))?;
                self.env.set_element(name, i, value.to_string())?;
            }
            Some(_) => return Err(ExpandError::CannotAssign(name.clone()).into()),
        }
        Ok(())
    }

    /// Run a program in a subshell and collect its standard output,
    /// minus trailing newlines
    fn command_substitution(&mut self, list: &crate::ast::List, io: &IoFrame) -> Result<String, ExecError> {
        let buffer = SharedBuffer::default();
        let frame = IoFrame {
            stdin: io.stdin.clone(),
            stdout: Output::Buffer(buffer.clone()),
            stderr: io.stderr.clone(),
        };
        let status = self.subshell(&frame, |shell| shell.execute_list(list, &frame))?;
        self.subst_status = Some(status);
        let mut text = String::from_utf8_lossy(&buffer.borrow()).into_owned();
        let trimmed = text.trim_end_matches('\n').len();
        text.truncate(trimmed);
        Ok(text)
    }

    /// Pathname expansion relative to the shell's working directory.
    /// Returns sorted matches, or nothing when the pattern matches nothing.
    pub(crate) fn glob(&self, pattern: &str) -> Vec<String> {
        let absolute = pattern.starts_with('/');
        let cwd = self.cwd.to_string_lossy();
        let base = cwd.trim_end_matches('/');
        let full = if absolute {
            pattern.to_string()
        } else {
            format!("{}/{}", Pattern::escape(base), pattern)
        };
        let Ok(paths) = glob::glob_with(&full, PATH_MATCH) else {
            return Vec::new();
        };
        let prefix = format!("{}/", base);
        let mut matches: Vec<String> = paths
            .filter_map(Result::ok)
            .map(|p| p.to_string_lossy().into_owned())
            .map(|p| {
                if absolute {
                    p
                } else {
                    p.strip_prefix(&prefix).map(str::to_string).unwrap_or(p)
                }
            })
            .collect();
        matches.sort();
        matches
    }
}
