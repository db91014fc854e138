//! Splitting raw word text into literal and expansion fragments
//!
//! Works on the raw text the lexer produced (quotes and escapes intact).
//! Command substitutions are parsed here too, so a word's sub-programs are
//! complete syntax trees before anything runs.

use super::ParseError;
use crate::ast::{ParamExpansion, ParamOp, Parameter, ReplaceAnchor, Subscript, Word, WordPart};
use crate::lexer::{
    is_name_char, is_name_start, skip_ansi_quoted, skip_backtick, skip_double_quoted, skip_dollar,
    skip_group, skip_single_quoted,
};

type PResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Unquoted,
    /// Inside `"..."`; stops at the closing quote
    DoubleQuoted,
    /// Unquoted here-document body: expansions but no quote characters
    Heredoc,
    /// Arithmetic text: expansions, and double quotes are simply removed
    Arith,
}

/// Parse a word as it appears on a command line
pub fn parse_word(raw: &str, line: usize) -> PResult<Word> {
    let parts = WordParser::new(raw, line).parts(Mode::Unquoted)?;
    Ok(Word { parts })
}

/// Parse the text of an arithmetic expression (`$((...))`, `((...))`, subscripts)
pub fn parse_arith_word(raw: &str, line: usize) -> PResult<Word> {
    let parts = WordParser::new(raw, line).parts(Mode::Arith)?;
    Ok(Word { parts })
}

pub(crate) fn parse_heredoc(body: &str, quoted: bool, line: usize) -> PResult<Word> {
    if quoted {
        return Ok(Word {
            parts: vec![WordPart::Literal {
                text: body.to_string(),
                quoted: true,
            }],
        });
    }
    let parts = WordParser::new(body, line).parts(Mode::Heredoc)?;
    Ok(Word { parts })
}

struct WordParser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> WordParser<'a> {
    fn new(src: &'a str, line: usize) -> Self {
        WordParser {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line,
        }
    }

    fn current_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bad_substitution(&self, text: &str) -> ParseError {
        ParseError::BadSubstitution {
            text: text.to_string(),
            line: self.line,
        }
    }

    fn parts(&mut self, mode: Mode) -> PResult<Vec<WordPart>> {
        let mut parts = Vec::new();
        let mut lit = String::new();

        while let Some(c) = self.current_char() {
            match c {
                '\\' => {
                    self.pos += 1;
                    let next = match self.current_char() {
                        Some(n) => n,
                        None => {
                            lit.push('\\');
                            break;
                        }
                    };
                    self.pos += next.len_utf8();
                    match mode {
                        Mode::Unquoted => {
                            flush(&mut parts, &mut lit, mode);
                            parts.push(WordPart::Literal {
                                text: next.to_string(),
                                quoted: true,
                            });
                        }
                        _ => {
                            let escapable = match mode {
                                Mode::DoubleQuoted => matches!(next, '$' | '`' | '"' | '\\' | '\n'),
                                _ => matches!(next, '$' | '`' | '\\' | '\n'),
                            };
                            if !escapable {
                                lit.push('\\');
                            }
                            if next != '\n' || !escapable {
                                lit.push(next);
                            }
                        }
                    }
                }
                '\'' if mode == Mode::Unquoted => {
                    flush(&mut parts, &mut lit, mode);
                    let end = skip_single_quoted(self.bytes, self.pos + 1)
                        .ok_or_else(|| self.bad_substitution(&self.src[self.pos..]))?;
                    parts.push(WordPart::Literal {
                        text: self.src[self.pos + 1..end - 1].to_string(),
                        quoted: true,
                    });
                    self.pos = end;
                }
                '"' if mode == Mode::Unquoted => {
                    flush(&mut parts, &mut lit, mode);
                    self.pos += 1;
                    let inner = self.parts(Mode::DoubleQuoted)?;
                    parts.push(WordPart::DoubleQuoted(inner));
                }
                '"' if mode == Mode::DoubleQuoted => {
                    self.pos += 1;
                    flush(&mut parts, &mut lit, mode);
                    return Ok(parts);
                }
                '"' if mode == Mode::Arith => {
                    self.pos += 1;
                }
                '$' if mode == Mode::Unquoted && self.bytes.get(self.pos + 1) == Some(&b'"') => {
                    // $"..." is an ordinary double-quoted string here
                    self.pos += 1;
                }
                '$' => match self.dollar(mode)? {
                    Some(part) => {
                        flush(&mut parts, &mut lit, mode);
                        parts.push(part);
                    }
                    None => {
                        lit.push('$');
                        self.pos += 1;
                    }
                },
                '`' => {
                    flush(&mut parts, &mut lit, mode);
                    parts.push(self.backtick()?);
                }
                '~' if mode == Mode::Unquoted && self.pos == 0 => match self.tilde() {
                    Some(part) => parts.push(part),
                    None => {
                        lit.push('~');
                        self.pos += 1;
                    }
                },
                _ => {
                    lit.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        flush(&mut parts, &mut lit, mode);
        Ok(parts)
    }

    /// `~` or `~user` up to the first `/`
    fn tilde(&mut self) -> Option<WordPart> {
        let rest = &self.src[1..];
        let end = rest.find('/').unwrap_or(rest.len());
        let user = &rest[..end];
        if !user
            .chars()
            .all(|c| is_name_char(c) || c == '-' || c == '.')
        {
            return None;
        }
        self.pos = 1 + end;
        Some(WordPart::Tilde(if user.is_empty() {
            None
        } else {
            Some(user.to_string())
        }))
    }

    fn backtick(&mut self) -> PResult<WordPart> {
        let end = skip_backtick(self.bytes, self.pos + 1)
            .ok_or_else(|| self.bad_substitution(&self.src[self.pos..]))?;
        let raw = &self.src[self.pos + 1..end - 1];
        self.pos = end;

        let mut inner = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(&next) = chars.peek() {
                    if matches!(next, '\\' | '`' | '$') {
                        inner.push(next);
                        chars.next();
                        continue;
                    }
                }
            }
            inner.push(c);
        }
        self.command_sub(&inner)
    }

    fn command_sub(&self, inner: &str) -> PResult<WordPart> {
        match super::parse(inner) {
            Ok(program) => Ok(WordPart::CommandSub(program)),
            Err(errors) => {
                let source = errors
                    .into_vec()
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| self.bad_substitution(inner));
                Err(ParseError::InSubstitution {
                    line: self.line,
                    source: Box::new(source),
                })
            }
        }
    }

    /// The expansion starting at the `$` under the cursor, or `None` for a
    /// literal dollar sign
    fn dollar(&mut self, mode: Mode) -> PResult<Option<WordPart>> {
        let start = self.pos;
        let next = self.src[start + 1..].chars().next();
        let part = match next {
            Some('(') => {
                let end = skip_dollar(self.bytes, start)
                    .ok_or_else(|| self.bad_substitution(&self.src[start..]))?;
                let is_arith = self.bytes.get(start + 2) == Some(&b'(')
                    && end >= start + 5
                    && self.bytes[end - 2] == b')';
                self.pos = end;
                if is_arith {
                    let expr = &self.src[start + 3..end - 2];
                    WordPart::Arith(parse_arith_word(expr, self.line)?)
                } else {
                    self.command_sub(&self.src[start + 2..end - 1])?
                }
            }
            Some('{') => {
                let end = skip_group(self.bytes, start + 2, b'{', b'}')
                    .ok_or_else(|| self.bad_substitution(&self.src[start..]))?;
                self.pos = end;
                WordPart::Param(parse_param_body(&self.src[start + 2..end - 1], self.line)?)
            }
            Some('\'') if mode == Mode::Unquoted => {
                let end = skip_ansi_quoted(self.bytes, start + 2)
                    .ok_or_else(|| self.bad_substitution(&self.src[start..]))?;
                self.pos = end;
                WordPart::Literal {
                    text: decode_ansi_c(&self.src[start + 2..end - 1]),
                    quoted: true,
                }
            }
            Some(c) if is_name_start(c) => {
                let name_len = self.src[start + 1..]
                    .char_indices()
                    .find(|&(_, c)| !is_name_char(c))
                    .map_or(self.src.len() - start - 1, |(i, _)| i);
                let name = &self.src[start + 1..start + 1 + name_len];
                self.pos = start + 1 + name_len;
                WordPart::Param(ParamExpansion::simple(Parameter::Named(name.to_string())))
            }
            Some(c) if c.is_ascii_digit() => {
                self.pos = start + 2;
                WordPart::Param(ParamExpansion::simple(Parameter::Positional(
                    (c as u8 - b'0') as usize,
                )))
            }
            Some(c) if matches!(c, '?' | '$' | '!' | '#' | '@' | '*' | '-') => {
                self.pos = start + 2;
                WordPart::Param(ParamExpansion::simple(Parameter::Special(c)))
            }
            _ => return Ok(None),
        };
        Ok(Some(part))
    }
}

fn flush(parts: &mut Vec<WordPart>, lit: &mut String, mode: Mode) {
    if lit.is_empty() {
        return;
    }
    let text = std::mem::take(lit);
    if mode == Mode::Unquoted && text.contains(&['*', '?', '['][..]) {
        parts.push(WordPart::Glob(text));
    } else {
        parts.push(WordPart::Literal {
            text,
            quoted: mode != Mode::Unquoted,
        });
    }
}

/// Parameter, optional subscript, and the unparsed remainder
fn parse_param_head(s: &str) -> Option<(Parameter, Option<&str>, &str)> {
    let first = s.chars().next()?;
    if is_name_start(first) {
        let name_len = s
            .char_indices()
            .find(|&(_, c)| !is_name_char(c))
            .map_or(s.len(), |(i, _)| i);
        let (name, rest) = s.split_at(name_len);
        if rest.starts_with('[') {
            let mut depth = 0usize;
            for (i, b) in rest.bytes().enumerate() {
                match b {
                    b'[' => depth += 1,
                    b']' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some((
                                Parameter::Named(name.to_string()),
                                Some(&rest[1..i]),
                                &rest[i + 1..],
                            ));
                        }
                    }
                    _ => {}
                }
            }
            return None;
        }
        return Some((Parameter::Named(name.to_string()), None, rest));
    }
    if first.is_ascii_digit() {
        let len = s.bytes().take_while(u8::is_ascii_digit).count();
        let n = s[..len].parse().ok()?;
        return Some((Parameter::Positional(n), None, &s[len..]));
    }
    if matches!(first, '@' | '*' | '#' | '?' | '-' | '$' | '!') {
        return Some((Parameter::Special(first), None, &s[1..]));
    }
    None
}

fn parse_subscript(raw: Option<&str>, line: usize) -> PResult<Option<Subscript>> {
    Ok(match raw {
        None => None,
        Some("@") => Some(Subscript::All),
        Some("*") => Some(Subscript::Star),
        Some(expr) => Some(Subscript::Index(parse_arith_word(expr, line)?)),
    })
}

/// The inside of `${...}`
fn parse_param_body(inner: &str, line: usize) -> PResult<ParamExpansion> {
    let bad = || ParseError::BadSubstitution {
        text: inner.to_string(),
        line,
    };

    if let Some(rest) = inner.strip_prefix('#') {
        if !rest.is_empty() {
            if let Some((param, sub, tail)) = parse_param_head(rest) {
                if tail.is_empty() {
                    return Ok(ParamExpansion {
                        param,
                        index: parse_subscript(sub, line)?,
                        op: ParamOp::Length,
                    });
                }
            }
        }
    }

    if let Some(rest) = inner.strip_prefix('!') {
        if !rest.is_empty() {
            let (param, sub, tail) = parse_param_head(rest).ok_or_else(bad)?;
            if !tail.is_empty() {
                return Err(bad());
            }
            let index = parse_subscript(sub, line)?;
            let op = match index {
                Some(Subscript::All) | Some(Subscript::Star) => ParamOp::Keys,
                _ => ParamOp::Indirect,
            };
            return Ok(ParamExpansion { param, index, op });
        }
    }

    let (param, sub, tail) = parse_param_head(inner).ok_or_else(bad)?;
    let index = parse_subscript(sub, line)?;
    let op = parse_param_op(tail, line).ok_or_else(bad)??;
    Ok(ParamExpansion { param, index, op })
}

fn parse_param_op(tail: &str, line: usize) -> Option<PResult<ParamOp>> {
    if tail.is_empty() {
        return Some(Ok(ParamOp::None));
    }
    let (colon, rest) = match tail.strip_prefix(':') {
        Some(r) => (true, r),
        None => (false, tail),
    };
    let word = |s: &str| parse_word(s, line);

    let op = match rest.chars().next() {
        Some('-') => word(&rest[1..]).map(|word| ParamOp::Default { word, colon }),
        Some('=') => word(&rest[1..]).map(|word| ParamOp::Assign { word, colon }),
        Some('?') => word(&rest[1..]).map(|word| ParamOp::Error { word, colon }),
        Some('+') => word(&rest[1..]).map(|word| ParamOp::Alternate { word, colon }),
        _ if colon => {
            let (offset, length) = match find_top_level(rest, b':') {
                Some(i) => (&rest[..i], Some(&rest[i + 1..])),
                None => (rest, None),
            };
            parse_arith_word(offset, line).and_then(|offset| {
                let length = length.map(|l| parse_arith_word(l, line)).transpose()?;
                Ok(ParamOp::Substring { offset, length })
            })
        }
        Some('#') => {
            let (longest, pat) = match rest.strip_prefix("##") {
                Some(p) => (true, p),
                None => (false, &rest[1..]),
            };
            word(pat).map(|pattern| ParamOp::RemovePrefix { pattern, longest })
        }
        Some('%') => {
            let (longest, pat) = match rest.strip_prefix("%%") {
                Some(p) => (true, p),
                None => (false, &rest[1..]),
            };
            word(pat).map(|pattern| ParamOp::RemoveSuffix { pattern, longest })
        }
        Some('/') => {
            let r = &rest[1..];
            let (all, anchor, r) = match r.chars().next() {
                Some('/') => (true, ReplaceAnchor::Anywhere, &r[1..]),
                Some('#') => (false, ReplaceAnchor::Start, &r[1..]),
                Some('%') => (false, ReplaceAnchor::End, &r[1..]),
                _ => (false, ReplaceAnchor::Anywhere, r),
            };
            let (pat, rep) = match find_top_level(r, b'/') {
                Some(i) => (&r[..i], &r[i + 1..]),
                None => (r, ""),
            };
            word(pat).and_then(|pattern| {
                Ok(ParamOp::Replace {
                    pattern,
                    replacement: word(rep)?,
                    all,
                    anchor,
                })
            })
        }
        _ => return None,
    };
    Some(op)
}

/// First occurrence of `target` outside quotes and nested expansions
fn find_top_level(s: &str, target: u8) -> Option<usize> {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() {
        if b[i] == target {
            return Some(i);
        }
        i = match b[i] {
            b'\\' => i + 2,
            b'\'' => skip_single_quoted(b, i + 1)?,
            b'"' => skip_double_quoted(b, i + 1)?,
            b'`' => skip_backtick(b, i + 1)?,
            b'$' => skip_dollar(b, i)?,
            _ => i + 1,
        };
    }
    None
}

/// Escape processing for `$'...'`
pub(crate) fn decode_ansi_c(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let esc = match chars.next() {
            Some(e) => e,
            None => {
                out.push('\\');
                break;
            }
        };
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'e' | 'E' => out.push('\x1b'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' | '?' => out.push(esc),
            '0'..='7' => {
                let mut value = esc.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.extend(char::from_u32(value));
            }
            'x' | 'u' | 'U' => {
                let max = match esc {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let mut value = 0u32;
                let mut digits = 0;
                while digits < max {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    out.push('\\');
                    out.push(esc);
                } else {
                    out.extend(char::from_u32(value));
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(raw: &str) -> ParamExpansion {
        match parse_word(raw, 1).unwrap().parts.remove(0) {
            WordPart::Param(p) => p,
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn literal_and_quoted_fragments() {
        let word = parse_word("a'b c'\"d $x\"\\*", 1).unwrap();
        assert_eq!(word.parts.len(), 4);
        assert_eq!(
            word.parts[1],
            WordPart::Literal {
                text: "b c".into(),
                quoted: true
            }
        );
        match &word.parts[2] {
            WordPart::DoubleQuoted(inner) => assert_eq!(inner.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            word.parts[3],
            WordPart::Literal {
                text: "*".into(),
                quoted: true
            }
        );
    }

    #[test]
    fn unquoted_glob_characters_form_a_pattern() {
        let word = parse_word("*.rs", 1).unwrap();
        assert_eq!(word.parts, vec![WordPart::Glob("*.rs".into())]);
    }

    #[test]
    fn tilde_only_at_start() {
        let word = parse_word("~/bin", 1).unwrap();
        assert_eq!(word.parts[0], WordPart::Tilde(None));
        let word = parse_word("~root", 1).unwrap();
        assert_eq!(word.parts[0], WordPart::Tilde(Some("root".into())));
        let word = parse_word("a~", 1).unwrap();
        assert!(matches!(word.parts[0], WordPart::Literal { .. }));
    }

    #[test]
    fn parameter_operators() {
        assert!(matches!(param("${x:-d}").op, ParamOp::Default { colon: true, .. }));
        assert!(matches!(param("${x=d}").op, ParamOp::Assign { colon: false, .. }));
        assert!(matches!(param("${x##*/}").op, ParamOp::RemovePrefix { longest: true, .. }));
        assert!(matches!(param("${x%.*}").op, ParamOp::RemoveSuffix { longest: false, .. }));
        assert!(matches!(param("${x:1:2}").op, ParamOp::Substring { length: Some(_), .. }));
        assert!(matches!(param("${x: -3}").op, ParamOp::Substring { length: None, .. }));
        assert!(matches!(param("${#x}").op, ParamOp::Length));
        assert!(matches!(param("${!ref}").op, ParamOp::Indirect));
        assert!(matches!(param("${!arr[@]}").op, ParamOp::Keys));
        assert!(matches!(
            param("${x//a/b}").op,
            ParamOp::Replace { all: true, anchor: ReplaceAnchor::Anywhere, .. }
        ));
        assert_eq!(param("${#}").param, Parameter::Special('#'));
        assert_eq!(param("$10").param, Parameter::Positional(1));
        assert_eq!(param("${10}").param, Parameter::Positional(10));
    }

    #[test]
    fn array_subscripts() {
        assert_eq!(param("${a[@]}").index, Some(Subscript::All));
        assert!(matches!(param("${a[i+1]}").index, Some(Subscript::Index(_))));
        let len = param("${#a[*]}");
        assert_eq!(len.index, Some(Subscript::Star));
        assert_eq!(len.op, ParamOp::Length);
    }

    #[test]
    fn bad_substitution_is_reported() {
        assert!(matches!(
            parse_word("${x;y}", 3),
            Err(ParseError::BadSubstitution { line: 3, .. })
        ));
    }

    #[test]
    fn arithmetic_and_backticks() {
        let word = parse_word("$((1 + $x))`echo \\`hi\\``", 1).unwrap();
        assert!(matches!(word.parts[0], WordPart::Arith(_)));
        assert!(matches!(word.parts[1], WordPart::CommandSub(_)));
    }

    #[test]
    fn ansi_c_quoting() {
        let word = parse_word("$'a\\tb\\x41\\n'", 1).unwrap();
        assert_eq!(
            word.parts[0],
            WordPart::Literal {
                text: "a\tbA\n".into(),
                quoted: true
            }
        );
    }

    #[test]
    fn heredoc_body_modes() {
        let word = parse_heredoc("cost: \\$5 \"$x\"\n", false, 1).unwrap();
        assert_eq!(
            word.parts[0],
            WordPart::Literal {
                text: "cost: $5 \"".into(),
                quoted: true
            }
        );
        assert!(matches!(word.parts[1], WordPart::Param(_)));
        let literal = parse_heredoc("$x\n", true, 1).unwrap();
        assert_eq!(literal.as_literal().as_deref(), Some("$x\n"));
    }
}
