//! Alias table
//!
//! Aliases are substituted textually before a top-level statement is
//! parsed. Only unquoted words in command position are candidates, and an
//! alias is never expanded inside its own replacement. A replacement ending
//! in a blank makes the following word a candidate too.

use std::collections::BTreeMap;

use crate::lexer::{is_valid_name, tokenize, Keyword, Operator, TokenKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasRegistry {
    aliases: BTreeMap<String, String>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.aliases.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.aliases.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.aliases.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Aliases in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.aliases.iter()
    }

    /// Substitute aliases in `src`. Text that does not lex is returned
    /// unchanged so the parser can report it.
    pub fn expand(&self, src: &str) -> String {
        if self.aliases.is_empty() {
            return src.to_string();
        }
        let mut active = Vec::new();
        self.expand_with(src, &mut active)
    }

    fn expand_with(&self, src: &str, active: &mut Vec<String>) -> String {
        let Ok(tokens) = tokenize(src) else {
            return src.to_string();
        };
        let mut out = String::with_capacity(src.len());
        let mut copied = 0;
        let mut command_position = true;
        let mut after_blank_alias = false;
        let mut redirect_target = false;

        for token in &tokens {
            match token.kind {
                // Bodies sit past the end of their line; the gap copy
                // below carries them along
                TokenKind::HeredocBody { .. } => continue,
                TokenKind::Word if redirect_target => redirect_target = false,
                TokenKind::Word => {
                    let candidate = command_position || after_blank_alias;
                    after_blank_alias = false;
                    let replacement = self
                        .aliases
                        .get(&token.text)
                        .filter(|_| candidate && token.quoting.is_unquoted())
                        .filter(|_| !active.contains(&token.text));
                    if let Some(value) = replacement {
                        out.push_str(&src[copied..token.span.start]);
                        active.push(token.text.clone());
                        out.push_str(&self.expand_with(value, active));
                        active.pop();
                        copied = token.span.end;
                        after_blank_alias = value.ends_with(' ') || value.ends_with('\t');
                        command_position = false;
                        continue;
                    }
                    command_position = command_position && is_assignment(&token.text);
                }
                TokenKind::Keyword(kw) => {
                    command_position = matches!(
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
                TokenKind::Operator(op) => command_position = op != Operator::RParen,
                TokenKind::Redirect { .. } => redirect_target = true,
                TokenKind::Newline => command_position = true,
                TokenKind::ArithCommand | TokenKind::Comment => {}
            }
        }
        out.push_str(&src[copied..]);
        out
    }
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            let name = name.strip_suffix('+').unwrap_or(name);
            let name = name.split('[').next().unwrap_or(name);
            is_valid_name(name)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(pairs: &[(&str, &str)]) -> AliasRegistry {
        let mut reg = AliasRegistry::new();
        for (name, value) in pairs {
            reg.set(*name, *value);
        }
        reg
    }

    #[test]
    fn test_command_position_only() {
        let reg = registry(&[("ll", "ls -l")]);
        assert_eq!(reg.expand("ll /tmp"), "ls -l /tmp");
        assert_eq!(reg.expand("echo ll"), "echo ll");
        assert_eq!(reg.expand("true && ll; ll | ll"), "true && ls -l; ls -l | ls -l");
    }

    #[test]
    fn test_quoted_words_are_not_expanded() {
        let reg = registry(&[("ll", "ls -l")]);
        assert_eq!(reg.expand("'ll' x"), "'ll' x");
        assert_eq!(reg.expand("\\ll x"), "\\ll x");
    }

    #[test]
    fn test_recursion_guard() {
        let reg = registry(&[("ls", "ls --color"), ("a", "b"), ("b", "a")]);
        assert_eq!(reg.expand("ls"), "ls --color");
        assert_eq!(reg.expand("a"), "a");
    }

    #[test]
    fn test_trailing_blank_chains() {
        let reg = registry(&[("sudo", "sudo "), ("ll", "ls -l")]);
        assert_eq!(reg.expand("sudo ll"), "sudo ls -l");
    }

    #[test]
    fn test_after_assignment_and_keywords() {
        let reg = registry(&[("ll", "ls -l")]);
        assert_eq!(reg.expand("X=1 ll"), "X=1 ls -l");
        assert_eq!(
            reg.expand("if ll; then ll; fi"),
            "if ls -l; then ls -l; fi"
        );
        assert_eq!(reg.expand("echo > ll"), "echo > ll");
    }

    #[test]
    fn test_heredoc_body_is_preserved() {
        let reg = registry(&[("ll", "ls -l")]);
        let src = "cat <<EOF; ll\nll body\nEOF\nll\n";
        assert_eq!(reg.expand(src), "cat <<EOF; ls -l\nll body\nEOF\nls -l\n");
    }

    #[test]
    fn test_unlexable_input_passes_through() {
        let reg = registry(&[("ll", "ls -l")]);
        assert_eq!(reg.expand("ll 'oops"), "ll 'oops");
    }
}
