//! Shell variables, positional parameters and options
//!
//! Variables live in a stack of scopes. Scope 0 is global; functions push
//! a scope for their `local` names, and command-prefix assignments to a
//! function or built-in push a temporary one. Lookups walk from the top
//! down, so a function sees every binding it did not shadow (dynamic
//! scoping).

use std::collections::{BTreeMap, HashMap};

use crate::arith::{ArithContext, ArithError};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(String),
    /// Indexed array; indices may be sparse
    Array(BTreeMap<usize, String>),
}

impl Value {
    /// The value `$name` reads: arrays yield element 0
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Array(items) => items.get(&0).map(String::as_str),
        }
    }

    /// Every element in index order; a scalar is a one-element list
    pub fn elements(&self) -> Vec<String> {
        match self {
            Value::Scalar(s) => vec![s.clone()],
            Value::Array(items) => items.values().cloned().collect(),
        }
    }

    pub fn keys(&self) -> Vec<usize> {
        match self {
            Value::Scalar(_) => vec![0],
            Value::Array(items) => items.keys().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: Value,
    pub exported: bool,
    pub readonly: bool,
}

impl Variable {
    fn scalar(value: String) -> Self {
        Variable {
            value: Value::Scalar(value),
            exported: false,
            readonly: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    /// Prefix assignments of a single function or built-in call
    Temporary,
}

#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    /// `None` marks a name declared in this scope but currently unset
    vars: HashMap<String, Option<Variable>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    Readonly(String),
    NotInFunction,
}

impl std::fmt::Display for EnvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvError::Readonly(name) => write!(f, "{}: readonly variable", name),
            EnvError::NotInFunction => write!(f, "can only be used in a function"),
        }
    }
}

impl std::error::Error for EnvError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub errexit: bool,
    pub nounset: bool,
    pub xtrace: bool,
    pub noglob: bool,
    pub noclobber: bool,
    pub verbose: bool,
    pub pipefail: bool,
}

/// Long names for `set -o`, paired with their single-letter flag
pub const OPTION_NAMES: &[(&str, Option<char>)] = &[
    ("errexit", Some('e')),
    ("noclobber", Some('C')),
    ("noglob", Some('f')),
    ("nounset", Some('u')),
    ("pipefail", None),
    ("verbose", Some('v')),
    ("xtrace", Some('x')),
];

impl Options {
    fn slot(&mut self, name: &str) -> Option<&mut bool> {
        Some(match name {
            "errexit" => &mut self.errexit,
            "nounset" => &mut self.nounset,
            "xtrace" => &mut self.xtrace,
            "noglob" => &mut self.noglob,
            "noclobber" => &mut self.noclobber,
            "verbose" => &mut self.verbose,
            "pipefail" => &mut self.pipefail,
            _ => return None,
        })
    }

    pub fn set_named(&mut self, name: &str, on: bool) -> bool {
        match self.slot(name) {
            Some(slot) => {
                *slot = on;
                true
            }
            None => false,
        }
    }

    pub fn set_flag(&mut self, flag: char, on: bool) -> bool {
        match OPTION_NAMES.iter().find(|(_, f)| *f == Some(flag)) {
            Some((name, _)) => self.set_named(name, on),
            None => false,
        }
    }

    pub fn get_named(&self, name: &str) -> Option<bool> {
        Some(match name {
            "errexit" => self.errexit,
            "nounset" => self.nounset,
            "xtrace" => self.xtrace,
            "noglob" => self.noglob,
            "noclobber" => self.noclobber,
            "verbose" => self.verbose,
            "pipefail" => self.pipefail,
            _ => return None,
        })
    }

    /// Single-letter flags for `$-`
    pub fn flags(&self) -> String {
        OPTION_NAMES
            .iter()
            .filter_map(|(name, flag)| match (flag, self.get_named(name)) {
                (Some(f), Some(true)) => Some(*f),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Environment {
    scopes: Vec<Scope>,
    pub positional: Vec<String>,
    pub options: Options,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            scopes: vec![Scope {
                kind: ScopeKind::Global,
                vars: HashMap::new(),
            }],
            positional: Vec::new(),
            options: Options::default(),
        }
    }

    /// Seed from the process environment; everything imported is exported
    pub fn from_process() -> Self {
        let mut env = Self::new();
        for (name, value) in std::env::vars() {
            let mut var = Variable::scalar(value);
            var.exported = true;
            env.scopes[0].vars.insert(name, Some(var));
        }
        env
    }

    pub fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            vars: HashMap::new(),
        });
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn in_function(&self) -> bool {
        self.scopes.iter().any(|s| s.kind == ScopeKind::Function)
    }

    /// Index of the nearest scope that declares `name`
    fn owner(&self, name: &str) -> Option<usize> {
        self.scopes.iter().rposition(|s| s.vars.contains_key(name))
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        let idx = self.owner(name)?;
        self.scopes[idx].vars.get(name).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        let idx = self.owner(name)?;
        self.scopes[idx].vars.get_mut(name).and_then(Option::as_mut)
    }

    pub fn get_scalar(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|v| v.value.as_scalar())
            .map(str::to_string)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Slot for a write: the nearest declaration, or a new global
    fn slot(&mut self, name: &str) -> Result<&mut Option<Variable>, EnvError> {
        let idx = self.owner(name).unwrap_or(0);
        let slot = self.scopes[idx].vars.entry(name.to_string()).or_insert(None);
        if slot.as_ref().is_some_and(|v| v.readonly) {
            return Err(EnvError::Readonly(name.to_string()));
        }
        Ok(slot)
    }

    pub fn set_scalar(&mut self, name: &str, value: impl Into<String>) -> Result<(), EnvError> {
        let value = value.into();
        let slot = self.slot(name)?;
        match slot {
            Some(Variable {
                value: Value::Array(items),
                ..
            }) => {
                items.insert(0, value);
            }
            Some(var) => var.value = Value::Scalar(value),
            None => *slot = Some(Variable::scalar(value)),
        }
        Ok(())
    }

    pub fn append_scalar(&mut self, name: &str, suffix: &str) -> Result<(), EnvError> {
        let current = self.get_scalar(name).unwrap_or_default();
        self.set_scalar(name, current + suffix)
    }

    /// Assign `name[index]`, turning a scalar into an array
    pub fn set_element(&mut self, name: &str, index: usize, value: String) -> Result<(), EnvError> {
        let slot = self.slot(name)?;
        match slot {
            Some(Variable {
                value: Value::Array(items),
                ..
            }) => {
                items.insert(index, value);
            }
            Some(var) => {
                let mut items = BTreeMap::new();
                if let Value::Scalar(old) = &var.value {
                    items.insert(0, old.clone());
                }
                items.insert(index, value);
                var.value = Value::Array(items);
            }
            None => {
                let mut items = BTreeMap::new();
                items.insert(index, value);
                *slot = Some(Variable {
                    value: Value::Array(items),
                    exported: false,
                    readonly: false,
                });
            }
        }
        Ok(())
    }

    pub fn get_element(&self, name: &str, index: usize) -> Option<String> {
        match &self.get(name)?.value {
            Value::Array(items) => items.get(&index).cloned(),
            Value::Scalar(s) => (index == 0).then(|| s.clone()),
        }
    }

    /// Replace (or with `append`, extend) a whole array
    pub fn set_array(
        &mut self,
        name: &str,
        items: BTreeMap<usize, String>,
        append: bool,
    ) -> Result<(), EnvError> {
        let slot = self.slot(name)?;
        let merged = match (append, slot.as_ref().map(|v| &v.value)) {
            (true, Some(Value::Array(old))) => {
                let mut merged = old.clone();
                let base = old.keys().next_back().map_or(0, |k| k + 1);
                merged.extend(items.into_iter().map(|(k, v)| (k + base, v)));
                merged
            }
            (true, Some(Value::Scalar(old))) => {
                let mut merged = BTreeMap::new();
                merged.insert(0, old.clone());
                merged.extend(items.into_iter().map(|(k, v)| (k + 1, v)));
                merged
            }
            _ => items,
        };
        match slot {
            Some(var) => var.value = Value::Array(merged),
            None => {
                *slot = Some(Variable {
                    value: Value::Array(merged),
                    exported: false,
                    readonly: false,
                })
            }
        }
        Ok(())
    }

    /// Highest index plus one, used by `a+=(x)` and `a[${#a[@]}]`
    pub fn next_index(&self, name: &str) -> usize {
        match self.get(name).map(|v| &v.value) {
            Some(Value::Array(items)) => items.keys().next_back().map_or(0, |k| k + 1),
            Some(Value::Scalar(_)) => 1,
            None => 0,
        }
    }

    pub fn unset(&mut self, name: &str) -> Result<(), EnvError> {
        let Some(idx) = self.owner(name) else {
            return Ok(());
        };
        let scope = &mut self.scopes[idx];
        if let Some(Some(var)) = scope.vars.get(name) {
            if var.readonly {
                return Err(EnvError::Readonly(name.to_string()));
            }
        }
        if scope.kind == ScopeKind::Global {
            scope.vars.remove(name);
        } else {
            // Stay declared so the outer binding remains hidden
            scope.vars.insert(name.to_string(), None);
        }
        Ok(())
    }

    pub fn unset_element(&mut self, name: &str, index: usize) -> Result<(), EnvError> {
        match self.get_mut(name) {
            Some(var) if var.readonly => Err(EnvError::Readonly(name.to_string())),
            Some(Variable {
                value: Value::Array(items),
                ..
            }) => {
                items.remove(&index);
                Ok(())
            }
            Some(_) if index == 0 => self.unset(name),
            _ => Ok(()),
        }
    }

    /// Declare `name` in the innermost function scope
    pub fn declare_local(&mut self, name: &str, value: Option<Value>) -> Result<(), EnvError> {
        let idx = self
            .scopes
            .iter()
            .rposition(|s| s.kind == ScopeKind::Function)
            .ok_or(EnvError::NotInFunction)?;
        let scope = &mut self.scopes[idx];
        if let Some(Some(var)) = scope.vars.get(name) {
            if var.readonly {
                return Err(EnvError::Readonly(name.to_string()));
            }
        }
        match value {
            Some(value) => {
                scope.vars.insert(
                    name.to_string(),
                    Some(Variable {
                        value,
                        exported: false,
                        readonly: false,
                    }),
                );
            }
            None => {
                scope.vars.entry(name.to_string()).or_insert(None);
            }
        }
        Ok(())
    }

    /// Bind a name in the top (temporary) scope without touching outer ones
    pub fn set_temporary(&mut self, name: &str, value: String) {
        if let Some(scope) = self.scopes.last_mut() {
            let mut var = Variable::scalar(value);
            var.exported = true;
            scope.vars.insert(name.to_string(), Some(var));
        }
    }

    pub fn set_exported(&mut self, name: &str, exported: bool) {
        if let Some(var) = self.get_mut(name) {
            var.exported = exported;
        } else if exported {
            // `export NAME` before assignment: declare it empty
            let slot = &mut self.scopes[0].vars;
            let mut var = Variable::scalar(String::new());
            var.exported = true;
            slot.insert(name.to_string(), Some(var));
        }
    }

    pub fn set_readonly(&mut self, name: &str) {
        if let Some(var) = self.get_mut(name) {
            var.readonly = true;
        } else {
            let mut var = Variable::scalar(String::new());
            var.readonly = true;
            self.scopes[0].vars.insert(name.to_string(), Some(var));
        }
    }

    /// Every visible variable, innermost binding winning, sorted by name
    pub fn visible(&self) -> BTreeMap<String, &Variable> {
        let mut out = BTreeMap::new();
        for scope in &self.scopes {
            for (name, var) in &scope.vars {
                match var {
                    Some(var) => {
                        out.insert(name.clone(), var);
                    }
                    None => {
                        out.remove(name);
                    }
                }
            }
        }
        out
    }

    /// `NAME=value` pairs handed to child processes. Arrays pass their
    /// first element.
    pub fn child_environment(&self) -> Vec<(String, String)> {
        self.visible()
            .into_iter()
            .filter_map(|(name, var)| var.value.as_scalar().map(|v| (name, v.to_string())))
            .collect()
    }
}

/// Arithmetic reads and writes shell variables directly
impl ArithContext for Environment {
    fn lookup(&mut self, name: &str, index: Option<i64>) -> Option<String> {
        match index {
            None => self.get_scalar(name),
            Some(i) => usize::try_from(i).ok().and_then(|i| self.get_element(name, i)),
        }
    }

    fn assign(&mut self, name: &str, index: Option<i64>, value: i64) -> Result<(), ArithError> {
        let result = match index {
            None => self.set_scalar(name, value.to_string()),
            Some(i) => {
                let i = usize::try_from(i).map_err(|_| ArithError::Assign {
                    name: name.to_string(),
                    message: "bad array subscript".to_string(),
                })?;
                self.set_element(name, i, value.to_string())
            }
        };
        result.map_err(|e| ArithError::Assign {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_scalar() {
        let mut env = Environment::new();
        env.set_scalar("x", "1").unwrap();
        assert_eq!(env.get_scalar("x"), Some("1".to_string()));
        env.append_scalar("x", "2").unwrap();
        assert_eq!(env.get_scalar("x"), Some("12".to_string()));
    }

    #[test]
    fn test_function_scope_shadows_and_restores() {
        let mut env = Environment::new();
        env.set_scalar("x", "outer").unwrap();
        env.set_scalar("y", "seen").unwrap();
        env.push_scope(ScopeKind::Function);
        env.declare_local("x", Some(Value::Scalar("inner".into()))).unwrap();
        assert_eq!(env.get_scalar("x").as_deref(), Some("inner"));
        assert_eq!(env.get_scalar("y").as_deref(), Some("seen"));
        // Not declared local: writes through to the global
        env.set_scalar("y", "changed").unwrap();
        env.pop_scope();
        assert_eq!(env.get_scalar("x").as_deref(), Some("outer"));
        assert_eq!(env.get_scalar("y").as_deref(), Some("changed"));
    }

    #[test]
    fn test_local_outside_function() {
        let mut env = Environment::new();
        assert_eq!(env.declare_local("x", None), Err(EnvError::NotInFunction));
    }

    #[test]
    fn test_unset_local_hides_global() {
        let mut env = Environment::new();
        env.set_scalar("x", "global").unwrap();
        env.push_scope(ScopeKind::Function);
        env.declare_local("x", Some(Value::Scalar("l".into()))).unwrap();
        env.unset("x").unwrap();
        assert_eq!(env.get_scalar("x"), None);
        env.pop_scope();
        assert_eq!(env.get_scalar("x").as_deref(), Some("global"));
    }

    #[test]
    fn test_sparse_array() {
        let mut env = Environment::new();
        env.set_element("a", 0, "zero".into()).unwrap();
        env.set_element("a", 5, "five".into()).unwrap();
        let var = env.get("a").unwrap();
        assert_eq!(var.value.elements(), vec!["zero", "five"]);
        assert_eq!(var.value.keys(), vec![0, 5]);
        assert_eq!(env.next_index("a"), 6);
        assert_eq!(env.get_scalar("a").as_deref(), Some("zero"));
    }

    #[test]
    fn test_scalar_becomes_array() {
        let mut env = Environment::new();
        env.set_scalar("a", "first").unwrap();
        env.set_element("a", 2, "third".into()).unwrap();
        assert_eq!(env.get("a").unwrap().value.elements(), vec!["first", "third"]);
    }

    #[test]
    fn test_array_append() {
        let mut env = Environment::new();
        let items: BTreeMap<_, _> = [(0, "a".to_string()), (1, "b".to_string())].into();
        env.set_array("arr", items, false).unwrap();
        let more: BTreeMap<_, _> = [(0, "c".to_string())].into();
        env.set_array("arr", more, true).unwrap();
        assert_eq!(env.get("arr").unwrap().value.elements(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_readonly_rejects_writes() {
        let mut env = Environment::new();
        env.set_scalar("r", "1").unwrap();
        env.set_readonly("r");
        assert_eq!(env.set_scalar("r", "2"), Err(EnvError::Readonly("r".into())));
        assert!(env.unset("r").is_err());
    }

    #[test]
    fn test_option_flags() {
        let mut opts = Options::default();
        assert!(opts.set_flag('e', true));
        assert!(opts.set_flag('x', true));
        assert!(!opts.set_flag('q', true));
        assert!(opts.set_named("pipefail", true));
        assert_eq!(opts.flags(), "ex");
    }

    #[test]
    fn test_arith_context_assign() {
        let mut env = Environment::new();
        let value = crate::arith::evaluate("i = 2 + 3", &mut env).unwrap();
        assert_eq!(value, 5);
        assert_eq!(env.get_scalar("i").as_deref(), Some("5"));
    }
}
