//! Tactic options: `rewriter.max_iter`, `rewriter.syntactic`, and `rewriter.trace`.

use std::collections::BTreeMap;
use std::fmt::Display;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const MAX_ITER: &str = "rewriter.max_iter";
pub const SYNTACTIC: &str = "rewriter.syntactic";
pub const TRACE: &str = "rewriter.trace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Unsigned(u32),
}

impl OptionValue {
    fn kind(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "a Boolean",
            OptionValue::Unsigned(_) => "an unsigned",
        }
    }
}

impl Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Unsigned(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug)]
pub struct OptionDecl {
    pub name: &'static str,
    pub default: OptionValue,
    pub description: &'static str,
}

pub const OPTION_DECLS: &[OptionDecl] = &[
    OptionDecl {
        name: MAX_ITER,
        default: OptionValue::Unsigned(200),
        description: "maximum number of iterations of a repeated rewrite step",
    },
    OptionDecl {
        name: SYNTACTIC,
        default: OptionValue::Bool(false),
        description: "match patterns syntactically, without unfolding reducible definitions",
    },
    OptionDecl {
        name: TRACE,
        default: OptionValue::Bool(true),
        description: "attach matching failures to the error of a failed rewrite step",
    },
];

static OPTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid option name '{0}'")]
    InvalidName(String),
    #[error("unknown option '{0}'")]
    Unknown(String),
    #[error("option '{name}' expects {expected} value, got '{value}'")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        value: String,
    },
}

fn lookup(name: &str) -> Result<&'static OptionDecl, ConfigError> {
    if !OPTION_NAME.is_match(name) {
        return Err(ConfigError::InvalidName(name.to_owned()));
    }
    OPTION_DECLS
        .iter()
        .find(|decl| decl.name == name)
        .ok_or_else(|| ConfigError::Unknown(name.to_owned()))
}

/// Option values set by the user. Unset options read as their defaults.
#[derive(Debug, Clone, Default)]
pub struct Options {
    values: BTreeMap<&'static str, OptionValue>,
}

impl Options {
    pub fn new() -> Options {
        Options::default()
    }

    pub fn set(&mut self, name: &str, value: OptionValue) -> Result<(), ConfigError> {
        let decl = lookup(name)?;
        if decl.default.kind() != value.kind() {
            return Err(ConfigError::TypeMismatch {
                name: name.to_owned(),
                expected: decl.default.kind(),
                value: value.to_string(),
            });
        }
        self.values.insert(decl.name, value);
        Ok(())
    }

    /// Sets an option from its textual form, e.g. `set_str("rewriter.max_iter", "10")`.
    pub fn set_str(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let decl = lookup(name)?;
        let parsed = match decl.default {
            OptionValue::Bool(_) => value.parse().ok().map(OptionValue::Bool),
            OptionValue::Unsigned(_) => value.parse().ok().map(OptionValue::Unsigned),
        };
        let Some(parsed) = parsed else {
            return Err(ConfigError::TypeMismatch {
                name: name.to_owned(),
                expected: decl.default.kind(),
                value: value.to_owned(),
            });
        };
        self.values.insert(decl.name, parsed);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<OptionValue, ConfigError> {
        let decl = lookup(name)?;
        Ok(self.values.get(decl.name).copied().unwrap_or(decl.default))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ConfigError> {
        match self.get(name)? {
            OptionValue::Bool(b) => Ok(b),
            v => Err(ConfigError::TypeMismatch {
                name: name.to_owned(),
                expected: "a Boolean",
                value: v.to_string(),
            }),
        }
    }

    pub fn get_unsigned(&self, name: &str) -> Result<u32, ConfigError> {
        match self.get(name)? {
            OptionValue::Unsigned(n) => Ok(n),
            v => Err(ConfigError::TypeMismatch {
                name: name.to_owned(),
                expected: "an unsigned",
                value: v.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteConfig {
    pub max_iter: u32,
    pub syntactic: bool,
    pub trace: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        RewriteConfig {
            max_iter: 200,
            syntactic: false,
            trace: true,
        }
    }
}

impl RewriteConfig {
    pub fn from_options(options: &Options) -> Result<RewriteConfig, ConfigError> {
        Ok(RewriteConfig {
            max_iter: options.get_unsigned(MAX_ITER)?,
            syntactic: options.get_bool(SYNTACTIC)?,
            trace: options.get_bool(TRACE)?,
        })
    }
}
