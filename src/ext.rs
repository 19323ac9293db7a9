//! Extension nodes: terms whose meaning is given by an [Extension] implementation.

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{bail, ensure};

use crate::codec::Encoder;
use crate::tt::{Id, Name, Term};

pub trait Extension: Any + Send + Sync + Debug {
    /// Stable name of the node kind.
    fn name(&self) -> &'static str;

    /// Tag written in front of the payload by the codec.
    fn opcode(&self) -> &'static str;

    /// Type of the node `[self args]`. `infer` computes types of subterms.
    fn get_type(
        &self,
        args: &[Term],
        infer: &mut dyn FnMut(&Term) -> anyhow::Result<Term>,
    ) -> anyhow::Result<Term>;

    /// One-step unfolding of the node, if it has any computational meaning.
    fn expand(&self, args: &[Term]) -> Option<Term>;

    /// Writes the payload. The opcode and arguments are written by the caller.
    fn write(&self, enc: &mut Encoder);

    fn ext_eq(&self, other: &dyn Extension) -> bool;

    fn hash_code(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone, Debug)]
pub struct ExtDef(Arc<dyn Extension>);

impl ExtDef {
    pub fn new(ext: impl Extension) -> ExtDef {
        ExtDef(Arc::new(ext))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn opcode(&self) -> &'static str {
        self.0.opcode()
    }

    pub fn get_type(
        &self,
        args: &[Term],
        infer: &mut dyn FnMut(&Term) -> anyhow::Result<Term>,
    ) -> anyhow::Result<Term> {
        self.0.get_type(args, infer)
    }

    pub fn expand(&self, args: &[Term]) -> Option<Term> {
        self.0.expand(args)
    }

    pub fn write(&self, enc: &mut Encoder) {
        self.0.write(enc)
    }

    pub fn downcast_ref<T: Extension>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for ExtDef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.ext_eq(other.0.as_ref())
    }
}

impl Eq for ExtDef {}

impl Hash for ExtDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
        self.0.hash_code().hash(state);
    }
}

/// Hashes a payload with the standard hasher, for [Extension::hash_code].
pub fn hash_payload(payload: &(impl Hash + ?Sized)) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

pub const LET_VALUE_OPCODE: &str = "LetV";
pub const LET_OPCODE: &str = "Let";

/// `letv e`: a shared let-bound value. Each annotation is distinct from every other one.
#[derive(Debug, Clone)]
pub struct LetValue {
    id: Id,
}

impl LetValue {
    pub fn fresh() -> LetValue {
        LetValue { id: Id::fresh() }
    }
}

impl Extension for LetValue {
    fn name(&self) -> &'static str {
        "letv"
    }

    fn opcode(&self) -> &'static str {
        LET_VALUE_OPCODE
    }

    fn get_type(
        &self,
        args: &[Term],
        infer: &mut dyn FnMut(&Term) -> anyhow::Result<Term>,
    ) -> anyhow::Result<Term> {
        ensure!(args.len() == 1, "invalid let-value expression");
        infer(&args[0])
    }

    fn expand(&self, args: &[Term]) -> Option<Term> {
        args.first().cloned()
    }

    fn write(&self, _enc: &mut Encoder) {}

    fn ext_eq(&self, other: &dyn Extension) -> bool {
        other
            .as_any()
            .downcast_ref::<LetValue>()
            .is_some_and(|other| other.id == self.id)
    }

    fn hash_code(&self) -> u64 {
        self.id.raw() as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `let x := v in b`, where `b` already has `v` (wrapped in [LetValue]) substituted for `x`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Let {
    pub var_name: Name,
}

impl Extension for Let {
    fn name(&self) -> &'static str {
        "let"
    }

    fn opcode(&self) -> &'static str {
        LET_OPCODE
    }

    fn get_type(
        &self,
        args: &[Term],
        infer: &mut dyn FnMut(&Term) -> anyhow::Result<Term>,
    ) -> anyhow::Result<Term> {
        if args.len() != 2 {
            bail!("invalid let expression");
        }
        infer(&args[1])
    }

    fn expand(&self, args: &[Term]) -> Option<Term> {
        args.get(1).cloned()
    }

    fn write(&self, enc: &mut Encoder) {
        enc.write_name(&self.var_name);
    }

    fn ext_eq(&self, other: &dyn Extension) -> bool {
        other.as_any().downcast_ref::<Let>() == Some(self)
    }

    fn hash_code(&self) -> u64 {
        hash_payload(self.var_name.as_str())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn mk_let_value(value: Term) -> Term {
    crate::tt::mk_ext(ExtDef::new(LetValue::fresh()), vec![value])
}

pub fn mk_let(var_name: Name, value: Term, body: Term) -> Term {
    crate::tt::mk_ext(ExtDef::new(Let { var_name }), vec![value, body])
}
