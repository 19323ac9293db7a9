//! Binary encoding of terms and rewrite steps.
//!
//! Terms are written as tagged nodes. An extension node is written as its argument count, its
//! arguments, its opcode, and finally its payload; decoding dispatches on the opcode through an
//! [ExtRegistry].

use std::collections::HashMap;

use thiserror::Error;

use crate::ext::{mk_let, mk_let_value, LET_OPCODE, LET_VALUE_OPCODE};
use crate::step::{
    read_rewrite_element, read_rewrite_fold, read_rewrite_reduce, read_rewrite_unfold, Location,
    Occurrence, StepError, REWRITE_ELEMENT_OPCODE, REWRITE_FOLD_OPCODE, REWRITE_REDUCE_OPCODE,
    REWRITE_UNFOLD_OPCODE,
};
use crate::tt::{
    mk_app, mk_const, mk_lam, mk_level_imax, mk_level_max, mk_level_param, mk_level_succ,
    mk_local, mk_meta, mk_pi, mk_slot, mk_sort, mk_var, BinderInfo, Id, Level, Name, Term,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("corrupted stream: '{opcode}' does not take {arity} arguments")]
    CorruptedStream { opcode: String, arity: usize },
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),
    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },
    #[error("invalid UTF-8 in stream")]
    InvalidUtf8,
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
    #[error("identifier {0} is out of range")]
    InvalidId(usize),
    #[error("terms nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("term is not a rewrite step")]
    NotAStep,
    #[error(transparent)]
    Malformed(#[from] StepError),
}

/// Nesting bound for terms and levels read from a stream.
pub const MAX_DEPTH: usize = 256;

const TERM_VAR: u8 = 0;
const TERM_SORT: u8 = 1;
const TERM_CONST: u8 = 2;
const TERM_LOCAL: u8 = 3;
const TERM_META: u8 = 4;
const TERM_SLOT: u8 = 5;
const TERM_APP: u8 = 6;
const TERM_LAM: u8 = 7;
const TERM_PI: u8 = 8;
const TERM_EXT: u8 = 9;

const LEVEL_ZERO: u8 = 0;
const LEVEL_SUCC: u8 = 1;
const LEVEL_MAX: u8 = 2;
const LEVEL_IMAX: u8 = 3;
const LEVEL_PARAM: u8 = 4;
const LEVEL_META: u8 = 5;
const LEVEL_SLOT: u8 = 6;

const LOCATION_GOAL: u8 = 0;
const LOCATION_TARGETS: u8 = 1;
const LOCATION_EVERYWHERE: u8 = 2;

#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder::default()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_usize(&mut self, v: usize) {
        self.buf.extend_from_slice(&(v as u64).to_le_bytes());
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_usize(s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_name(&mut self, name: &Name) {
        self.write_str(name.as_str());
    }

    fn write_binder(&mut self, binder: BinderInfo) {
        self.write_u8(match binder {
            BinderInfo::Default => 0,
            BinderInfo::Implicit => 1,
            BinderInfo::InstImplicit => 2,
        });
    }

    pub fn write_level(&mut self, l: &Level) {
        match l {
            Level::Zero => self.write_u8(LEVEL_ZERO),
            Level::Succ(l) => {
                self.write_u8(LEVEL_SUCC);
                self.write_level(l);
            }
            Level::Max(inner) => {
                self.write_u8(LEVEL_MAX);
                self.write_level(&inner.0);
                self.write_level(&inner.1);
            }
            Level::IMax(inner) => {
                self.write_u8(LEVEL_IMAX);
                self.write_level(&inner.0);
                self.write_level(&inner.1);
            }
            Level::Param(name) => {
                self.write_u8(LEVEL_PARAM);
                self.write_name(name);
            }
            Level::Meta(id) => {
                self.write_u8(LEVEL_META);
                self.write_usize(id.raw());
            }
            Level::Slot(index) => {
                self.write_u8(LEVEL_SLOT);
                self.write_usize(*index);
            }
        }
    }

    pub fn write_term(&mut self, t: &Term) {
        match t {
            Term::Var(inner) => {
                self.write_u8(TERM_VAR);
                self.write_usize(inner.index);
            }
            Term::Sort(inner) => {
                self.write_u8(TERM_SORT);
                self.write_level(&inner.level);
            }
            Term::Const(inner) => {
                self.write_u8(TERM_CONST);
                self.write_name(&inner.name);
                self.write_usize(inner.levels.len());
                for l in &inner.levels {
                    self.write_level(l);
                }
            }
            Term::Local(inner) => {
                self.write_u8(TERM_LOCAL);
                self.write_usize(inner.id.raw());
                self.write_name(&inner.pp_name);
                self.write_binder(inner.binder);
                self.write_term(&inner.ty);
            }
            Term::Meta(inner) => {
                self.write_u8(TERM_META);
                self.write_usize(inner.id.raw());
                self.write_term(&inner.ty);
            }
            Term::Slot(inner) => {
                self.write_u8(TERM_SLOT);
                self.write_usize(inner.index);
            }
            Term::App(inner) => {
                self.write_u8(TERM_APP);
                self.write_term(&inner.fun);
                self.write_term(&inner.arg);
            }
            Term::Lam(inner) | Term::Pi(inner) => {
                self.write_u8(if matches!(t, Term::Lam(_)) { TERM_LAM } else { TERM_PI });
                self.write_name(&inner.name);
                self.write_binder(inner.binder);
                self.write_term(&inner.dom);
                self.write_term(&inner.body);
            }
            Term::Ext(inner) => {
                self.write_u8(TERM_EXT);
                self.write_usize(inner.args.len());
                for arg in &inner.args {
                    self.write_term(arg);
                }
                self.write_str(inner.def.opcode());
                inner.def.write(self);
            }
        }
    }

    pub fn write_occurrence(&mut self, occ: &Occurrence) {
        match occ {
            Occurrence::All => self.write_u8(0),
            Occurrence::Only(set) => {
                self.write_u8(1);
                self.write_usize(set.len());
                for &i in set {
                    self.write_u32(i);
                }
            }
        }
    }

    pub fn write_location(&mut self, loc: &Location) {
        match loc {
            Location::GoalOnly(occ) => {
                self.write_u8(LOCATION_GOAL);
                self.write_occurrence(occ);
            }
            Location::Targets { hyps, goal } => {
                self.write_u8(LOCATION_TARGETS);
                self.write_usize(hyps.len());
                for (name, occ) in hyps {
                    self.write_name(name);
                    self.write_occurrence(occ);
                }
                self.write_bool(goal.is_some());
                if let Some(occ) = goal {
                    self.write_occurrence(occ);
                }
            }
            Location::Everywhere(occ) => {
                self.write_u8(LOCATION_EVERYWHERE);
                self.write_occurrence(occ);
            }
        }
    }
}

/// Reads the payload of an extension node whose arguments have already been decoded.
pub type ExtReader = fn(&mut Decoder<'_>, Vec<Term>) -> Result<Term, CodecError>;

/// Deserializers for extension nodes, keyed by opcode.
#[derive(Debug, Clone, Default)]
pub struct ExtRegistry {
    readers: HashMap<&'static str, ExtReader>,
}

impl ExtRegistry {
    pub fn new() -> ExtRegistry {
        ExtRegistry::default()
    }

    /// The let annotations and the four rewrite steps.
    pub fn with_builtins() -> ExtRegistry {
        let mut registry = ExtRegistry::new();
        registry.register(LET_VALUE_OPCODE, read_let_value);
        registry.register(LET_OPCODE, read_let);
        registry.register(REWRITE_ELEMENT_OPCODE, read_rewrite_element);
        registry.register(REWRITE_UNFOLD_OPCODE, read_rewrite_unfold);
        registry.register(REWRITE_FOLD_OPCODE, read_rewrite_fold);
        registry.register(REWRITE_REDUCE_OPCODE, read_rewrite_reduce);
        registry
    }

    pub fn register(&mut self, opcode: &'static str, reader: ExtReader) {
        self.readers.insert(opcode, reader);
    }

    pub fn get(&self, opcode: &str) -> Option<ExtReader> {
        self.readers.get(opcode).copied()
    }
}

fn read_let_value(_dec: &mut Decoder<'_>, mut args: Vec<Term>) -> Result<Term, CodecError> {
    if args.len() != 1 {
        return Err(CodecError::CorruptedStream {
            opcode: LET_VALUE_OPCODE.to_owned(),
            arity: args.len(),
        });
    }
    Ok(mk_let_value(args.remove(0)))
}

fn read_let(dec: &mut Decoder<'_>, args: Vec<Term>) -> Result<Term, CodecError> {
    let [value, body] = <[Term; 2]>::try_from(args).map_err(|args| CodecError::CorruptedStream {
        opcode: LET_OPCODE.to_owned(),
        arity: args.len(),
    })?;
    let var_name = dec.read_name()?;
    Ok(mk_let(var_name, value, body))
}

pub struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
    registry: &'a ExtRegistry,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8], registry: &'a ExtRegistry) -> Decoder<'a> {
        Decoder {
            input,
            pos: 0,
            depth: 0,
            registry,
        }
    }

    /// Fails unless the whole input has been consumed.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.input.len() - self.pos {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::UnexpectedEof)?;
        let bytes = self
            .input
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::InvalidTag { what: "bool", tag }),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_usize(&mut self) -> Result<usize, CodecError> {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(self.take(8)?);
        usize::try_from(u64::from_le_bytes(bytes)).map_err(|_| CodecError::UnexpectedEof)
    }

    pub fn read_str(&mut self) -> Result<&'a str, CodecError> {
        let len = self.read_usize()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_name(&mut self) -> Result<Name, CodecError> {
        Ok(Name::from_str(self.read_str()?))
    }

    fn read_binder(&mut self) -> Result<BinderInfo, CodecError> {
        match self.read_u8()? {
            0 => Ok(BinderInfo::Default),
            1 => Ok(BinderInfo::Implicit),
            2 => Ok(BinderInfo::InstImplicit),
            tag => Err(CodecError::InvalidTag { what: "binder", tag }),
        }
    }

    fn read_id(&mut self) -> Result<Id, CodecError> {
        let raw = self.read_usize()?;
        Id::from_raw(raw).ok_or(CodecError::InvalidId(raw))
    }

    fn nested<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep);
        }
        self.depth += 1;
        let r = read(self);
        self.depth -= 1;
        r
    }

    pub fn read_level(&mut self) -> Result<Level, CodecError> {
        self.nested(Self::read_level_node)
    }

    fn read_level_node(&mut self) -> Result<Level, CodecError> {
        match self.read_u8()? {
            LEVEL_ZERO => Ok(Level::Zero),
            LEVEL_SUCC => Ok(mk_level_succ(self.read_level()?)),
            LEVEL_MAX => {
                let l1 = self.read_level()?;
                let l2 = self.read_level()?;
                Ok(mk_level_max(l1, l2))
            }
            LEVEL_IMAX => {
                let l1 = self.read_level()?;
                let l2 = self.read_level()?;
                Ok(mk_level_imax(l1, l2))
            }
            LEVEL_PARAM => Ok(mk_level_param(self.read_name()?)),
            LEVEL_META => Ok(Level::Meta(self.read_id()?)),
            LEVEL_SLOT => Ok(Level::Slot(self.read_usize()?)),
            tag => Err(CodecError::InvalidTag { what: "level", tag }),
        }
    }

    pub fn read_term(&mut self) -> Result<Term, CodecError> {
        self.nested(Self::read_term_node)
    }

    fn read_term_node(&mut self) -> Result<Term, CodecError> {
        match self.read_u8()? {
            TERM_VAR => Ok(mk_var(self.read_usize()?)),
            TERM_SORT => Ok(mk_sort(self.read_level()?)),
            TERM_CONST => {
                let name = self.read_name()?;
                let len = self.read_usize()?;
                let mut levels = Vec::new();
                for _ in 0..len {
                    levels.push(self.read_level()?);
                }
                Ok(mk_const(name, levels))
            }
            TERM_LOCAL => {
                let id = self.read_id()?;
                let pp_name = self.read_name()?;
                let binder = self.read_binder()?;
                let ty = self.read_term()?;
                Ok(mk_local(id, pp_name, ty, binder))
            }
            TERM_META => {
                let id = self.read_id()?;
                let ty = self.read_term()?;
                Ok(mk_meta(id, ty))
            }
            TERM_SLOT => Ok(mk_slot(self.read_usize()?)),
            TERM_APP => {
                let fun = self.read_term()?;
                let arg = self.read_term()?;
                Ok(mk_app(fun, arg))
            }
            tag @ (TERM_LAM | TERM_PI) => {
                let name = self.read_name()?;
                let binder = self.read_binder()?;
                let dom = self.read_term()?;
                let body = self.read_term()?;
                Ok(if tag == TERM_LAM {
                    mk_lam(name, binder, dom, body)
                } else {
                    mk_pi(name, binder, dom, body)
                })
            }
            TERM_EXT => {
                let len = self.read_usize()?;
                let mut args = Vec::new();
                for _ in 0..len {
                    args.push(self.read_term()?);
                }
                let opcode = self.read_str()?;
                let Some(reader) = self.registry.get(opcode) else {
                    return Err(CodecError::UnknownOpcode(opcode.to_owned()));
                };
                reader(self, args)
            }
            tag => Err(CodecError::InvalidTag { what: "term", tag }),
        }
    }

    pub fn read_occurrence(&mut self) -> Result<Occurrence, CodecError> {
        match self.read_u8()? {
            0 => Ok(Occurrence::All),
            1 => {
                let len = self.read_usize()?;
                let mut set = std::collections::BTreeSet::new();
                for _ in 0..len {
                    set.insert(self.read_u32()?);
                }
                Ok(Occurrence::Only(set))
            }
            tag => Err(CodecError::InvalidTag {
                what: "occurrence",
                tag,
            }),
        }
    }

    pub fn read_location(&mut self) -> Result<Location, CodecError> {
        match self.read_u8()? {
            LOCATION_GOAL => Ok(Location::GoalOnly(self.read_occurrence()?)),
            LOCATION_TARGETS => {
                let len = self.read_usize()?;
                let mut hyps = Vec::new();
                for _ in 0..len {
                    let name = self.read_name()?;
                    let occ = self.read_occurrence()?;
                    hyps.push((name, occ));
                }
                let goal = if self.read_bool()? {
                    Some(self.read_occurrence()?)
                } else {
                    None
                };
                Ok(Location::targets(hyps, goal)?)
            }
            LOCATION_EVERYWHERE => Ok(Location::Everywhere(self.read_occurrence()?)),
            tag => Err(CodecError::InvalidTag {
                what: "location",
                tag,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::mk_let;
    use crate::step::{Multiplicity, RewriteElement, RewriteStep};
    use crate::tt::{mk_fresh_local, mk_lambda_locals, mk_level_one};

    fn c(name: &str) -> Term {
        mk_const(Name::from_str(name), vec![])
    }

    fn decode_term(bytes: &[u8]) -> Result<Term, CodecError> {
        let registry = ExtRegistry::with_builtins();
        let mut dec = Decoder::new(bytes, &registry);
        let t = dec.read_term()?;
        dec.finish()?;
        Ok(t)
    }

    #[test]
    fn terms_round_trip() {
        let x = mk_fresh_local(Name::from_str("x"), c("nat"));
        let body = mk_let(Name::from_str("y"), x.clone(), mk_app(c("succ"), x.clone()));
        let t = mk_lambda_locals(&[x], &body);
        let t = mk_app(t, mk_sort(mk_level_succ(mk_level_one())));
        let mut enc = Encoder::new();
        enc.write_term(&t);
        assert_eq!(decode_term(&enc.finish()).unwrap(), t);
    }

    #[test]
    fn steps_round_trip() {
        let registry = ExtRegistry::with_builtins();
        let h = Name::from_str("h");
        let location = Location::targets(vec![(h, Occurrence::only([1, 3]))], Some(Occurrence::All))
            .unwrap();
        let steps = [
            RewriteStep::Rewrite(RewriteElement {
                multiplicity: Multiplicity::ExactlyN(0),
                location: location.clone(),
                ..RewriteElement::new(c("add_zero"))
            }),
            RewriteStep::Rewrite(RewriteElement {
                pattern: Some(c("p")),
                symm: true,
                multiplicity: Multiplicity::AtMostN(1),
                ..RewriteElement::new(c("add_comm"))
            }),
            RewriteStep::Unfold {
                names: vec![Name::from_str("double"), Name::from_str("one")],
                location: Location::Everywhere(Occurrence::only([2])),
            },
            RewriteStep::Fold {
                term: c("two"),
                location,
            },
            RewriteStep::Reduce {
                to: Some(c("zero")),
                location: Location::goal(),
            },
        ];
        for step in steps {
            let bytes = step.encode();
            assert_eq!(RewriteStep::decode(&bytes, &registry).unwrap(), step);
        }
    }

    #[test]
    fn wrong_arity_is_a_corrupted_stream() {
        let step = RewriteStep::Reduce {
            to: None,
            location: Location::goal(),
        };
        let mut bytes = step.encode();
        // claim two arguments and prepend them
        let mut enc = Encoder::new();
        enc.write_u8(TERM_EXT);
        enc.write_usize(2);
        enc.write_term(&c("a"));
        enc.write_term(&c("b"));
        let header = 1 + 8;
        let mut forged = enc.finish();
        forged.extend_from_slice(&bytes.split_off(header));
        let registry = ExtRegistry::with_builtins();
        let err = RewriteStep::decode(&forged, &registry).unwrap_err();
        assert_eq!(
            err,
            CodecError::CorruptedStream {
                opcode: "RWR".to_owned(),
                arity: 2,
            }
        );
        insta::assert_snapshot!(err, @"corrupted stream: 'RWR' does not take 2 arguments");
    }

    #[test]
    fn unknown_opcode_and_truncation() {
        let step = RewriteStep::Fold {
            term: c("two"),
            location: Location::goal(),
        };
        let bytes = step.encode();
        let empty = ExtRegistry::new();
        assert_eq!(
            RewriteStep::decode(&bytes, &empty).unwrap_err(),
            CodecError::UnknownOpcode("RWF".to_owned())
        );
        let registry = ExtRegistry::with_builtins();
        assert_eq!(
            RewriteStep::decode(&bytes[..bytes.len() - 1], &registry).unwrap_err(),
            CodecError::UnexpectedEof
        );
        let mut longer = bytes.clone();
        longer.push(0);
        assert_eq!(
            RewriteStep::decode(&longer, &registry).unwrap_err(),
            CodecError::TrailingBytes(1)
        );
        let mut enc = Encoder::new();
        enc.write_term(&c("two"));
        assert_eq!(
            RewriteStep::decode(&enc.finish(), &registry).unwrap_err(),
            CodecError::NotAStep
        );
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let registry = ExtRegistry::with_builtins();
        let mut meta = vec![TERM_META];
        meta.extend([0xff; 8]);
        meta.extend([TERM_SORT, LEVEL_ZERO]);
        assert_eq!(
            Decoder::new(&meta, &registry).read_term().unwrap_err(),
            CodecError::InvalidId(usize::MAX)
        );
        let mut level = vec![TERM_SORT, LEVEL_META];
        level.extend([0xff; 8]);
        assert_eq!(
            Decoder::new(&level, &registry).read_term().unwrap_err(),
            CodecError::InvalidId(usize::MAX)
        );
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let registry = ExtRegistry::with_builtins();
        assert_eq!(
            RewriteStep::decode(&vec![TERM_APP; 2_000_000], &registry).unwrap_err(),
            CodecError::TooDeep
        );
        let mut succs = vec![TERM_SORT];
        succs.extend([LEVEL_SUCC; 1000]);
        succs.push(LEVEL_ZERO);
        assert_eq!(
            Decoder::new(&succs, &registry).read_term().unwrap_err(),
            CodecError::TooDeep
        );

        let mut t = c("two");
        for _ in 0..MAX_DEPTH - 2 {
            t = mk_app(c("succ"), t);
        }
        let mut enc = Encoder::new();
        enc.write_term(&t);
        let bytes = enc.finish();
        let mut dec = Decoder::new(&bytes, &registry);
        assert_eq!(dec.read_term().unwrap(), t);
        dec.finish().unwrap();
    }
}
