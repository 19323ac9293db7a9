//! Rewrite steps, their locations, and their embedding as extension terms.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::Display;

use anyhow::bail;
use thiserror::Error;

use crate::codec::{CodecError, Decoder, Encoder};
use crate::ext::{hash_payload, ExtDef, Extension};
use crate::tt::{mk_ext, Name, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Multiplicity {
    #[default]
    Once,
    AtMostN(u32),
    ExactlyN(u32),
    ZeroOrMore,
    OneOrMore,
}

impl Multiplicity {
    /// Stable index used by the codec, written as a single byte.
    pub fn tag(&self) -> u8 {
        match self {
            Multiplicity::Once => 0,
            Multiplicity::AtMostN(_) => 1,
            Multiplicity::ExactlyN(_) => 2,
            Multiplicity::ZeroOrMore => 3,
            Multiplicity::OneOrMore => 4,
        }
    }

    pub fn count(&self) -> Option<u32> {
        match self {
            Multiplicity::AtMostN(n) | Multiplicity::ExactlyN(n) => Some(*n),
            _ => None,
        }
    }

    pub fn has_count(tag: u8) -> bool {
        tag == 1 || tag == 2
    }

    pub fn from_tag(tag: u8, count: Option<u32>) -> Option<Multiplicity> {
        match (tag, count) {
            (0, None) => Some(Multiplicity::Once),
            (1, Some(n)) => Some(Multiplicity::AtMostN(n)),
            (2, Some(n)) => Some(Multiplicity::ExactlyN(n)),
            (3, None) => Some(Multiplicity::ZeroOrMore),
            (4, None) => Some(Multiplicity::OneOrMore),
            _ => None,
        }
    }
}

impl Display for Multiplicity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Multiplicity::Once => Ok(()),
            Multiplicity::AtMostN(n) => write!(f, "{n}?"),
            Multiplicity::ExactlyN(n) => write!(f, "{n}"),
            Multiplicity::ZeroOrMore => write!(f, "*"),
            Multiplicity::OneOrMore => write!(f, "+"),
        }
    }
}

/// Which occurrences of a matched subterm are rewritten, counted from 1 in traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Occurrence {
    #[default]
    All,
    Only(BTreeSet<u32>),
}

impl Occurrence {
    pub fn only(indices: impl IntoIterator<Item = u32>) -> Occurrence {
        Occurrence::Only(indices.into_iter().collect())
    }

    pub fn contains(&self, i: u32) -> bool {
        match self {
            Occurrence::All => true,
            Occurrence::Only(set) => set.contains(&i),
        }
    }
}

impl Display for Occurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Occurrence::All => Ok(()),
            Occurrence::Only(set) => {
                write!(f, " {{")?;
                for (i, n) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{n}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("invalid hypothesis name '{0}', hypothesis names must be atomic")]
    NonAtomicHypothesis(Name),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    GoalOnly(Occurrence),
    /// The listed hypotheses, and the goal if `goal` is set.
    Targets {
        hyps: Vec<(Name, Occurrence)>,
        goal: Option<Occurrence>,
    },
    /// Every hypothesis and the goal.
    Everywhere(Occurrence),
}

impl Default for Location {
    fn default() -> Self {
        Location::GoalOnly(Occurrence::All)
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::GoalOnly(occ) => write!(f, "{occ}"),
            Location::Targets { hyps, goal } => {
                write!(f, " at")?;
                for (name, occ) in hyps {
                    write!(f, " {name}{occ}")?;
                }
                if let Some(occ) = goal {
                    write!(f, " ⊢{occ}")?;
                }
                Ok(())
            }
            Location::Everywhere(occ) => write!(f, " at *{occ}"),
        }
    }
}

impl Location {
    pub fn goal() -> Location {
        Location::default()
    }

    pub fn targets(
        hyps: Vec<(Name, Occurrence)>,
        goal: Option<Occurrence>,
    ) -> Result<Location, StepError> {
        let loc = Location::Targets { hyps, goal };
        loc.validate()?;
        Ok(loc)
    }

    /// The given hypotheses with all occurrences, and not the goal.
    pub fn hyps(names: &[&str]) -> Result<Location, StepError> {
        let hyps = names
            .iter()
            .map(|&name| (Name::from_str(name), Occurrence::All))
            .collect();
        Location::targets(hyps, None)
    }

    pub fn validate(&self) -> Result<(), StepError> {
        if let Location::Targets { hyps, .. } = self {
            for (name, _) in hyps {
                if !name.is_atomic() {
                    return Err(StepError::NonAtomicHypothesis(name.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn is_goal_only(&self) -> bool {
        matches!(self, Location::GoalOnly(_))
    }

    pub fn includes_goal(&self) -> bool {
        self.goal_occurrence().is_some()
    }

    pub fn goal_occurrence(&self) -> Option<&Occurrence> {
        match self {
            Location::GoalOnly(occ) | Location::Everywhere(occ) => Some(occ),
            Location::Targets { goal, .. } => goal.as_ref(),
        }
    }

    pub fn hyp_occurrence(&self, name: &Name) -> Option<&Occurrence> {
        match self {
            Location::GoalOnly(_) => None,
            Location::Everywhere(occ) => Some(occ),
            Location::Targets { hyps, .. } => hyps
                .iter()
                .find(|(h, _)| h == name)
                .map(|(_, occ)| occ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteElement {
    /// A proof of an equation, possibly with leading binders.
    pub rule: Term,
    /// Restricts the subterms the rule is tried on.
    pub pattern: Option<Term>,
    /// Rewrite from right to left.
    pub symm: bool,
    pub multiplicity: Multiplicity,
    pub location: Location,
}

impl RewriteElement {
    pub fn new(rule: Term) -> RewriteElement {
        RewriteElement {
            rule,
            pattern: None,
            symm: false,
            multiplicity: Multiplicity::Once,
            location: Location::goal(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteStep {
    Rewrite(RewriteElement),
    Unfold { names: Vec<Name>, location: Location },
    Fold { term: Term, location: Location },
    Reduce { to: Option<Term>, location: Location },
}

impl Display for RewriteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteStep::Rewrite(elem) => {
                write!(f, "{}", elem.multiplicity)?;
                if elem.symm {
                    write!(f, "←")?;
                }
                write!(f, "{}", elem.rule)?;
                if let Some(pattern) = &elem.pattern {
                    write!(f, " {{{pattern}}}")?;
                }
                write!(f, "{}", elem.location)
            }
            RewriteStep::Unfold { names, location } => {
                write!(f, "unfold")?;
                for name in names {
                    write!(f, " {name}")?;
                }
                write!(f, "{location}")
            }
            RewriteStep::Fold { term, location } => write!(f, "fold {term}{location}"),
            RewriteStep::Reduce { to, location } => match to {
                Some(to) => write!(f, "reduce to {to}{location}"),
                None => write!(f, "reduce{location}"),
            },
        }
    }
}

pub const REWRITE_ELEMENT_OPCODE: &str = "RWE";
pub const REWRITE_UNFOLD_OPCODE: &str = "RWU";
pub const REWRITE_FOLD_OPCODE: &str = "RWF";
pub const REWRITE_REDUCE_OPCODE: &str = "RWR";

impl RewriteStep {
    pub fn location(&self) -> &Location {
        match self {
            RewriteStep::Rewrite(elem) => &elem.location,
            RewriteStep::Unfold { location, .. }
            | RewriteStep::Fold { location, .. }
            | RewriteStep::Reduce { location, .. } => location,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RewriteStep::Rewrite(_) => "rewrite_element",
            RewriteStep::Unfold { .. } => "rewrite_unfold",
            RewriteStep::Fold { .. } => "rewrite_fold",
            RewriteStep::Reduce { .. } => "rewrite_reduce",
        }
    }

    pub fn opcode(&self) -> &'static str {
        match self {
            RewriteStep::Rewrite(_) => REWRITE_ELEMENT_OPCODE,
            RewriteStep::Unfold { .. } => REWRITE_UNFOLD_OPCODE,
            RewriteStep::Fold { .. } => REWRITE_FOLD_OPCODE,
            RewriteStep::Reduce { .. } => REWRITE_REDUCE_OPCODE,
        }
    }

    /// Embeds the step as an extension node. Terms become arguments, the rest is the payload.
    pub fn to_term(&self) -> Term {
        let payload = StepPayload {
            kind: self.clone(),
        };
        let args = match self {
            RewriteStep::Rewrite(elem) => {
                let mut args = vec![elem.rule.clone()];
                args.extend(elem.pattern.clone());
                args
            }
            RewriteStep::Unfold { .. } => vec![],
            RewriteStep::Fold { term, .. } => vec![term.clone()],
            RewriteStep::Reduce { to, .. } => to.iter().cloned().collect(),
        };
        mk_ext(ExtDef::new(payload.without_terms()), args)
    }

    /// Recovers a step from its extension node, taking terms from the node's arguments.
    pub fn from_term(t: &Term) -> Option<RewriteStep> {
        let Term::Ext(inner) = t else {
            return None;
        };
        let payload = inner.def.downcast_ref::<StepPayload>()?;
        payload.with_terms(&inner.args)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_term(&self.to_term());
        enc.finish()
    }

    pub fn decode(bytes: &[u8], registry: &crate::codec::ExtRegistry) -> Result<RewriteStep, CodecError> {
        let mut dec = Decoder::new(bytes, registry);
        let t = dec.read_term()?;
        dec.finish()?;
        RewriteStep::from_term(&t).ok_or(CodecError::NotAStep)
    }
}

/// Payload of a step embedded as a term. The term fields of `kind` are placeholders; the real
/// terms are the arguments of the extension node.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StepPayload {
    kind: RewriteStep,
}

impl StepPayload {
    fn without_terms(self) -> StepPayload {
        let kind = match self.kind {
            RewriteStep::Rewrite(elem) => RewriteStep::Rewrite(RewriteElement {
                rule: Term::default(),
                pattern: None,
                ..elem
            }),
            RewriteStep::Fold { location, .. } => RewriteStep::Fold {
                term: Term::default(),
                location,
            },
            RewriteStep::Reduce { location, .. } => RewriteStep::Reduce { to: None, location },
            kind @ RewriteStep::Unfold { .. } => kind,
        };
        StepPayload { kind }
    }

    fn with_terms(&self, args: &[Term]) -> Option<RewriteStep> {
        let step = match (&self.kind, args) {
            (RewriteStep::Rewrite(elem), [rule]) => RewriteStep::Rewrite(RewriteElement {
                rule: rule.clone(),
                pattern: None,
                ..elem.clone()
            }),
            (RewriteStep::Rewrite(elem), [rule, pattern]) => RewriteStep::Rewrite(RewriteElement {
                rule: rule.clone(),
                pattern: Some(pattern.clone()),
                ..elem.clone()
            }),
            (RewriteStep::Unfold { .. }, []) => self.kind.clone(),
            (RewriteStep::Fold { location, .. }, [term]) => RewriteStep::Fold {
                term: term.clone(),
                location: location.clone(),
            },
            (RewriteStep::Reduce { location, .. }, []) => RewriteStep::Reduce {
                to: None,
                location: location.clone(),
            },
            (RewriteStep::Reduce { location, .. }, [to]) => RewriteStep::Reduce {
                to: Some(to.clone()),
                location: location.clone(),
            },
            _ => return None,
        };
        Some(step)
    }
}

impl Extension for StepPayload {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn opcode(&self) -> &'static str {
        self.kind.opcode()
    }

    fn get_type(
        &self,
        _args: &[Term],
        _infer: &mut dyn FnMut(&Term) -> anyhow::Result<Term>,
    ) -> anyhow::Result<Term> {
        bail!("unexpected occurrence of 'rewrite' expression")
    }

    fn expand(&self, _args: &[Term]) -> Option<Term> {
        None
    }

    fn write(&self, enc: &mut Encoder) {
        match &self.kind {
            RewriteStep::Rewrite(elem) => {
                enc.write_bool(elem.symm);
                enc.write_u8(elem.multiplicity.tag());
                enc.write_location(&elem.location);
                if let Some(n) = elem.multiplicity.count() {
                    enc.write_u32(n);
                }
            }
            RewriteStep::Unfold { names, location } => {
                enc.write_usize(names.len());
                for name in names {
                    enc.write_name(name);
                }
                enc.write_location(location);
            }
            RewriteStep::Fold { location, .. } | RewriteStep::Reduce { location, .. } => {
                enc.write_location(location);
            }
        }
    }

    fn ext_eq(&self, other: &dyn Extension) -> bool {
        other.as_any().downcast_ref::<StepPayload>() == Some(self)
    }

    fn hash_code(&self) -> u64 {
        hash_payload(self.kind.location())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn check_arity(opcode: &str, args: &[Term], ok: bool) -> Result<(), CodecError> {
    if ok {
        Ok(())
    } else {
        Err(CodecError::CorruptedStream {
            opcode: opcode.to_owned(),
            arity: args.len(),
        })
    }
}

fn mk_step_term(payload: StepPayload, args: Vec<Term>) -> Term {
    mk_ext(ExtDef::new(payload), args)
}

pub(crate) fn read_rewrite_element(dec: &mut Decoder<'_>, args: Vec<Term>) -> Result<Term, CodecError> {
    check_arity(REWRITE_ELEMENT_OPCODE, &args, args.len() == 1 || args.len() == 2)?;
    let symm = dec.read_bool()?;
    let tag = dec.read_u8()?;
    let location = dec.read_location()?;
    let count = if Multiplicity::has_count(tag) {
        Some(dec.read_u32()?)
    } else {
        None
    };
    let multiplicity = Multiplicity::from_tag(tag, count).ok_or(CodecError::InvalidTag {
        what: "multiplicity",
        tag,
    })?;
    let payload = StepPayload {
        kind: RewriteStep::Rewrite(RewriteElement {
            rule: Term::default(),
            pattern: None,
            symm,
            multiplicity,
            location,
        }),
    };
    Ok(mk_step_term(payload, args))
}

pub(crate) fn read_rewrite_unfold(dec: &mut Decoder<'_>, args: Vec<Term>) -> Result<Term, CodecError> {
    check_arity(REWRITE_UNFOLD_OPCODE, &args, args.is_empty())?;
    let len = dec.read_usize()?;
    let mut names = Vec::new();
    for _ in 0..len {
        names.push(dec.read_name()?);
    }
    let location = dec.read_location()?;
    let payload = StepPayload {
        kind: RewriteStep::Unfold { names, location },
    };
    Ok(mk_step_term(payload, args))
}

pub(crate) fn read_rewrite_fold(dec: &mut Decoder<'_>, args: Vec<Term>) -> Result<Term, CodecError> {
    check_arity(REWRITE_FOLD_OPCODE, &args, args.len() == 1)?;
    let location = dec.read_location()?;
    let payload = StepPayload {
        kind: RewriteStep::Fold {
            term: Term::default(),
            location,
        },
    };
    Ok(mk_step_term(payload, args))
}

pub(crate) fn read_rewrite_reduce(dec: &mut Decoder<'_>, args: Vec<Term>) -> Result<Term, CodecError> {
    check_arity(REWRITE_REDUCE_OPCODE, &args, args.len() <= 1)?;
    let location = dec.read_location()?;
    let payload = StepPayload {
        kind: RewriteStep::Reduce { to: None, location },
    };
    Ok(mk_step_term(payload, args))
}
