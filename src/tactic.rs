//! Goals, proof states, and the error surface shared by tactics.

use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::local_context::{ContractViolation, LocalContext};
use crate::step::RewriteStep;
use crate::tt::{mk_lambda_locals, Id, Name, Term};
use crate::unify::Substitution;

/// An open goal `?m h₁ ⋯ hₙ : ty`. The hypotheses are the arguments of the metavariable.
#[derive(Clone, Debug)]
pub struct Goal {
    meta: Term,
    ty: Term,
}

impl Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for h in self.hyps() {
            if let Term::Local(inner) = h {
                write!(f, "({} : {}) ", inner.pp_name, inner.ty)?;
            }
        }
        write!(f, "⊢ {}", self.ty)
    }
}

impl Goal {
    pub fn new(meta: Term, ty: Term) -> Result<Goal, ContractViolation> {
        let (head, args) = meta.unapp();
        if !head.is_meta() {
            return Err(ContractViolation::MalformedGoal(meta.clone()));
        }
        let mut ids = Vec::with_capacity(args.len());
        for arg in args {
            match arg.local_id() {
                Some(id) if !ids.contains(&id) => ids.push(id),
                _ => return Err(ContractViolation::MalformedGoal(meta.clone())),
            }
        }
        Ok(Goal { meta, ty })
    }

    /// A goal over `hyps` owned by a fresh metavariable.
    pub fn new_root(hyps: &[Term], ty: Term) -> Result<Goal, ContractViolation> {
        let ctx = LocalContext::from_locals(hyps)?;
        let meta = ctx.mk_meta(Some(&ty));
        Goal::new(meta, ty)
    }

    /// The metavariable application standing for the proof of this goal.
    pub fn meta(&self) -> &Term {
        &self.meta
    }

    pub fn mvar(&self) -> &Term {
        self.meta.head()
    }

    pub fn mvar_id(&self) -> Id {
        // checked in `Goal::new`
        self.mvar().meta_id().unwrap_or_default()
    }

    pub fn ty(&self) -> &Term {
        &self.ty
    }

    pub fn hyps(&self) -> Vec<&Term> {
        self.meta.args()
    }

    /// The innermost hypothesis with the given display name.
    pub fn find_hyp(&self, name: &Name) -> Option<&Term> {
        self.hyps().into_iter().rev().find(|h| match h {
            Term::Local(inner) => inner.pp_name == *name,
            _ => false,
        })
    }

    pub fn to_local_context(&self) -> Result<LocalContext, ContractViolation> {
        let hyps = self.hyps().into_iter().cloned().collect::<Vec<_>>();
        LocalContext::from_locals(&hyps)
    }

    /// Instantiates the statement and the hypotheses' types, keeping the owning metavariable.
    pub fn instantiate(&self, subst: &Substitution) -> Goal {
        let hyps = self.hyps().into_iter().map(|h| subst.instantiate(h));
        Goal {
            meta: self.mvar().apply(hyps),
            ty: subst.instantiate(&self.ty),
        }
    }
}

/// `goal := λ hyps, value`
pub fn assign(subst: &mut Substitution, goal: &Goal, value: &Term) {
    let hyps = goal.hyps().into_iter().cloned().collect::<Vec<_>>();
    subst.assign(goal.mvar_id(), mk_lambda_locals(&hyps, value));
}

#[derive(Clone, Debug, Default)]
pub struct ProofState {
    goals: Vec<Goal>,
    subst: Substitution,
}

impl Display for ProofState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.goals.is_empty() {
            return write!(f, "no goals");
        }
        for (i, goal) in self.goals.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{goal}")?;
        }
        Ok(())
    }
}

impl ProofState {
    pub fn new(goals: Vec<Goal>, subst: Substitution) -> ProofState {
        ProofState { goals, subst }
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn main_goal(&self) -> Option<&Goal> {
        self.goals.first()
    }

    pub fn subst(&self) -> &Substitution {
        &self.subst
    }

    /// The proof term of `t` under the current assignment.
    pub fn instantiate_proof(&self, t: &Term) -> Term {
        self.subst.instantiate(t)
    }
}

/// Cooperative cancellation, polled between steps.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Interrupt {
        Interrupt::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TacticErrorKind {
    StepFailed,
    IterationLimit,
    Malformed,
    NoGoals,
    Interrupted,
    ContractViolation,
}

impl Display for TacticErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TacticErrorKind::StepFailed => "step failed",
            TacticErrorKind::IterationLimit => "iteration limit exceeded",
            TacticErrorKind::Malformed => "malformed input",
            TacticErrorKind::NoGoals => "no goals",
            TacticErrorKind::Interrupted => "interrupted",
            TacticErrorKind::ContractViolation => "contract violation",
        };
        write!(f, "{s}")
    }
}

/// A message rendered only when displayed.
#[derive(Clone)]
pub struct DeferredMessage(Arc<dyn Fn() -> String + Send + Sync>);

impl DeferredMessage {
    pub fn new(f: impl Fn() -> String + Send + Sync + 'static) -> DeferredMessage {
        DeferredMessage(Arc::new(f))
    }

    pub fn from_string(message: impl Into<String>) -> DeferredMessage {
        let message = message.into();
        DeferredMessage::new(move || message.clone())
    }
}

impl Display for DeferredMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", (self.0)())
    }
}

impl Debug for DeferredMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", (self.0)())
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TacticError {
    pub kind: TacticErrorKind,
    /// The step being executed, if the failure belongs to one.
    pub step: Option<RewriteStep>,
    /// The state before the failing step.
    pub state: ProofState,
    pub message: DeferredMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tt::{mk_const, mk_fresh_local, mk_fresh_meta, mk_type};

    fn nat() -> Term {
        mk_const(Name::from_str("nat"), vec![])
    }

    #[test]
    fn goal_display() {
        let n = mk_fresh_local(Name::from_str("n"), nat());
        let h = mk_fresh_local(Name::from_str("h"), mk_const(Name::from_str("p"), vec![]).apply([n.clone()]));
        let goal = Goal::new_root(&[n, h], mk_const(Name::from_str("q"), vec![])).unwrap();
        insta::assert_snapshot!(goal, @"(n : nat) (h : p n) ⊢ q");
        assert_eq!(goal.hyps().len(), 2);
        assert!(goal.find_hyp(&Name::from_str("h")).is_some());
        assert!(goal.find_hyp(&Name::from_str("x")).is_none());
    }

    #[test]
    fn malformed_goals_are_rejected() {
        let n = mk_fresh_local(Name::from_str("n"), nat());
        let m = mk_fresh_meta(mk_type());
        let err = Goal::new(m.apply([n.clone(), n.clone()]), nat()).unwrap_err();
        assert!(matches!(err, ContractViolation::MalformedGoal(_)));
        let err = Goal::new(nat(), nat()).unwrap_err();
        assert!(matches!(err, ContractViolation::MalformedGoal(_)));
    }

    #[test]
    fn assign_closes_over_hypotheses() {
        let n = mk_fresh_local(Name::from_str("n"), nat());
        let goal = Goal::new_root(&[n.clone()], nat()).unwrap();
        let mut subst = Substitution::new();
        assign(&mut subst, &goal, &n);
        assert_eq!(subst.instantiate(goal.meta()), n);
    }

    #[test]
    fn deferred_messages_render_on_display() {
        let message = DeferredMessage::new(|| "rendered".to_owned());
        let err = TacticError {
            kind: TacticErrorKind::NoGoals,
            step: None,
            state: ProofState::default(),
            message,
        };
        assert_eq!(err.to_string(), "rendered");
        assert_eq!(err.kind.to_string(), "no goals");
    }
}
