//! The rewrite tactic.
//!
//! A [Rewriter] runs a sequence of [RewriteStep]s against the main goal of a [ProofState]. Each
//! rewrite locates a subterm matching the rule's pattern, confirms it through the unifier, and
//! replaces the goal (or a hypothesis) with a new one connected to the old by an `eq.rec` proof.
//! Steps that fail leave the state as it was before the step.

mod proof;
mod trace;

use std::ops::ControlFlow;

use log::debug;
use thiserror::Error;

pub use self::proof::{abstract_occurrences, Abstraction, ProofBuilder};
pub use self::trace::{Failure, FailureKind, TargetTrace, Trace};

use crate::config::RewriteConfig;
use crate::elab::{Elaborator, EnvInstances, InstanceResolver, ScopedElaborator};
use crate::env::{mk_eq_refl, mk_eq_symm, Env, TermEqExt, IFF_REFL, TRUE_INTRO};
use crate::local_context::{ContractViolation, LocalContext};
use crate::matcher::{MatchPattern, MatchSubst, Matcher, RewriteMatchPlugin};
use crate::step::{Location, Multiplicity, Occurrence, RewriteElement, RewriteStep, StepError};
use crate::tactic::{assign, DeferredMessage, Goal, Interrupt, ProofState, TacticError, TacticErrorKind};
use crate::tc::{Transparency, TypeChecker, UnfoldOnly};
use crate::tt::{mk_app, mk_const, mk_local, BinderInfo, Id, Name, Term};
use crate::unify::{Constraint, PatternUnifier, Substitution, Unifier, UnifierConfig};

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rewrite tactic failed, maximum number of iterations exceeded (current threshold: {0}, increase the threshold by setting option 'rewriter.max_iter')")]
    MaxIterExceeded(u32),
    #[error("invalid rewrite tactic, given lemma is not an equality")]
    NotAnEquality,
    #[error(transparent)]
    Location(#[from] StepError),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    #[error(transparent)]
    Kernel(#[from] anyhow::Error),
}

impl RewriteError {
    fn kind(&self) -> TacticErrorKind {
        match self {
            RewriteError::MaxIterExceeded(_) => TacticErrorKind::IterationLimit,
            RewriteError::NotAnEquality | RewriteError::Location(_) => TacticErrorKind::Malformed,
            RewriteError::Contract(_) => TacticErrorKind::ContractViolation,
            RewriteError::Kernel(_) => TacticErrorKind::StepFailed,
        }
    }

    fn into_message(self) -> DeferredMessage {
        match self {
            RewriteError::Kernel(e) => {
                DeferredMessage::from_string(format!("invalid 'rewrite' tactic, {e:#}"))
            }
            e => DeferredMessage::from_string(e.to_string()),
        }
    }
}

pub struct Rewriter<'a> {
    env: &'a Env,
    config: RewriteConfig,
    elaborator: &'a dyn Elaborator,
    resolver: &'a dyn InstanceResolver,
    unifier: &'a dyn Unifier,
    interrupt: Interrupt,
}

impl<'a> Rewriter<'a> {
    pub fn new(env: &'a Env, config: RewriteConfig) -> Rewriter<'a> {
        Rewriter {
            env,
            config,
            elaborator: &ScopedElaborator,
            resolver: &EnvInstances,
            unifier: &PatternUnifier,
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_elaborator(mut self, elaborator: &'a dyn Elaborator) -> Rewriter<'a> {
        self.elaborator = elaborator;
        self
    }

    pub fn with_resolver(mut self, resolver: &'a dyn InstanceResolver) -> Rewriter<'a> {
        self.resolver = resolver;
        self
    }

    pub fn with_unifier(mut self, unifier: &'a dyn Unifier) -> Rewriter<'a> {
        self.unifier = unifier;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Rewriter<'a> {
        self.interrupt = interrupt;
        self
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Runs `steps` on the main goal of `ps`. On success the main goal is replaced by the
    /// rewritten goal, or removed if it became trivial.
    pub fn run(&self, ps: &ProofState, steps: &[RewriteStep]) -> Result<ProofState, TacticError> {
        let Some(goal) = ps.main_goal() else {
            return Err(TacticError {
                kind: TacticErrorKind::NoGoals,
                step: None,
                state: ps.clone(),
                message: DeferredMessage::from_string(
                    "invalid 'rewrite' tactic, there are no goals to be proved",
                ),
            });
        };
        let rest = &ps.goals()[1..];
        let goal = goal.instantiate(ps.subst());
        let ctx = match goal.to_local_context() {
            Ok(ctx) => ctx,
            Err(e) => {
                return Err(TacticError {
                    kind: TacticErrorKind::ContractViolation,
                    step: None,
                    state: ps.clone(),
                    message: DeferredMessage::from_string(e.to_string()),
                })
            }
        };
        let matcher_transparency = if self.config.syntactic {
            &Transparency::None
        } else {
            &Transparency::Reducible
        };
        let tc = TypeChecker::new(self.env, &Transparency::All);
        let matcher_tc = TypeChecker::new(self.env, matcher_transparency);
        let mut rw = RewriteFn {
            rw: self,
            tc: &tc,
            matcher_tc: &matcher_tc,
            goal,
            ctx,
            subst: ps.subst().clone(),
            trace: None,
        };

        for step in steps {
            if self.interrupt.is_requested() {
                return Err(rw.error(
                    TacticErrorKind::Interrupted,
                    step,
                    DeferredMessage::from_string("rewrite tactic interrupted"),
                    rest,
                ));
            }
            let saved = (rw.goal.clone(), rw.ctx.clone(), rw.subst.clone());
            rw.trace = None;
            let result = rw.process_step(step);
            if !matches!(result, Ok(true)) {
                (rw.goal, rw.ctx, rw.subst) = saved;
            }
            match result {
                Ok(true) => {
                    debug!("rewrite: step '{step}' committed, new goal {}", rw.goal);
                }
                Ok(false) => {
                    let message = match rw.trace.take() {
                        Some(trace) => DeferredMessage::new(move || {
                            format!("invalid 'rewrite' tactic, {trace}")
                        }),
                        None => DeferredMessage::from_string(
                            "invalid 'rewrite' tactic, rewrite step failed",
                        ),
                    };
                    return Err(rw.error(TacticErrorKind::StepFailed, step, message, rest));
                }
                Err(e) => {
                    debug!("rewrite: step '{step}' aborted: {e}");
                    let kind = e.kind();
                    return Err(rw.error(kind, step, e.into_message(), rest));
                }
            }
        }

        let mut goals = vec![];
        if rw.check_trivial_goal() {
            debug!("rewrite: goal closed by reflexivity");
        } else {
            goals.push(rw.goal);
        }
        goals.extend_from_slice(rest);
        Ok(ProofState::new(goals, rw.subst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Goal,
    Hyp(Id),
}

/// A confirmed rewrite of `a` into `b`, with `heq` oriented for the target kind.
struct Found {
    a: Term,
    b: Term,
    heq: Term,
    subst: Substitution,
}

/// Mutable state of one invocation.
struct RewriteFn<'r> {
    rw: &'r Rewriter<'r>,
    /// Transparent checker used for unification and proof construction.
    tc: &'r TypeChecker<'r>,
    matcher_tc: &'r TypeChecker<'r>,
    goal: Goal,
    ctx: LocalContext,
    subst: Substitution,
    trace: Option<Trace>,
}

impl<'r> RewriteFn<'r> {
    fn error(
        &self,
        kind: TacticErrorKind,
        step: &RewriteStep,
        message: DeferredMessage,
        rest: &[Goal],
    ) -> TacticError {
        let mut goals = vec![self.goal.clone()];
        goals.extend_from_slice(rest);
        TacticError {
            kind,
            step: Some(step.clone()),
            state: ProofState::new(goals, self.subst.clone()),
            message,
        }
    }

    fn elaborate(
        &self,
        e: &Term,
        expected: Option<&Term>,
    ) -> anyhow::Result<(Term, Vec<Constraint>)> {
        self.rw.elaborator.elaborate(self.tc, &self.ctx, e, expected)
    }

    /// The first solution of `cs` on top of `subst`, dropping leftover constraints.
    fn solve(
        &self,
        cs: Vec<Constraint>,
        subst: Substitution,
    ) -> anyhow::Result<Option<Substitution>> {
        let config = UnifierConfig {
            discard: true,
            ..UnifierConfig::default()
        };
        match self.rw.unifier.unify(self.tc, cs, subst, config).next() {
            Some(solution) => Ok(Some(solution?.0)),
            None => Ok(None),
        }
    }

    fn process_step(&mut self, step: &RewriteStep) -> Result<bool, RewriteError> {
        match step {
            RewriteStep::Rewrite(elem) => self.process_rewrite_step(elem),
            RewriteStep::Unfold { names, location } => {
                self.for_each_target(location, &mut |this, target, _| {
                    this.unfold_target(target, names)
                })
            }
            RewriteStep::Fold { term, location } => {
                self.for_each_target(location, &mut |this, target, occ| {
                    this.fold_target(target, term, occ)
                })
            }
            RewriteStep::Reduce { to, location } => {
                self.for_each_target(location, &mut |this, target, _| match to {
                    Some(to) => this.reduce_target_to(target, to),
                    None => this.reduce_target(target),
                })
            }
        }
    }

    /// Runs `f` on each hypothesis selected by `location` in context order, then on the goal.
    fn for_each_target(
        &mut self,
        location: &Location,
        f: &mut dyn FnMut(&mut Self, Target, &Occurrence) -> Result<bool, RewriteError>,
    ) -> Result<bool, RewriteError> {
        location.validate()?;
        if let Location::GoalOnly(occ) = location {
            return f(self, Target::Goal, occ);
        }
        let hyps = self
            .goal
            .hyps()
            .into_iter()
            .filter_map(|h| match h {
                Term::Local(inner) => Some((inner.id, inner.pp_name.clone())),
                _ => None,
            })
            .collect::<Vec<_>>();
        let mut progress = false;
        for (id, name) in hyps {
            let Some(occ) = location.hyp_occurrence(&name) else {
                continue;
            };
            if f(self, Target::Hyp(id), occ)? {
                progress = true;
            }
        }
        if let Some(occ) = location.goal_occurrence() {
            if f(self, Target::Goal, occ)? {
                progress = true;
            }
        }
        Ok(progress)
    }

    fn target_type(&self, target: Target) -> Option<(Term, Option<Name>)> {
        match target {
            Target::Goal => Some((self.goal.ty().clone(), None)),
            Target::Hyp(id) => self.goal.hyps().into_iter().find_map(|h| match h {
                Term::Local(inner) if inner.id == id => {
                    Some((inner.ty.clone(), Some(inner.pp_name.clone())))
                }
                _ => None,
            }),
        }
    }

    fn process_rewrite_step(&mut self, elem: &RewriteElement) -> Result<bool, RewriteError> {
        elem.location.validate()?;
        let pattern = self.get_pattern(elem)?;
        debug!("rewrite: pattern {}", pattern.term);
        if self.rw.config.trace {
            self.trace = Some(Trace::new(elem.rule.clone(), pattern.term.clone()));
        }

        let max_iter = self.rw.config.max_iter;
        let mut count = 0;
        let mut attempt = |this: &mut Self| -> Result<bool, RewriteError> {
            if count >= max_iter {
                return Err(RewriteError::MaxIterExceeded(max_iter));
            }
            count += 1;
            this.rewrite_once(elem, &pattern)
        };
        match elem.multiplicity {
            Multiplicity::Once => self.rewrite_once(elem, &pattern),
            Multiplicity::AtMostN(n) => {
                for _ in 0..n {
                    if !attempt(self)? {
                        return Ok(true);
                    }
                }
                Ok(true)
            }
            Multiplicity::ExactlyN(n) => {
                for _ in 0..n {
                    if !attempt(self)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Multiplicity::ZeroOrMore => loop {
                if !attempt(self)? {
                    return Ok(true);
                }
            },
            Multiplicity::OneOrMore => {
                if !attempt(self)? {
                    return Ok(false);
                }
                loop {
                    if !attempt(self)? {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Elaborates the step's pattern, or derives one from the left side of the rule's equation.
    fn get_pattern(&self, elem: &RewriteElement) -> Result<MatchPattern, RewriteError> {
        if let Some(pattern) = &elem.pattern {
            let (pattern, _) = self.elaborate(pattern, None)?;
            return Ok(MatchPattern::new(&pattern));
        }
        let (rule, _) = self.elaborate(&elem.rule, None)?;
        let mut ty = self.tc.whnf(&self.tc.infer(&rule)?);
        loop {
            let next = match &ty {
                Term::Pi(inner) => {
                    let arg = if inner.binder == BinderInfo::InstImplicit {
                        // the pattern only locates candidates, so a failed resolution is fine here
                        match self.rw.resolver.resolve(self.tc, &self.ctx, &inner.dom) {
                            Ok(Some((inst, _))) => inst,
                            _ => self.ctx.mk_meta(Some(&inner.dom)),
                        }
                    } else {
                        self.ctx.mk_meta(Some(&inner.dom))
                    };
                    self.tc.whnf(&inner.body.open(&[arg], 0))
                }
                _ => break,
            };
            ty = next;
        }
        let Some((_, lhs, rhs)) = ty.as_eq() else {
            return Err(RewriteError::NotAnEquality);
        };
        let src = if elem.symm { rhs } else { lhs };
        Ok(MatchPattern::new(src))
    }

    fn rewrite_once(
        &mut self,
        elem: &RewriteElement,
        pattern: &MatchPattern,
    ) -> Result<bool, RewriteError> {
        self.for_each_target(&elem.location, &mut |this, target, occ| {
            this.rewrite_target(elem, pattern, target, occ)
        })
    }

    fn rewrite_target(
        &mut self,
        elem: &RewriteElement,
        pattern: &MatchPattern,
        target: Target,
        occ: &Occurrence,
    ) -> Result<bool, RewriteError> {
        let Some((ty, hyp_name)) = self.target_type(target) else {
            return Ok(false);
        };
        if let Some(trace) = &mut self.trace {
            trace.add_target(hyp_name);
        }
        let Some(found) = self.find_target(elem, pattern, &ty, target != Target::Goal) else {
            return Ok(false);
        };
        match target {
            Target::Goal => self.rewrite_goal(found, occ),
            Target::Hyp(id) => self.rewrite_hypothesis(id, found, occ),
        }
    }

    /// The first closed subterm of `ty` in pre-order that matches the pattern and unifies with
    /// the equation's source.
    fn find_target(
        &mut self,
        elem: &RewriteElement,
        pattern: &MatchPattern,
        ty: &Term,
        is_hyp: bool,
    ) -> Option<Found> {
        let plugin = RewriteMatchPlugin::new(self.matcher_tc);
        let mut msubst = MatchSubst::new(pattern);
        let found = ty.visit(&mut |t, _| {
            if t.metadata().bound > 0 {
                return ControlFlow::Continue(true);
            }
            msubst.reset();
            if !Matcher::new(&mut msubst, &plugin).is_match(&pattern.term, t) {
                if let Some(trace) = &mut self.trace {
                    trace.add_failure(FailureKind::NoMatch, pattern.term.clone(), t.clone());
                }
                return ControlFlow::Continue(true);
            }
            match self.unify_target(elem, t, is_hyp) {
                Ok(found) => ControlFlow::Break(found),
                Err((kind, lemma)) => {
                    log::trace!("rewrite: candidate {t} rejected ({kind:?})");
                    if let Some(trace) = &mut self.trace {
                        trace.add_failure(kind, lemma, t.clone());
                    }
                    ControlFlow::Continue(true)
                }
            }
        });
        match found {
            ControlFlow::Break(found) => {
                if let Some(trace) = &mut self.trace {
                    trace.add_match(found.a.clone());
                }
                Some(found)
            }
            ControlFlow::Continue(()) => None,
        }
    }

    /// Confirms a matched subterm. Errors raised by collaborators only reject this candidate.
    fn unify_target(
        &self,
        elem: &RewriteElement,
        t: &Term,
        is_hyp: bool,
    ) -> Result<Found, (FailureKind, Term)> {
        match self.try_unify_target(elem, t, is_hyp) {
            Ok(result) => result,
            Err(e) => {
                log::trace!("rewrite: exception while unifying {t}: {e:#}");
                Err((FailureKind::Exception, elem.rule.clone()))
            }
        }
    }

    fn try_unify_target(
        &self,
        elem: &RewriteElement,
        t: &Term,
        is_hyp: bool,
    ) -> anyhow::Result<Result<Found, (FailureKind, Term)>> {
        let (mut rule, mut cs) = self.elaborate(&elem.rule, None)?;
        let mut rule_ty = self.tc.whnf(&self.tc.infer(&rule)?);
        let mut pending = vec![];
        loop {
            let (m, next) = match &rule_ty {
                Term::Pi(inner) => {
                    let m = self.ctx.mk_meta(Some(&inner.dom));
                    if inner.binder == BinderInfo::InstImplicit {
                        pending.push((m.clone(), inner.dom.clone()));
                    }
                    let next = self.tc.whnf(&inner.body.open(std::slice::from_ref(&m), 0));
                    (m, next)
                }
                _ => break,
            };
            rule = mk_app(rule, m);
            rule_ty = next;
        }
        let Some((_, lhs, rhs)) = rule_ty.as_eq() else {
            anyhow::bail!(RewriteError::NotAnEquality);
        };
        let src = if elem.symm { rhs } else { lhs }.clone();
        if !self.tc.is_def_eq(t, &src, &mut cs)? {
            return Ok(Err((FailureKind::Unification, src)));
        }
        let Some(mut subst) = self.solve(cs, self.subst.clone())? else {
            return Ok(Err((FailureKind::Unification, src)));
        };

        if !pending.is_empty() {
            let mut cs = vec![];
            for (m, ty) in pending {
                let m = subst.instantiate(&m);
                if !m.has_expr_meta() {
                    continue;
                }
                let ty = subst.instantiate(&ty);
                let Some((inst, inst_cs)) = self.rw.resolver.resolve(self.tc, &self.ctx, &ty)?
                else {
                    anyhow::bail!("failed to synthesize type class instance for {ty}");
                };
                cs.extend(inst_cs);
                if !self.tc.is_def_eq(&m, &inst, &mut cs)? {
                    return Ok(Err((FailureKind::Unification, src)));
                }
            }
            match self.solve(cs, subst)? {
                Some(next) => subst = next,
                None => return Ok(Err((FailureKind::Unification, src))),
            }
        }

        let rule = subst.instantiate(&rule);
        let rule_ty = subst.instantiate(&rule_ty);
        if rule.has_expr_meta() || rule_ty.has_expr_meta() {
            return Ok(Err((FailureKind::HasMetavars, rule)));
        }
        let (Some((carrier, lhs, rhs)), Some(level)) = (rule_ty.as_eq(), rule_ty.eq_level()) else {
            anyhow::bail!(RewriteError::NotAnEquality);
        };
        let symm = || mk_eq_symm(level, carrier, lhs, rhs, &rule);
        // goals are transported backward (`b = a`), hypotheses forward (`a = b`)
        let (heq, b) = match (is_hyp, elem.symm) {
            (false, false) => (symm(), rhs),
            (false, true) => (rule.clone(), lhs),
            (true, false) => (rule.clone(), rhs),
            (true, true) => (symm(), lhs),
        };
        Ok(Ok(Found {
            a: t.clone(),
            b: b.clone(),
            heq,
            subst,
        }))
    }

    fn rewrite_goal(&mut self, found: Found, occ: &Occurrence) -> Result<bool, RewriteError> {
        let builder = ProofBuilder::new(self.tc);
        let pa = self.goal.ty().clone();
        let Some(abs) = builder.abstract_target(&pa, &found.a, &found.b, occ)? else {
            return Ok(false);
        };
        let m = self.ctx.mk_meta(Some(&abs.new_ty));
        let proof = builder.goal_proof(&abs, &found.a, &found.b, &m, &found.heq);
        self.subst = found.subst;
        assign(&mut self.subst, &self.goal, &proof);
        self.goal = Goal::new(m, abs.new_ty)?;
        Ok(true)
    }

    fn rewrite_hypothesis(
        &mut self,
        id: Id,
        found: Found,
        occ: &Occurrence,
    ) -> Result<bool, RewriteError> {
        let hyps = self.goal.hyps().into_iter().cloned().collect::<Vec<_>>();
        let Some(pos) = hyps.iter().position(|h| h.local_id() == Some(id)) else {
            return Ok(false);
        };
        let Term::Local(hyp) = &hyps[pos] else {
            return Ok(false);
        };
        let builder = ProofBuilder::new(self.tc);
        let Some(abs) = builder.abstract_target(&hyp.ty, &found.a, &found.b, occ)? else {
            return Ok(false);
        };
        let proof = builder.hyp_proof(&abs, &found.a, &found.b, &hyps[pos], &found.heq);
        let mut new_hyps = hyps.clone();
        new_hyps[pos] = mk_local(hyp.id, hyp.pp_name.clone(), abs.new_ty, hyp.binder);
        let mut args = hyps.clone();
        args[pos] = proof;
        self.subst = found.subst;
        let ty = self.goal.ty().clone();
        self.splice_goal(new_hyps, args, ty)?;
        Ok(true)
    }

    /// Replaces the goal by `?n new_hyps : ty`, assigning the old goal `?n args`.
    fn splice_goal(
        &mut self,
        new_hyps: Vec<Term>,
        args: Vec<Term>,
        ty: Term,
    ) -> Result<(), RewriteError> {
        let ctx = LocalContext::from_locals(&new_hyps)?;
        let m = ctx.mk_meta(Some(&ty));
        let value = m.head().apply(args);
        assign(&mut self.subst, &self.goal, &value);
        self.goal = Goal::new(m, ty)?;
        self.ctx = ctx;
        Ok(())
    }

    /// Definitional replacement of a target's type.
    fn replace_target(&mut self, target: Target, new_ty: Term) -> Result<bool, RewriteError> {
        match target {
            Target::Goal => {
                let m = self.ctx.mk_meta(Some(&new_ty));
                assign(&mut self.subst, &self.goal, &m);
                self.goal = Goal::new(m, new_ty)?;
            }
            Target::Hyp(id) => {
                let hyps = self.goal.hyps().into_iter().cloned().collect::<Vec<_>>();
                let new_hyps = hyps
                    .iter()
                    .map(|h| match h {
                        Term::Local(inner) if inner.id == id => {
                            mk_local(inner.id, inner.pp_name.clone(), new_ty.clone(), inner.binder)
                        }
                        _ => h.clone(),
                    })
                    .collect();
                let ty = self.goal.ty().clone();
                self.splice_goal(new_hyps, hyps, ty)?;
            }
        }
        Ok(true)
    }

    fn unfold_target(&mut self, target: Target, names: &[Name]) -> Result<bool, RewriteError> {
        let Some((ty, _)) = self.target_type(target) else {
            return Ok(false);
        };
        let opacity = UnfoldOnly::new(names.to_vec());
        let new_ty = TypeChecker::new(self.rw.env, &opacity).normalize(&ty);
        if !opacity.unfolded() || new_ty == ty {
            return Ok(false);
        }
        self.replace_target(target, new_ty)
    }

    fn reduce_target(&mut self, target: Target) -> Result<bool, RewriteError> {
        let Some((ty, _)) = self.target_type(target) else {
            return Ok(false);
        };
        let opacity = UnfoldOnly::new(vec![]);
        let new_ty = TypeChecker::new(self.rw.env, &opacity).normalize(&ty);
        if new_ty == ty {
            return Ok(false);
        }
        self.replace_target(target, new_ty)
    }

    fn reduce_target_to(&mut self, target: Target, to: &Term) -> Result<bool, RewriteError> {
        let Some((ty, _)) = self.target_type(target) else {
            return Ok(false);
        };
        let (e, mut cs) = self.elaborate(to, None)?;
        if !self.tc.is_def_eq(&ty, &e, &mut cs)? {
            return Ok(false);
        }
        let Some(subst) = self.solve(cs, self.subst.clone())? else {
            return Ok(false);
        };
        let e = subst.instantiate(&e);
        if e.has_expr_meta() {
            return Ok(false);
        }
        self.subst = subst;
        self.replace_target(target, e)
    }

    fn fold_target(
        &mut self,
        target: Target,
        term: &Term,
        occ: &Occurrence,
    ) -> Result<bool, RewriteError> {
        let Some((ty, _)) = self.target_type(target) else {
            return Ok(false);
        };
        let (e, cs) = self.elaborate(term, None)?;
        if !cs.is_empty() {
            return Ok(false);
        }
        let Some(unfolded) = self.tc.unfold_head(&e) else {
            return Ok(false);
        };
        let mut i = 0;
        let mut found = false;
        let new_ty = ty.replace(&mut |t, _| {
            if t.metadata().bound > 0 {
                return None;
            }
            let mut cs = vec![];
            match self.tc.is_def_eq(t, &unfolded, &mut cs) {
                Ok(true) if cs.is_empty() => {}
                _ => return None,
            }
            i += 1;
            if !occ.contains(i) {
                return Some(t.clone());
            }
            found = true;
            Some(e.clone())
        });
        if !found {
            return Ok(false);
        }
        self.replace_target(target, new_ty)
    }

    /// Closes the goal if it is `a = a` up to definitional equality, `p ↔ p`, or `true`.
    fn check_trivial_goal(&mut self) -> bool {
        let ty = self.goal.ty().clone();
        let proof = if let Some((carrier, lhs, rhs)) = ty.as_eq() {
            let Some(level) = ty.eq_level() else {
                return false;
            };
            if !self.is_def_eq_strict(lhs, rhs) {
                return false;
            }
            mk_eq_refl(level, carrier, lhs)
        } else if let Some((lhs, rhs)) = ty.as_iff() {
            if !self.is_def_eq_strict(lhs, rhs) {
                return false;
            }
            mk_const(IFF_REFL.clone(), vec![]).apply([lhs.clone()])
        } else if ty.is_true() {
            mk_const(TRUE_INTRO.clone(), vec![])
        } else {
            return false;
        };
        assign(&mut self.subst, &self.goal, &proof);
        true
    }

    /// Definitional equality that neither errs nor defers constraints.
    fn is_def_eq_strict(&self, a: &Term, b: &Term) -> bool {
        let mut cs = vec![];
        matches!(self.tc.is_def_eq(a, b, &mut cs), Ok(true)) && cs.is_empty()
    }
}
