//! Metavariable substitutions and a higher-order pattern unifier producing a lazy stream of
//! solutions.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;

use anyhow::bail;

use crate::tc::TypeChecker;
use crate::tt::{mk_const, mk_lambda_locals, mk_local, mk_meta, mk_sort, Id, Level, Term};

#[derive(Debug, Clone, Default)]
pub struct Substitution {
    exprs: HashMap<Id, Term>,
    levels: HashMap<Id, Level>,
}

impl Substitution {
    pub fn new() -> Substitution {
        Substitution::default()
    }

    pub fn assign(&mut self, id: Id, value: Term) {
        self.exprs.insert(id, value);
    }

    pub fn assign_level(&mut self, id: Id, value: Level) {
        self.levels.insert(id, value);
    }

    pub fn get(&self, id: Id) -> Option<&Term> {
        self.exprs.get(&id)
    }

    pub fn get_level(&self, id: Id) -> Option<&Level> {
        self.levels.get(&id)
    }

    pub fn is_assigned(&self, id: Id) -> bool {
        self.exprs.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty() && self.levels.is_empty()
    }

    pub fn instantiate_level(&self, l: &Level) -> Level {
        if self.levels.is_empty() || !l.has_meta() {
            return l.clone();
        }
        l.replace(&|l| match l {
            Level::Meta(id) => self.levels.get(id).map(|v| self.instantiate_level(v)),
            _ => None,
        })
    }

    /// Replaces assigned metavariables everywhere, including inside the types of locals and
    /// metavariables. Instantiated heads of applications are beta-reduced.
    pub fn instantiate(&self, t: &Term) -> Term {
        if !t.has_meta() || self.is_empty() {
            return t.clone();
        }
        t.replace(&mut |m, _| {
            if !m.has_meta() {
                return Some(m.clone());
            }
            match m {
                Term::Meta(inner) => match self.exprs.get(&inner.id) {
                    Some(v) => Some(self.instantiate(v)),
                    None => Some(mk_meta(inner.id, self.instantiate(&inner.ty))),
                },
                Term::App(_) => {
                    let (head, args) = m.unapp();
                    let id = head.meta_id()?;
                    let v = self.exprs.get(&id)?;
                    let f = self.instantiate(v);
                    let args = args.iter().map(|&arg| self.instantiate(arg)).collect::<Vec<_>>();
                    Some(f.apply(args).head_beta())
                }
                Term::Local(inner) => Some(mk_local(
                    inner.id,
                    inner.pp_name.clone(),
                    self.instantiate(&inner.ty),
                    inner.binder,
                )),
                Term::Sort(inner) => Some(mk_sort(self.instantiate_level(&inner.level))),
                Term::Const(inner) => Some(mk_const(
                    inner.name.clone(),
                    inner.levels.iter().map(|l| self.instantiate_level(l)).collect(),
                )),
                _ => None,
            }
        })
    }
}

#[derive(Debug, Clone)]
pub enum Constraint {
    Eq(Term, Term),
    Level(Level, Level),
}

impl Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::Eq(a, b) => write!(f, "{a} =?= {b}"),
            Constraint::Level(a, b) => write!(f, "{a} =?= {b}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnifierConfig {
    /// Drop constraints that remain unsolved instead of returning them.
    pub discard: bool,
    pub max_steps: usize,
}

impl Default for UnifierConfig {
    fn default() -> Self {
        UnifierConfig {
            discard: true,
            max_steps: 10_000,
        }
    }
}

pub type Solutions<'s> =
    Box<dyn Iterator<Item = anyhow::Result<(Substitution, Vec<Constraint>)>> + 's>;

pub trait Unifier {
    /// Solves `constraints` on top of `subst`. Each item is an extended substitution together
    /// with the constraints left unsolved. An empty stream means there is no solution.
    fn unify<'s>(
        &'s self,
        tc: &'s TypeChecker<'s>,
        constraints: Vec<Constraint>,
        subst: Substitution,
        config: UnifierConfig,
    ) -> Solutions<'s>;
}

/// First-order unification extended with Miller patterns. Yields at most one solution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternUnifier;

impl Unifier for PatternUnifier {
    fn unify<'s>(
        &'s self,
        tc: &'s TypeChecker<'s>,
        constraints: Vec<Constraint>,
        subst: Substitution,
        config: UnifierConfig,
    ) -> Solutions<'s> {
        Box::new(
            std::iter::once_with(move || {
                let solver = Solver {
                    tc,
                    subst,
                    config,
                    steps: 0,
                };
                solver.solve(constraints)
            })
            .filter_map(Result::transpose),
        )
    }
}

enum Step {
    Done,
    Assigned,
    Fail,
}

struct Solver<'s> {
    tc: &'s TypeChecker<'s>,
    subst: Substitution,
    config: UnifierConfig,
    steps: usize,
}

impl Solver<'_> {
    fn solve(
        mut self,
        constraints: Vec<Constraint>,
    ) -> anyhow::Result<Option<(Substitution, Vec<Constraint>)>> {
        let mut queue = VecDeque::from(constraints);
        let mut postponed = vec![];
        loop {
            let mut progress = false;
            while let Some(c) = queue.pop_front() {
                self.steps += 1;
                if self.steps > self.config.max_steps {
                    bail!("unifier gave up after {} steps", self.config.max_steps);
                }
                match self.step(c, &mut queue, &mut postponed)? {
                    Step::Done => {}
                    Step::Assigned => progress = true,
                    Step::Fail => return Ok(None),
                }
            }
            if !progress || postponed.is_empty() {
                break;
            }
            queue.extend(postponed.drain(..));
        }
        if log::log_enabled!(log::Level::Trace) {
            for c in &postponed {
                log::trace!("unsolved constraint: {c}");
            }
        }
        if self.config.discard {
            postponed.clear();
        }
        Ok(Some((self.subst, postponed)))
    }

    fn step(
        &mut self,
        c: Constraint,
        queue: &mut VecDeque<Constraint>,
        postponed: &mut Vec<Constraint>,
    ) -> anyhow::Result<Step> {
        match c {
            Constraint::Level(l1, l2) => {
                let l1 = self.subst.instantiate_level(&l1);
                let l2 = self.subst.instantiate_level(&l2);
                Ok(self.step_level(l1, l2, postponed))
            }
            Constraint::Eq(a, b) => {
                let a = self.subst.instantiate(&a);
                let b = self.subst.instantiate(&b);
                if a == b {
                    return Ok(Step::Done);
                }
                if let Some(step) = self.try_assign(&a, &b) {
                    return Ok(step);
                }
                if let Some(step) = self.try_assign(&b, &a) {
                    return Ok(step);
                }
                if a.is_meta_app() || b.is_meta_app() {
                    postponed.push(Constraint::Eq(a, b));
                    return Ok(Step::Done);
                }
                let mut cs = vec![];
                if !self.tc.is_def_eq(&a, &b, &mut cs)? {
                    return Ok(Step::Fail);
                }
                queue.extend(cs);
                Ok(Step::Done)
            }
        }
    }

    fn step_level(&mut self, l1: Level, l2: Level, postponed: &mut Vec<Constraint>) -> Step {
        if l1.is_equiv(&l2) {
            return Step::Done;
        }
        for (l, r) in [(&l1, &l2), (&l2, &l1)] {
            if let Level::Meta(id) = l {
                if !r.occurs_meta(*id) {
                    self.subst.assign_level(*id, r.clone());
                    return Step::Assigned;
                }
            }
        }
        if l1.has_meta() || l2.has_meta() {
            postponed.push(Constraint::Level(l1, l2));
            return Step::Done;
        }
        Step::Fail
    }

    // ?M x₁ ⋯ xₙ =?= t  with distinct locals xᵢ  ~>  ?M := λ x₁ ⋯ xₙ, t
    fn try_assign(&mut self, lhs: &Term, rhs: &Term) -> Option<Step> {
        let (head, args) = lhs.unapp();
        let id = head.meta_id()?;
        let mut ids = Vec::with_capacity(args.len());
        for arg in &args {
            let x = arg.local_id()?;
            if ids.contains(&x) {
                return None;
            }
            ids.push(x);
        }
        if rhs.occurs_meta(id) {
            return Some(Step::Fail);
        }
        let escapes = rhs.find(&mut |m| match m.local_id() {
            Some(x) => !ids.contains(&x),
            None => false,
        });
        if escapes {
            return None;
        }
        let xs = args.into_iter().cloned().collect::<Vec<_>>();
        let value = mk_lambda_locals(&xs, rhs);
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("assign ?m{id} := {value}");
        }
        self.subst.assign(id, value);
        Some(Step::Assigned)
    }
}
