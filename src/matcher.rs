//! Matching of slot patterns against closed terms.
//!
//! A pattern is a term whose metavariables have been replaced by dense slots. Matching is
//! structural; a [MatchPlugin] can take over application nodes and retry a failed comparison.

use std::collections::HashMap;
use std::iter::zip;

use crate::tc::TypeChecker;
use crate::tt::{
    mk_const, mk_level_imax, mk_level_max, mk_level_succ, mk_slot, Id, Level, Term,
};

#[derive(Debug, Clone)]
pub struct MatchPattern {
    pub term: Term,
    pub expr_slots: usize,
    pub level_slots: usize,
}

impl MatchPattern {
    /// Renumbers the metavariables of `e` into slots.
    ///
    /// A binder containing metavariables becomes a single slot. A metavariable application
    /// becomes a slot, shared with identical applications when none of its arguments is itself a
    /// metavariable application. Universe metavariables of constants become level slots.
    pub fn new(e: &Term) -> MatchPattern {
        let mut emap: HashMap<Term, usize> = HashMap::new();
        let mut lmap: HashMap<Id, usize> = HashMap::new();
        let mut expr_slots = 0;
        let term = e.replace(&mut |m, _| {
            if !m.has_meta() {
                return Some(m.clone());
            }
            match m {
                Term::Lam(_) | Term::Pi(_) => {
                    expr_slots += 1;
                    Some(mk_slot(expr_slots - 1))
                }
                _ if m.is_meta_app() => {
                    if let Some(&i) = emap.get(m) {
                        return Some(mk_slot(i));
                    }
                    let i = expr_slots;
                    expr_slots += 1;
                    if !m.args().iter().any(|arg| arg.is_meta_app()) {
                        emap.insert(m.clone(), i);
                    }
                    Some(mk_slot(i))
                }
                Term::Const(inner) => Some(mk_const(
                    inner.name.clone(),
                    inner.levels.iter().map(|l| slot_level(l, &mut lmap)).collect(),
                )),
                _ => None,
            }
        });
        MatchPattern {
            term,
            expr_slots,
            level_slots: lmap.len(),
        }
    }
}

fn slot_level(l: &Level, lmap: &mut HashMap<Id, usize>) -> Level {
    match l {
        Level::Meta(id) => {
            let next = lmap.len();
            Level::Slot(*lmap.entry(*id).or_insert(next))
        }
        Level::Succ(inner) => mk_level_succ(slot_level(inner, lmap)),
        Level::Max(inner) => mk_level_max(slot_level(&inner.0, lmap), slot_level(&inner.1, lmap)),
        Level::IMax(inner) => {
            mk_level_imax(slot_level(&inner.0, lmap), slot_level(&inner.1, lmap))
        }
        Level::Zero | Level::Param(_) | Level::Slot(_) => l.clone(),
    }
}

/// Slot assignments of one matching attempt.
#[derive(Debug, Clone, Default)]
pub struct MatchSubst {
    exprs: Vec<Option<Term>>,
    levels: Vec<Option<Level>>,
}

impl MatchSubst {
    pub fn new(pattern: &MatchPattern) -> MatchSubst {
        MatchSubst {
            exprs: vec![None; pattern.expr_slots],
            levels: vec![None; pattern.level_slots],
        }
    }

    /// Forgets every assignment, keeping the number of slots.
    pub fn reset(&mut self) {
        self.exprs.iter_mut().for_each(|e| *e = None);
        self.levels.iter_mut().for_each(|l| *l = None);
    }

    pub fn is_clear(&self) -> bool {
        self.exprs.iter().all(Option::is_none) && self.levels.iter().all(Option::is_none)
    }

    pub fn get(&self, i: usize) -> Option<&Term> {
        self.exprs.get(i)?.as_ref()
    }

    pub fn get_level(&self, i: usize) -> Option<&Level> {
        self.levels.get(i)?.as_ref()
    }

    /// Replaces the assigned slots of `p`.
    pub fn instantiate(&self, p: &Term) -> Term {
        if !p.has_slot() {
            return p.clone();
        }
        p.replace(&mut |m, _| {
            if !m.has_slot() {
                return Some(m.clone());
            }
            match m {
                Term::Slot(inner) => Some(self.get(inner.index).cloned().unwrap_or_else(|| m.clone())),
                Term::Const(inner) => Some(mk_const(
                    inner.name.clone(),
                    inner
                        .levels
                        .iter()
                        .map(|l| {
                            l.replace(&|l| match l {
                                Level::Slot(i) => self.get_level(*i).cloned(),
                                _ => None,
                            })
                        })
                        .collect(),
                )),
                _ => None,
            }
        })
    }
}

pub trait MatchPlugin {
    /// Decides `p` against `t` before structural matching. `None` falls through.
    fn pre(&self, _p: &Term, _t: &Term, _m: &mut Matcher<'_>) -> Option<bool> {
        None
    }

    /// Called when structural matching failed. Assignments made by the failed attempt are
    /// already undone.
    fn on_failure(&self, _p: &Term, _t: &Term, _m: &mut Matcher<'_>) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlugin;

impl MatchPlugin for NoPlugin {}

pub struct Matcher<'a> {
    subst: &'a mut MatchSubst,
    plugin: &'a dyn MatchPlugin,
    assigned: bool,
}

impl<'a> Matcher<'a> {
    pub fn new(subst: &'a mut MatchSubst, plugin: &'a dyn MatchPlugin) -> Matcher<'a> {
        Matcher {
            subst,
            plugin,
            assigned: false,
        }
    }

    /// Whether some slot has been assigned since the matcher was created.
    pub fn assigned(&self) -> bool {
        self.assigned
    }

    pub fn is_match(&mut self, p: &Term, t: &Term) -> bool {
        if !p.has_slot() && p == t {
            return true;
        }
        let plugin = self.plugin;
        let saved = p.has_slot().then(|| self.subst.clone());
        let decided = plugin.pre(p, t, self);
        let ok = match decided {
            Some(r) => r,
            None => self.match_core(p, t),
        };
        if ok {
            return true;
        }
        if let Some(saved) = saved {
            *self.subst = saved;
        }
        decided.is_none() && plugin.on_failure(p, t, self)
    }

    fn match_core(&mut self, p: &Term, t: &Term) -> bool {
        match (p, t) {
            (Term::Slot(inner), _) => self.assign(inner.index, t),
            (Term::Sort(a), Term::Sort(b)) => self.match_level(&a.level, &b.level),
            (Term::Const(a), Term::Const(b)) => {
                a.name == b.name
                    && a.levels.len() == b.levels.len()
                    && zip(&a.levels, &b.levels).all(|(l1, l2)| self.match_level(l1, l2))
            }
            (Term::App(a), Term::App(b)) => {
                self.is_match(&a.fun, &b.fun) && self.is_match(&a.arg, &b.arg)
            }
            (Term::Lam(a), Term::Lam(b)) | (Term::Pi(a), Term::Pi(b)) => {
                self.is_match(&a.dom, &b.dom) && self.is_match(&a.body, &b.body)
            }
            (Term::Ext(a), Term::Ext(b)) => {
                a.def == b.def
                    && a.args.len() == b.args.len()
                    && zip(&a.args, &b.args).all(|(x, y)| self.is_match(x, y))
            }
            _ => p == t,
        }
    }

    fn assign(&mut self, i: usize, t: &Term) -> bool {
        if !t.is_closed() {
            return false;
        }
        match self.subst.exprs.get_mut(i) {
            Some(Some(v)) => v == t,
            Some(slot) => {
                *slot = Some(t.clone());
                self.assigned = true;
                true
            }
            None => false,
        }
    }

    fn match_level(&mut self, p: &Level, l: &Level) -> bool {
        match (p, l) {
            (Level::Slot(i), _) => match self.subst.levels.get_mut(*i) {
                Some(Some(v)) => v.is_equiv(l),
                Some(slot) => {
                    *slot = Some(l.clone());
                    self.assigned = true;
                    true
                }
                None => false,
            },
            (Level::Succ(a), Level::Succ(b)) => self.match_level(a, b),
            (Level::Max(a), Level::Max(b)) | (Level::IMax(a), Level::IMax(b)) => {
                self.match_level(&a.0, &b.0) && self.match_level(&a.1, &b.1)
            }
            _ => !p.has_slot() && p.is_equiv(l),
        }
    }
}

/// Matching hooks of the rewrite tactic, evaluated with the matching type checker.
pub struct RewriteMatchPlugin<'a> {
    tc: &'a TypeChecker<'a>,
}

impl<'a> RewriteMatchPlugin<'a> {
    pub fn new(tc: &'a TypeChecker<'a>) -> RewriteMatchPlugin<'a> {
        RewriteMatchPlugin { tc }
    }
}

impl MatchPlugin for RewriteMatchPlugin<'_> {
    // Arguments synthesized by instance resolution are skipped: they are recovered by
    // unification once the rest of the application has matched.
    fn pre(&self, p: &Term, t: &Term, m: &mut Matcher<'_>) -> Option<bool> {
        if !matches!(p, Term::App(_)) || !matches!(t, Term::App(_)) {
            return None;
        }
        let (p_fn, p_args) = p.unapp();
        let (t_fn, t_args) = t.unapp();
        let (Term::Const(head), Term::Const(_)) = (p_fn, t_fn) else {
            return None;
        };
        if !m.is_match(p_fn, t_fn) {
            return None;
        }
        let env = self.tc.env();
        if let Some(info) = env.projection(&head.name).filter(|info| info.inst_implicit) {
            if p_args.len() != t_args.len() {
                return Some(false);
            }
            for (i, (x, y)) in zip(&p_args, &t_args).enumerate() {
                if i != info.nparams && !m.is_match(x, y) {
                    return Some(false);
                }
            }
            return Some(true);
        }
        let skip = env.get(&head.name)?.inst_implicit_positions();
        if skip.is_empty() {
            return None;
        }
        if p_args.len() != t_args.len() {
            return Some(false);
        }
        for (i, (x, y)) in zip(&p_args, &t_args).enumerate() {
            if !skip.contains(&i) && !m.is_match(x, y) {
                // structural matching fails the same way and then retries on whnf
                return None;
            }
        }
        Some(true)
    }

    fn on_failure(&self, p: &Term, t: &Term, m: &mut Matcher<'_>) -> bool {
        let p1 = self.tc.whnf(p);
        let t1 = self.tc.whnf(t);
        if p1 == *p && t1 == *t {
            return false;
        }
        log::trace!("retrying match after whnf: {p1} =?= {t1}");
        m.is_match(&p1, &t1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Env, ProjectionInfo, Reducibility};
    use crate::tc::Transparency;
    use crate::tt::{
        mk_arrow, mk_fresh_level_meta, mk_fresh_local, mk_fresh_meta, mk_lambda_locals,
        mk_local, mk_pi_locals, mk_type, BinderInfo, Name,
    };

    fn c(name: &str) -> Term {
        mk_const(Name::from_str(name), vec![])
    }

    fn nat() -> Term {
        c("nat")
    }

    fn fixture() -> Env {
        let mut env = Env::new(true);
        env.add_axiom("nat", &[], mk_type()).unwrap();
        env.add_axiom("zero", &[], nat()).unwrap();
        env.add_axiom("succ", &[], mk_arrow(nat(), nat())).unwrap();
        env.add_axiom("add", &[], mk_arrow(nat(), mk_arrow(nat(), nat()))).unwrap();
        env.add_definition(
            "double",
            mk_arrow(nat(), nat()),
            {
                let x = mk_fresh_local(Name::from_str("x"), nat());
                mk_lambda_locals(&[x.clone()], &c("add").apply([x.clone(), x]))
            },
            Reducibility::Reducible,
        )
        .unwrap();
        env.add_definition("one", nat(), c("succ").apply([c("zero")]), Reducibility::Semireducible)
            .unwrap();
        env
    }

    fn run_match(env: &Env, transparency: Transparency, p: &Term, t: &Term) -> Option<MatchSubst> {
        let tc = TypeChecker::new(env, &transparency);
        let plugin = RewriteMatchPlugin::new(&tc);
        let pattern = MatchPattern::new(p);
        let mut subst = MatchSubst::new(&pattern);
        let ok = Matcher::new(&mut subst, &plugin).is_match(&pattern.term, t);
        ok.then_some(subst)
    }

    #[test]
    fn pattern_slots() {
        let x = mk_fresh_local(Name::from_str("x"), nat());
        let m = mk_fresh_meta(mk_arrow(nat(), nat()));
        let k = mk_fresh_meta(nat());
        // add (?m x) (?m x) ?k ?k with a universe metavariable in a constant
        let u = mk_fresh_level_meta();
        let f = mk_const(Name::from_str("f"), vec![u.clone(), u]);
        let e = f.apply([m.apply([x.clone()]), m.apply([x]), k.clone(), k]);
        let pattern = MatchPattern::new(&e);
        assert_eq!(pattern.expr_slots, 2);
        assert_eq!(pattern.level_slots, 1);
        insta::assert_snapshot!(pattern.term, @"f ?_0 ?_0 ?_1 ?_1");
    }

    #[test]
    fn binders_with_metas_are_one_slot() {
        let x = mk_fresh_local(Name::from_str("x"), nat());
        let k = mk_fresh_meta(nat());
        let lam = mk_lambda_locals(&[x.clone()], &c("add").apply([x, k]));
        let pattern = MatchPattern::new(&c("succ").apply([lam]));
        assert_eq!(pattern.expr_slots, 1);
        insta::assert_snapshot!(pattern.term, @"succ ?_0");
    }

    #[test]
    fn match_assigns_slots_consistently() {
        let env = fixture();
        let k = mk_fresh_meta(nat());
        let p = c("add").apply([k.clone(), k]);
        let one = c("succ").apply([c("zero")]);
        let subst = run_match(&env, Transparency::None, &p, &c("add").apply([one.clone(), one.clone()]))
            .unwrap();
        assert_eq!(subst.get(0), Some(&one));
        assert!(run_match(&env, Transparency::None, &p, &c("add").apply([one, c("zero")])).is_none());
    }

    #[test]
    fn reset_clears_assignments() {
        let k = mk_fresh_meta(nat());
        let pattern = MatchPattern::new(&c("succ").apply([k]));
        let mut subst = MatchSubst::new(&pattern);
        assert!(subst.is_clear());
        let assigned = {
            let mut m = Matcher::new(&mut subst, &NoPlugin);
            assert!(m.is_match(&pattern.term, &c("succ").apply([c("zero")])));
            m.assigned()
        };
        assert!(assigned);
        assert!(!subst.is_clear());
        insta::assert_snapshot!(subst.instantiate(&pattern.term), @"succ zero");
        subst.reset();
        assert!(subst.is_clear());
        assert_eq!(subst.get(0), None);
    }

    #[test]
    fn failed_matches_leave_no_assignments() {
        let k = mk_fresh_meta(nat());
        let pattern = MatchPattern::new(&c("add").apply([k, c("zero")]));
        let mut subst = MatchSubst::new(&pattern);
        let mut m = Matcher::new(&mut subst, &NoPlugin);
        assert!(!m.is_match(&pattern.term, &c("add").apply([c("zero"), c("one")])));
        drop(m);
        assert!(subst.is_clear());
    }

    #[test]
    fn only_reducible_definitions_unfold() {
        let env = fixture();
        let k = mk_fresh_meta(nat());
        let p = c("add").apply([k.clone(), k]);
        let t = c("double").apply([c("zero")]);
        assert!(run_match(&env, Transparency::Reducible, &p, &t).is_some());
        assert!(run_match(&env, Transparency::None, &p, &t).is_none());

        // `one` is semireducible
        let p = c("succ").apply([mk_fresh_meta(nat())]);
        assert!(run_match(&env, Transparency::Reducible, &p, &c("one")).is_none());
        assert!(run_match(&env, Transparency::All, &p, &c("one")).is_some());
    }

    #[test]
    fn instance_implicit_arguments_are_skipped() {
        let mut env = fixture();
        env.add_axiom("has_zero", &[], mk_arrow(mk_type(), mk_type())).unwrap();
        env.add_axiom("inst1", &[], c("has_zero").apply([nat()])).unwrap();
        env.add_axiom("inst2", &[], c("has_zero").apply([nat()])).unwrap();
        // is_zero : Π (A : Type) [s : has_zero A], A → Prop
        let a = mk_fresh_local(Name::from_str("A"), mk_type());
        let s = mk_local(
            Id::fresh(),
            Name::from_str("s"),
            c("has_zero").apply([a.clone()]),
            BinderInfo::InstImplicit,
        );
        let x = mk_fresh_local(Name::from_str("x"), a.clone());
        env.add_axiom("is_zero", &[], mk_pi_locals(&[a, s, x], &crate::tt::mk_prop()))
            .unwrap();
        // has_zero.zero : Π (A : Type) [s : has_zero A], A
        env.add_axiom("has_zero.mk", &[], mk_type()).unwrap();
        env.add_projection(
            "has_zero.zero",
            mk_arrow(mk_type(), mk_arrow(c("has_zero").apply([nat()]), nat())),
            ProjectionInfo {
                mk: Name::from_str("has_zero.mk"),
                nparams: 1,
                field: 0,
                inst_implicit: true,
            },
        )
        .unwrap();

        let p = c("is_zero").apply([nat(), c("inst1"), mk_fresh_meta(nat())]);
        let t = c("is_zero").apply([nat(), c("inst2"), c("zero")]);
        assert!(run_match(&env, Transparency::Reducible, &p, &t).is_some());
        assert!(run_match(&env, Transparency::Reducible, &p, &c("is_zero").apply([c("zero"), c("inst2"), c("zero")])).is_none());

        let p = c("has_zero.zero").apply([nat(), c("inst1")]);
        let t = c("has_zero.zero").apply([nat(), c("inst2")]);
        assert!(run_match(&env, Transparency::Reducible, &p, &t).is_some());
        assert!(run_match(&env, Transparency::None, &p, &c("has_zero.zero").apply([c("zero"), c("inst2")])).is_none());
    }
}
