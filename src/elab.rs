//! Elaboration of user-supplied terms into a goal's scope, and type class instance resolution.

use std::collections::HashMap;

use anyhow::{bail, ensure};

use crate::local_context::LocalContext;
use crate::tc::TypeChecker;
use crate::tt::{mk_const, mk_fresh_level_meta, BinderInfo, Id, Term};
use crate::unify::Constraint;

pub trait Elaborator {
    /// Elaborates `term` under `ctx`, checking it against `expected` when given. Returns the
    /// elaborated term together with the constraints its typing produced.
    fn elaborate(
        &self,
        tc: &TypeChecker<'_>,
        ctx: &LocalContext,
        term: &Term,
        expected: Option<&Term>,
    ) -> anyhow::Result<(Term, Vec<Constraint>)>;
}

/// Checks that a term only mentions hypotheses of the goal and turns its placeholders (bare
/// metavariables) into fresh metavariables scoped over the goal's context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedElaborator;

impl Elaborator for ScopedElaborator {
    fn elaborate(
        &self,
        tc: &TypeChecker<'_>,
        ctx: &LocalContext,
        term: &Term,
        expected: Option<&Term>,
    ) -> anyhow::Result<(Term, Vec<Constraint>)> {
        ensure!(term.is_closed(), "term has loose bound variables: {term}");
        ensure!(!term.has_slot(), "term contains pattern slots: {term}");
        let mut foreign = None;
        term.find(&mut |m| match m {
            Term::Local(inner) if !ctx.contains(inner.id) => {
                foreign = Some(inner.pp_name.clone());
                true
            }
            _ => false,
        });
        if let Some(name) = foreign {
            bail!("unknown hypothesis '{name}'");
        }
        let mut fresh = HashMap::new();
        let t = freshen(ctx, term, &mut fresh);
        let ty = tc.infer(&t)?;
        let mut cs = vec![];
        if let Some(expected) = expected {
            ensure!(
                tc.is_def_eq(&ty, expected, &mut cs)?,
                "type mismatch: {t} has type {ty} but is expected to have type {expected}"
            );
        }
        Ok((t, cs))
    }
}

fn freshen(ctx: &LocalContext, t: &Term, fresh: &mut HashMap<Id, Term>) -> Term {
    if !t.has_expr_meta() {
        return t.clone();
    }
    t.replace(&mut |m, _| {
        let Term::Meta(inner) = m else {
            return None;
        };
        if let Some(m) = fresh.get(&inner.id) {
            return Some(m.clone());
        }
        let ty = freshen(ctx, &inner.ty, fresh);
        let m = ctx.mk_meta(Some(&ty));
        fresh.insert(inner.id, m.clone());
        Some(m)
    })
}

pub trait InstanceResolver {
    /// Finds an inhabitant of the class `ty` under `ctx`.
    fn resolve(
        &self,
        tc: &TypeChecker<'_>,
        ctx: &LocalContext,
        ty: &Term,
    ) -> anyhow::Result<Option<(Term, Vec<Constraint>)>>;
}

/// Tries instance-implicit hypotheses from the innermost one, then the instances declared in the
/// environment in declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvInstances;

impl InstanceResolver for EnvInstances {
    fn resolve(
        &self,
        tc: &TypeChecker<'_>,
        ctx: &LocalContext,
        ty: &Term,
    ) -> anyhow::Result<Option<(Term, Vec<Constraint>)>> {
        for l in ctx.locals().iter().rev() {
            let Term::Local(inner) = l else {
                continue;
            };
            if inner.binder != BinderInfo::InstImplicit {
                continue;
            }
            let mut cs = vec![];
            if tc.is_def_eq(&inner.ty, ty, &mut cs)? && cs.is_empty() {
                return Ok(Some((l.clone(), cs)));
            }
        }
        for decl in tc.env().instances() {
            let levels = decl
                .level_params
                .iter()
                .map(|_| mk_fresh_level_meta())
                .collect();
            let inst = mk_const(decl.name.clone(), levels);
            let inst_ty = tc.infer(&inst)?;
            let mut cs = vec![];
            if tc.is_def_eq(&inst_ty, ty, &mut cs)? {
                return Ok(Some((inst, cs)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;
    use crate::tc::Transparency;
    use crate::tt::{mk_app, mk_fresh_local, mk_fresh_meta, mk_local, mk_type, Name};

    fn c(name: &str) -> Term {
        mk_const(Name::from_str(name), vec![])
    }

    fn fixture() -> Env {
        let mut env = Env::new(true);
        env.add_axiom("nat", &[], mk_type()).unwrap();
        env.add_axiom("zero", &[], c("nat")).unwrap();
        env.add_axiom("inhabited", &[], crate::tt::mk_arrow(mk_type(), mk_type())).unwrap();
        env.add_axiom("inhabited.mk", &[], mk_app(c("inhabited"), c("nat")))
            .unwrap();
        env.add_instance("nat_inhabited", mk_app(c("inhabited"), c("nat")), c("inhabited.mk"))
            .unwrap();
        env
    }

    #[test]
    fn rejects_foreign_hypotheses() {
        let env = fixture();
        let tc = TypeChecker::new(&env, &Transparency::All);
        let h = mk_fresh_local(Name::from_str("h"), c("nat"));
        let ctx = LocalContext::new();
        let err = ScopedElaborator.elaborate(&tc, &ctx, &h, None).unwrap_err();
        insta::assert_snapshot!(err, @"unknown hypothesis 'h'");
    }

    #[test]
    fn placeholders_are_scoped_over_context() {
        let env = fixture();
        let tc = TypeChecker::new(&env, &Transparency::All);
        let h = mk_fresh_local(Name::from_str("h"), c("nat"));
        let ctx = LocalContext::from_locals(&[h]).unwrap();
        let m = mk_fresh_meta(c("nat"));
        let (t, cs) = ScopedElaborator
            .elaborate(&tc, &ctx, &m, Some(&c("nat")))
            .unwrap();
        assert!(cs.is_empty());
        assert!(t.is_meta_app());
        assert_eq!(t.args().len(), 1);
        assert_ne!(t.head().meta_id(), m.meta_id());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let env = fixture();
        let tc = TypeChecker::new(&env, &Transparency::All);
        let ctx = LocalContext::new();
        let err = ScopedElaborator
            .elaborate(&tc, &ctx, &c("zero"), Some(&mk_type()))
            .unwrap_err();
        insta::assert_snapshot!(err, @"type mismatch: zero has type nat but is expected to have type Type");
    }

    #[test]
    fn resolves_local_then_global_instances() {
        let env = fixture();
        let tc = TypeChecker::new(&env, &Transparency::All);
        let class = mk_app(c("inhabited"), c("nat"));
        let ctx = LocalContext::new();
        let (inst, _) = EnvInstances.resolve(&tc, &ctx, &class).unwrap().unwrap();
        assert_eq!(inst, c("nat_inhabited"));

        let local = mk_local(
            Id::fresh(),
            Name::from_str("inst"),
            class.clone(),
            BinderInfo::InstImplicit,
        );
        let ctx = LocalContext::from_locals(&[local.clone()]).unwrap();
        let (inst, _) = EnvInstances.resolve(&tc, &ctx, &class).unwrap().unwrap();
        assert_eq!(inst, local);

        let other = mk_app(c("inhabited"), mk_type());
        assert!(EnvInstances.resolve(&tc, &ctx, &other).unwrap().is_none());
    }
}
