//! Ordered local hypotheses with a de Bruijn abstracted mirror, used to create metavariables
//! scoped over the whole context.

use thiserror::Error;

use crate::tt::{
    mk_fresh_level_meta, mk_fresh_meta, mk_pi, mk_sort, BinderInfo, Id, Name, Term,
};

/// Internal misuse of the API. Never a tactic failure.
#[derive(Debug, Clone, Error)]
pub enum ContractViolation {
    #[error("expected a local constant, found {0}")]
    NotALocal(Term),
    #[error("local constant {0} is already in the context")]
    DuplicateLocal(Term),
    #[error("malformed goal {0}: expected a metavariable applied to local constants")]
    MalformedGoal(Term),
}

#[derive(Debug, Clone)]
struct AbstractedLocal {
    pp_name: Name,
    binder: BinderInfo,
    /// Type with the preceding locals replaced by loose bound variables.
    ty: Term,
}

#[derive(Debug, Clone, Default)]
pub struct LocalContext {
    ctx: Vec<Term>,
    ids: Vec<Id>,
    abstracted: Vec<AbstractedLocal>,
}

impl LocalContext {
    pub fn new() -> LocalContext {
        LocalContext::default()
    }

    pub fn from_locals(locals: &[Term]) -> Result<LocalContext, ContractViolation> {
        let mut ctx = LocalContext::new();
        ctx.set_ctx(locals)?;
        Ok(ctx)
    }

    /// Appends `l`, which must be a local constant not yet in the context.
    pub fn add_local(&mut self, l: Term) -> Result<(), ContractViolation> {
        let Term::Local(inner) = &l else {
            return Err(ContractViolation::NotALocal(l));
        };
        if self.ids.contains(&inner.id) {
            return Err(ContractViolation::DuplicateLocal(l));
        }
        let entry = AbstractedLocal {
            pp_name: inner.pp_name.clone(),
            binder: inner.binder,
            ty: inner.ty.close(&self.ids, 0),
        };
        self.ids.push(inner.id);
        self.abstracted.push(entry);
        self.ctx.push(l);
        Ok(())
    }

    /// Replaces the whole context. Quadratic in the number of locals.
    pub fn set_ctx(&mut self, locals: &[Term]) -> Result<(), ContractViolation> {
        self.ctx.clear();
        self.ids.clear();
        self.abstracted.clear();
        for l in locals {
            self.add_local(l.clone())?;
        }
        Ok(())
    }

    pub fn locals(&self) -> &[Term] {
        &self.ctx
    }

    pub fn len(&self) -> usize {
        self.ctx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctx.is_empty()
    }

    pub fn mirror_len(&self) -> usize {
        self.abstracted.len()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.ids.contains(&id)
    }

    /// The innermost local with the given display name.
    pub fn find(&self, pp_name: &Name) -> Option<&Term> {
        self.ctx.iter().rev().find(|l| match l {
            Term::Local(inner) => inner.pp_name == *pp_name,
            _ => false,
        })
    }

    /// Replaces the locals of the context in `e` with loose bound variables, the last local
    /// becoming `#0`.
    pub fn abstract_locals(&self, e: &Term) -> Term {
        e.close(&self.ids, 0)
    }

    /// `Π ctx, e`
    pub fn pi_abstract_context(&self, e: &Term) -> Term {
        let mut body = self.abstract_locals(e);
        for entry in self.abstracted.iter().rev() {
            body = mk_pi(entry.pp_name.clone(), entry.binder, entry.ty.clone(), body);
        }
        body
    }

    /// `f ctx`
    pub fn apply_context(&self, f: &Term) -> Term {
        f.apply(self.ctx.iter().cloned())
    }

    /// A fresh metavariable of type `Π ctx, Sort ?u`.
    pub fn mk_type_metavar(&self) -> Term {
        let sort = mk_sort(mk_fresh_level_meta());
        mk_fresh_meta(self.pi_abstract_context(&sort))
    }

    /// `?T ctx` for a fresh `?T : Π ctx, Sort ?u`.
    pub fn mk_type_meta(&self) -> Term {
        self.apply_context(&self.mk_type_metavar())
    }

    /// A fresh metavariable of type `Π ctx, ty`. A fresh type is created when `ty` is `None`.
    pub fn mk_metavar(&self, ty: Option<&Term>) -> Term {
        let ty = match ty {
            Some(ty) => ty.clone(),
            None => self.mk_type_meta(),
        };
        mk_fresh_meta(self.pi_abstract_context(&ty))
    }

    /// `?m ctx` for a fresh `?m : Π ctx, ty`. Under this context it behaves as a placeholder of
    /// type `ty`.
    pub fn mk_meta(&self, ty: Option<&Term>) -> Term {
        self.apply_context(&self.mk_metavar(ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tt::{mk_const, mk_fresh_local, mk_pi_locals, mk_type};

    fn nat() -> Term {
        mk_const(Name::from_str("nat"), vec![])
    }

    fn sample_locals() -> Vec<Term> {
        let a = mk_fresh_local(Name::from_str("A"), mk_type());
        let x = mk_fresh_local(Name::from_str("x"), a.clone());
        let n = mk_fresh_local(Name::from_str("n"), nat());
        vec![a, x, n]
    }

    #[test]
    fn mirror_tracks_context() {
        let locals = sample_locals();
        let mut ctx = LocalContext::new();
        for l in &locals {
            ctx.add_local(l.clone()).unwrap();
            assert_eq!(ctx.len(), ctx.mirror_len());
        }
        ctx.set_ctx(&locals[..2]).unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.mirror_len(), 2);
        ctx.set_ctx(&[]).unwrap();
        assert_eq!(ctx.mirror_len(), 0);
    }

    #[test]
    fn mirror_has_no_free_locals() {
        let ctx = LocalContext::from_locals(&sample_locals()).unwrap();
        for entry in &ctx.abstracted {
            assert!(!entry.ty.has_local());
        }
    }

    #[test]
    fn rejects_non_locals_and_duplicates() {
        let mut ctx = LocalContext::new();
        let err = ctx.add_local(nat()).unwrap_err();
        assert!(matches!(err, ContractViolation::NotALocal(_)));
        let x = mk_fresh_local(Name::from_str("x"), nat());
        ctx.add_local(x.clone()).unwrap();
        let err = ctx.add_local(x).unwrap_err();
        assert!(matches!(err, ContractViolation::DuplicateLocal(_)));
        assert_eq!(ctx.len(), ctx.mirror_len());
    }

    #[test]
    fn pi_abstract_agrees_with_binding_locals() {
        let locals = sample_locals();
        let ctx = LocalContext::from_locals(&locals).unwrap();
        let body = mk_const(Name::from_str("P"), vec![]).apply(locals.iter().cloned());
        assert_eq!(ctx.pi_abstract_context(&body), mk_pi_locals(&locals, &body));
        insta::assert_snapshot!(
            ctx.pi_abstract_context(&body),
            @"Π (A : Type), Π (x : A), Π (n : nat), P A x n"
        );
    }

    #[test]
    fn meta_is_scoped_over_context() {
        let locals = sample_locals();
        let ctx = LocalContext::from_locals(&locals).unwrap();
        let m = ctx.mk_meta(Some(&nat()));
        let (head, args) = m.unapp();
        let Term::Meta(inner) = head else {
            panic!("expected a metavariable application");
        };
        assert_eq!(args.len(), 3);
        assert!(inner.ty.is_closed());
        assert!(!inner.ty.has_local());
        assert!(inner.ty.is_pi());

        let t = ctx.mk_type_meta();
        assert_eq!(t.args().len(), 3);
        assert!(t.head().is_meta());
    }
}
