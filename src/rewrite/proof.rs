//! Proof terms for rewritten goals and hypotheses.

use crate::env::{mk_eq, EQ_REC};
use crate::step::Occurrence;
use crate::tc::TypeChecker;
use crate::tt::{mk_const, mk_lam, mk_var, BinderInfo, Level, Name, Term};

/// Replaces the selected occurrences of the closed term `a` in `e` by the loose variable `#vidx`,
/// counting occurrences from 1 in pre-order. Returns `None` if no occurrence was selected.
pub fn abstract_occurrences(e: &Term, a: &Term, occ: &Occurrence, vidx: usize) -> Option<Term> {
    let mut i = 0;
    let mut found = false;
    let e = e.replace(&mut |m, offset| {
        if m.metadata().bound > 0 || m != a {
            return None;
        }
        i += 1;
        if !occ.contains(i) {
            return Some(m.clone());
        }
        found = true;
        Some(mk_var(offset + vidx))
    });
    found.then_some(e)
}

/// `P a` with the rewritten occurrences of `a` abstracted, ready to be transported to `P b`.
#[derive(Debug, Clone)]
pub struct Abstraction {
    /// Body of the motive.
    pub px: Term,
    /// `P b`
    pub new_ty: Term,
    /// The type of `a` and `b`.
    pub carrier: Term,
    /// Level of the sort of `P a`.
    pub l1: Level,
    /// Level of the sort of the carrier.
    pub l2: Level,
}

pub struct ProofBuilder<'a> {
    tc: &'a TypeChecker<'a>,
    dep_elim: bool,
}

impl<'a> ProofBuilder<'a> {
    pub fn new(tc: &'a TypeChecker<'a>) -> ProofBuilder<'a> {
        ProofBuilder {
            tc,
            dep_elim: tc.env().eq_has_dep_elim(),
        }
    }

    /// De Bruijn index of the rewritten position inside the motive's body.
    fn vidx(&self) -> usize {
        if self.dep_elim {
            1
        } else {
            0
        }
    }

    /// Abstracts the selected occurrences of `a` in `pa` and instantiates them with `b`.
    pub fn abstract_target(
        &self,
        pa: &Term,
        a: &Term,
        b: &Term,
        occ: &Occurrence,
    ) -> anyhow::Result<Option<Abstraction>> {
        let vidx = self.vidx();
        let Some(px) = abstract_occurrences(pa, a, occ, vidx) else {
            return Ok(None);
        };
        let new_ty = px.open(std::slice::from_ref(b), vidx);
        let carrier = self.tc.infer(a)?;
        let l1 = self.tc.ensure_type(pa)?;
        let l2 = self.tc.ensure_type(&carrier)?;
        Ok(Some(Abstraction {
            px,
            new_ty,
            carrier,
            l1,
            l2,
        }))
    }

    /// `λ x, P x`, or `λ x (H : from = x), P x` with dependent elimination.
    pub fn motive(&self, abs: &Abstraction, from: &Term) -> Term {
        let x = Name::from_str("x");
        if !self.dep_elim {
            return mk_lam(x, BinderInfo::Default, abs.carrier.clone(), abs.px.clone());
        }
        let h_ty = mk_eq(&abs.l2, &abs.carrier, from, &mk_var(0));
        let inner = mk_lam(Name::from_str("H"), BinderInfo::Default, h_ty, abs.px.clone());
        mk_lam(x, BinderInfo::Default, abs.carrier.clone(), inner)
    }

    /// `@eq.rec motive minor heq` where `heq : from = to` and `minor : P from`.
    fn transport(&self, abs: &Abstraction, from: &Term, to: &Term, minor: &Term, heq: &Term) -> Term {
        mk_const(EQ_REC.clone(), vec![abs.l1.clone(), abs.l2.clone()]).apply([
            abs.carrier.clone(),
            from.clone(),
            self.motive(abs, from),
            minor.clone(),
            to.clone(),
            heq.clone(),
        ])
    }

    /// A proof of `P a` from `m : P b` and `heq : b = a`.
    pub fn goal_proof(&self, abs: &Abstraction, a: &Term, b: &Term, m: &Term, heq: &Term) -> Term {
        self.transport(abs, b, a, m, heq)
    }

    /// A proof of `P b` from `hyp : P a` and `heq : a = b`.
    pub fn hyp_proof(&self, abs: &Abstraction, a: &Term, b: &Term, hyp: &Term, heq: &Term) -> Term {
        self.transport(abs, a, b, hyp, heq)
    }
}
