//! Weak head normalization, type inference, and definitional equality under a configurable
//! transparency. Comparisons against metavariable applications are deferred as constraints.

use std::cell::Cell;
use std::sync::Arc;

use anyhow::bail;

use crate::env::{Declaration, Env, Reducibility, EQ_REC, EQ_REFL};
use crate::tt::{
    mk_lambda_locals, mk_level_imax, mk_level_succ, mk_local, mk_pi_locals, mk_sort, Id, Level,
    Name, Term, TermBinder,
};
use crate::unify::Constraint;

/// Decides which definitions a [TypeChecker] may delta-reduce.
pub trait Opacity {
    fn can_unfold(&self, decl: &Declaration) -> bool;

    fn reduces_projections(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transparency {
    /// Everything but irreducible definitions. Projections compute.
    All,
    /// Reducible definitions only. Projections are opaque.
    Reducible,
    None,
}

impl Opacity for Transparency {
    fn can_unfold(&self, decl: &Declaration) -> bool {
        match self {
            Transparency::All => decl.reducibility != Reducibility::Irreducible,
            Transparency::Reducible => decl.reducibility == Reducibility::Reducible,
            Transparency::None => false,
        }
    }

    fn reduces_projections(&self) -> bool {
        *self == Transparency::All
    }
}

/// Unfolds exactly the listed definitions and records whether any of them was unfolded.
#[derive(Debug, Default)]
pub struct UnfoldOnly {
    names: Vec<Name>,
    unfolded: Cell<bool>,
}

impl UnfoldOnly {
    pub fn new(names: Vec<Name>) -> UnfoldOnly {
        UnfoldOnly {
            names,
            unfolded: Cell::new(false),
        }
    }

    pub fn unfolded(&self) -> bool {
        self.unfolded.get()
    }
}

impl Opacity for UnfoldOnly {
    fn can_unfold(&self, decl: &Declaration) -> bool {
        let ok = self.names.contains(&decl.name);
        if ok {
            self.unfolded.set(true);
        }
        ok
    }

    fn reduces_projections(&self) -> bool {
        false
    }
}

pub struct TypeChecker<'a> {
    env: &'a Env,
    opacity: &'a dyn Opacity,
}

impl<'a> TypeChecker<'a> {
    pub fn new(env: &'a Env, opacity: &'a dyn Opacity) -> TypeChecker<'a> {
        TypeChecker { env, opacity }
    }

    pub fn env(&self) -> &'a Env {
        self.env
    }

    /// Beta, iota, projection, and extension reduction at the head. Never unfolds definitions
    /// except to expose the major premise of a recursor or projection.
    pub fn whnf_core(&self, t: &Term) -> Term {
        let mut t = t.clone();
        loop {
            let next = match &t {
                Term::App(_) => {
                    let (head, args) = t.unapp();
                    match head {
                        Term::Lam(_) => Some(t.head_beta()),
                        Term::Ext(inner) => inner
                            .def
                            .expand(&inner.args)
                            .map(|e| e.apply(args.iter().map(|&arg| arg.clone()))),
                        Term::Const(inner) => self
                            .reduce_recursor(&inner.name, &args)
                            .or_else(|| self.reduce_projection(&inner.name, &args)),
                        _ => None,
                    }
                }
                Term::Ext(inner) => inner.def.expand(&inner.args),
                _ => None,
            };
            match next {
                Some(next) => t = next,
                None => return t,
            }
        }
    }

    // eq.rec A a C m b (eq.refl A a) ⋯ ~> m ⋯
    fn reduce_recursor(&self, name: &Name, args: &[&Term]) -> Option<Term> {
        if *name != *EQ_REC || args.len() < 6 {
            return None;
        }
        let major = self.whnf(args[5]);
        if major.head().const_name() != Some(&EQ_REFL) {
            return None;
        }
        Some(args[3].apply(args[6..].iter().map(|&arg| arg.clone())))
    }

    // proj p₁ ⋯ pₙ (mk p₁ ⋯ pₙ f₁ ⋯ fₘ) ⋯ ~> fᵢ ⋯
    fn reduce_projection(&self, name: &Name, args: &[&Term]) -> Option<Term> {
        if !self.opacity.reduces_projections() {
            return None;
        }
        let info = self.env.projection(name)?;
        if args.len() <= info.nparams {
            return None;
        }
        let s = self.whnf(args[info.nparams]);
        let (head, fields) = s.unapp();
        if head.const_name() != Some(&info.mk) {
            return None;
        }
        let field = fields.get(info.nparams + info.field)?;
        Some(field.apply(args[info.nparams + 1..].iter().map(|&arg| arg.clone())))
    }

    /// Delta-reduces the head constant if the opacity allows it.
    pub fn unfold_head(&self, t: &Term) -> Option<Term> {
        let (head, args) = t.unapp();
        let Term::Const(inner) = head else {
            return None;
        };
        let decl = self.env.get(&inner.name)?;
        let value = decl.value.as_ref()?;
        if decl.level_params.len() != inner.levels.len() || !self.opacity.can_unfold(decl) {
            return None;
        }
        let value = value.instantiate_level_params(&decl.level_params, &inner.levels);
        Some(value.apply(args.into_iter().cloned()).head_beta())
    }

    pub fn whnf(&self, t: &Term) -> Term {
        let mut t = self.whnf_core(t);
        while let Some(next) = self.unfold_head(&t) {
            t = self.whnf_core(&next);
        }
        t
    }

    /// Full normalization with eta reduction of lambdas.
    pub fn normalize(&self, t: &Term) -> Term {
        let t = self.whnf(t);
        match &t {
            Term::App(_) => {
                let (head, args) = t.unapp();
                let args = args.iter().map(|&arg| self.normalize(arg)).collect::<Vec<_>>();
                head.apply(args)
            }
            Term::Lam(inner) | Term::Pi(inner) => {
                let dom = self.normalize(&inner.dom);
                let x = mk_local(Id::fresh(), inner.name.clone(), dom, inner.binder);
                let body = self.normalize(&inner.body.open(std::slice::from_ref(&x), 0));
                if let Term::Pi(_) = &t {
                    return mk_pi_locals(&[x], &body);
                }
                // η: λ x, f x ~> f
                if let Term::App(app) = &body {
                    if app.arg == x && !app.fun.occurs_local(x.local_id().unwrap_or_default()) {
                        return app.fun.clone();
                    }
                }
                mk_lambda_locals(&[x], &body)
            }
            Term::Ext(inner) => crate::tt::mk_ext(
                inner.def.clone(),
                inner.args.iter().map(|arg| self.normalize(arg)).collect(),
            ),
            _ => t,
        }
    }

    /// Infers the type of a well-typed term. Arguments are not checked against domains.
    pub fn infer(&self, t: &Term) -> anyhow::Result<Term> {
        match t {
            Term::Var(_) => bail!("cannot infer the type of a loose bound variable"),
            Term::Slot(_) => bail!("cannot infer the type of a pattern slot"),
            Term::Sort(inner) => Ok(mk_sort(mk_level_succ(inner.level.clone()))),
            Term::Const(inner) => {
                let Some(decl) = self.env.get(&inner.name) else {
                    bail!("unknown constant: {}", inner.name);
                };
                if decl.level_params.len() != inner.levels.len() {
                    bail!(
                        "constant {} expects {} universe levels but got {}",
                        inner.name,
                        decl.level_params.len(),
                        inner.levels.len()
                    );
                }
                Ok(decl
                    .ty
                    .instantiate_level_params(&decl.level_params, &inner.levels))
            }
            Term::Local(inner) => Ok(inner.ty.clone()),
            Term::Meta(inner) => Ok(inner.ty.clone()),
            Term::App(_) => {
                let (head, args) = t.unapp();
                let mut ty = self.infer(head)?;
                for arg in args {
                    let pi = self.ensure_pi(&ty)?;
                    ty = pi.body.open(std::slice::from_ref(arg), 0);
                }
                Ok(ty)
            }
            Term::Lam(inner) => {
                let x = mk_local(Id::fresh(), inner.name.clone(), inner.dom.clone(), inner.binder);
                let body = inner.body.open(std::slice::from_ref(&x), 0);
                let body_ty = self.infer(&body)?;
                Ok(mk_pi_locals(&[x], &body_ty))
            }
            Term::Pi(inner) => {
                let l1 = self.ensure_type(&inner.dom)?;
                let x = mk_local(Id::fresh(), inner.name.clone(), inner.dom.clone(), inner.binder);
                let body = inner.body.open(&[x], 0);
                let l2 = self.ensure_type(&body)?;
                Ok(mk_sort(mk_level_imax(l1, l2).normalize()))
            }
            Term::Ext(inner) => inner.def.get_type(&inner.args, &mut |e| self.infer(e)),
        }
    }

    pub fn ensure_pi(&self, ty: &Term) -> anyhow::Result<Arc<TermBinder>> {
        if let Term::Pi(inner) = ty {
            return Ok(inner.clone());
        }
        match self.whnf(ty) {
            Term::Pi(inner) => Ok(inner),
            _ => bail!("function expected, found {ty}"),
        }
    }

    pub fn ensure_sort(&self, ty: &Term) -> anyhow::Result<Level> {
        if let Term::Sort(inner) = ty {
            return Ok(inner.level.clone());
        }
        match self.whnf(ty) {
            Term::Sort(inner) => Ok(inner.level.clone()),
            _ => bail!("type expected, found {ty}"),
        }
    }

    /// The universe level of the type `t`.
    pub fn ensure_type(&self, t: &Term) -> anyhow::Result<Level> {
        let ty = self.infer(t)?;
        self.ensure_sort(&ty)
    }

    /// Definitional equality. Problems involving metavariable applications are not solved here
    /// but appended to `cs` and assumed to hold.
    pub fn is_def_eq(&self, a: &Term, b: &Term, cs: &mut Vec<Constraint>) -> anyhow::Result<bool> {
        if a == b {
            return Ok(true);
        }
        if let (Term::Sort(s1), Term::Sort(s2)) = (a, b) {
            return Ok(self.is_def_eq_level(&s1.level, &s2.level, cs));
        }
        if a.is_meta_app() || b.is_meta_app() {
            log::trace!("deferred: {a} =?= {b}");
            cs.push(Constraint::Eq(a.clone(), b.clone()));
            return Ok(true);
        }
        let a1 = self.whnf_core(a);
        let b1 = self.whnf_core(b);
        if !a1.ptr_eq(a) || !b1.ptr_eq(b) {
            return self.is_def_eq(&a1, &b1, cs);
        }
        if let Some(result) = self.lazy_delta(a, b, cs)? {
            return Ok(result);
        }
        self.is_def_eq_core(a, b, cs)
    }

    fn lazy_delta(
        &self,
        a: &Term,
        b: &Term,
        cs: &mut Vec<Constraint>,
    ) -> anyhow::Result<Option<bool>> {
        let same_head = match (a.head(), b.head()) {
            (Term::Const(h1), Term::Const(h2)) => h1.name == h2.name,
            _ => false,
        };
        if same_head {
            let mut local_cs = vec![];
            if self.is_def_eq_app(a, b, &mut local_cs)? {
                cs.append(&mut local_cs);
                return Ok(Some(true));
            }
        }
        match (self.unfold_head(a), self.unfold_head(b)) {
            (None, None) => Ok(None),
            (Some(a), None) => self.is_def_eq(&a, b, cs).map(Some),
            (None, Some(b)) => self.is_def_eq(a, &b, cs).map(Some),
            (Some(a), Some(b)) => self.is_def_eq(&a, &b, cs).map(Some),
        }
    }

    fn is_def_eq_app(&self, a: &Term, b: &Term, cs: &mut Vec<Constraint>) -> anyhow::Result<bool> {
        let (h1, args1) = a.unapp();
        let (h2, args2) = b.unapp();
        if args1.len() != args2.len() || !self.is_def_eq_head(h1, h2, cs)? {
            return Ok(false);
        }
        for (x, y) in args1.into_iter().zip(args2) {
            if !self.is_def_eq(x, y, cs)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_def_eq_head(&self, a: &Term, b: &Term, cs: &mut Vec<Constraint>) -> anyhow::Result<bool> {
        match (a, b) {
            (Term::Const(c1), Term::Const(c2)) => Ok(c1.name == c2.name
                && c1.levels.len() == c2.levels.len()
                && c1
                    .levels
                    .iter()
                    .zip(&c2.levels)
                    .all(|(l1, l2)| self.is_def_eq_level(l1, l2, cs))),
            _ => self.is_def_eq(a, b, cs),
        }
    }

    fn is_def_eq_core(&self, a: &Term, b: &Term, cs: &mut Vec<Constraint>) -> anyhow::Result<bool> {
        match (a, b) {
            (Term::Lam(l), Term::Lam(r)) | (Term::Pi(l), Term::Pi(r)) => {
                if !self.is_def_eq(&l.dom, &r.dom, cs)? {
                    return Ok(false);
                }
                let x = mk_local(Id::fresh(), l.name.clone(), l.dom.clone(), l.binder);
                let lb = l.body.open(std::slice::from_ref(&x), 0);
                let rb = r.body.open(&[x], 0);
                self.is_def_eq(&lb, &rb, cs)
            }
            (Term::Const(_), Term::Const(_)) => self.is_def_eq_head(a, b, cs),
            (Term::App(_), Term::App(_)) => self.is_def_eq_app(a, b, cs),
            (Term::Lam(l), _) => self.is_def_eq_eta(l, b, cs),
            (_, Term::Lam(r)) => self.is_def_eq_eta(r, a, cs),
            (Term::Ext(l), Term::Ext(r)) => {
                if l.def != r.def || l.args.len() != r.args.len() {
                    return Ok(false);
                }
                for (x, y) in l.args.iter().zip(&r.args) {
                    if !self.is_def_eq(x, y, cs)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // λ x, b =?= f   iff   b =?= f x
    fn is_def_eq_eta(
        &self,
        lam: &TermBinder,
        other: &Term,
        cs: &mut Vec<Constraint>,
    ) -> anyhow::Result<bool> {
        let x = mk_local(Id::fresh(), lam.name.clone(), lam.dom.clone(), lam.binder);
        let body = lam.body.open(std::slice::from_ref(&x), 0);
        self.is_def_eq(&body, &crate::tt::mk_app(other.clone(), x), cs)
    }

    pub fn is_def_eq_level(&self, l1: &Level, l2: &Level, cs: &mut Vec<Constraint>) -> bool {
        if l1.is_equiv(l2) {
            return true;
        }
        if l1.has_meta() || l2.has_meta() {
            cs.push(Constraint::Level(l1.clone(), l2.clone()));
            return true;
        }
        false
    }
}
