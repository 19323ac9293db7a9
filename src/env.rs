use std::collections::HashMap;

use anyhow::bail;
use easy_ext::ext;
use once_cell::sync::Lazy;

use crate::tt::{
    mk_arrow, mk_const, mk_level_param, mk_local, mk_pi_locals, mk_prop, mk_sort, BinderInfo, Id,
    Level, Name, Term,
};

pub static EQ: Lazy<Name> = Lazy::new(|| Name::from_str("eq"));
pub static EQ_REFL: Lazy<Name> = Lazy::new(|| Name::from_str("eq.refl"));
pub static EQ_SYMM: Lazy<Name> = Lazy::new(|| Name::from_str("eq.symm"));
pub static EQ_REC: Lazy<Name> = Lazy::new(|| Name::from_str("eq.rec"));
pub static IFF: Lazy<Name> = Lazy::new(|| Name::from_str("iff"));
pub static IFF_REFL: Lazy<Name> = Lazy::new(|| Name::from_str("iff.refl"));
pub static TRUE: Lazy<Name> = Lazy::new(|| Name::from_str("true"));
pub static TRUE_INTRO: Lazy<Name> = Lazy::new(|| Name::from_str("true.intro"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reducibility {
    Reducible,
    #[default]
    Semireducible,
    Irreducible,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub ty: Term,
    /// `None` for axioms and opaque constants.
    pub value: Option<Term>,
    pub reducibility: Reducibility,
    pub is_instance: bool,
}

impl Declaration {
    /// Positions of the leading instance-implicit parameters.
    pub fn inst_implicit_positions(&self) -> Vec<usize> {
        let mut positions = vec![];
        let mut ty = &self.ty;
        let mut i = 0;
        while let Term::Pi(inner) = ty {
            if inner.binder == BinderInfo::InstImplicit {
                positions.push(i);
            }
            ty = &inner.body;
            i += 1;
        }
        positions
    }
}

/// A structure field accessor. `proj p₁ ⋯ pₙ s` reduces when `s` is `mk p₁ ⋯ pₙ f₁ ⋯ fₘ`.
#[derive(Debug, Clone)]
pub struct ProjectionInfo {
    pub mk: Name,
    pub nparams: usize,
    pub field: usize,
    /// The structure argument is instance-implicit, as in type class projections.
    pub inst_implicit: bool,
}

#[derive(Debug, Clone)]
pub struct Env {
    decls: HashMap<Name, Declaration>,
    projections: HashMap<Name, ProjectionInfo>,
    instances: Vec<Name>,
    eq_dep_elim: bool,
}

impl Env {
    /// Creates an environment with the builtin equality, `iff`, and `true`. With `eq_dep_elim`,
    /// the motive of `eq.rec` also abstracts the equality proof.
    pub fn new(eq_dep_elim: bool) -> Env {
        let mut env = Env {
            decls: HashMap::new(),
            projections: HashMap::new(),
            instances: vec![],
            eq_dep_elim,
        };
        env.add_builtins();
        env
    }

    pub fn eq_has_dep_elim(&self) -> bool {
        self.eq_dep_elim
    }

    pub fn get(&self, name: &Name) -> Option<&Declaration> {
        self.decls.get(name)
    }

    pub fn projection(&self, name: &Name) -> Option<&ProjectionInfo> {
        self.projections.get(name)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Declaration> {
        self.instances.iter().filter_map(|name| self.decls.get(name))
    }

    pub fn add(&mut self, decl: Declaration) -> anyhow::Result<()> {
        if self.decls.contains_key(&decl.name) {
            bail!("already declared: {}", decl.name);
        }
        if !decl.ty.is_closed() || decl.ty.has_local() || decl.ty.has_meta() {
            bail!("type of {} is not a closed term", decl.name);
        }
        if decl.is_instance {
            self.instances.push(decl.name.clone());
        }
        self.decls.insert(decl.name.clone(), decl);
        Ok(())
    }

    pub fn add_axiom(&mut self, name: &str, level_params: &[&str], ty: Term) -> anyhow::Result<()> {
        self.add(Declaration {
            name: Name::from_str(name),
            level_params: level_params.iter().map(|&p| Name::from_str(p)).collect(),
            ty,
            value: None,
            reducibility: Reducibility::Irreducible,
            is_instance: false,
        })
    }

    pub fn add_definition(
        &mut self,
        name: &str,
        ty: Term,
        value: Term,
        reducibility: Reducibility,
    ) -> anyhow::Result<()> {
        self.add(Declaration {
            name: Name::from_str(name),
            level_params: vec![],
            ty,
            value: Some(value),
            reducibility,
            is_instance: false,
        })
    }

    /// Instances unfold in the matcher like any reducible definition.
    pub fn add_instance(&mut self, name: &str, ty: Term, value: Term) -> anyhow::Result<()> {
        self.add(Declaration {
            name: Name::from_str(name),
            level_params: vec![],
            ty,
            value: Some(value),
            reducibility: Reducibility::Reducible,
            is_instance: true,
        })
    }

    pub fn add_projection(&mut self, name: &str, ty: Term, info: ProjectionInfo) -> anyhow::Result<()> {
        if self.get(&info.mk).is_none() {
            bail!("unknown structure constructor: {}", info.mk);
        }
        self.add_axiom(name, &[], ty)?;
        self.projections.insert(Name::from_str(name), info);
        Ok(())
    }

    fn add_builtin(&mut self, name: &Name, level_params: &[&str], ty: Term) {
        let decl = Declaration {
            name: name.clone(),
            level_params: level_params.iter().map(|&p| Name::from_str(p)).collect(),
            ty,
            value: None,
            reducibility: Reducibility::Irreducible,
            is_instance: false,
        };
        self.decls.insert(name.clone(), decl);
    }

    fn add_builtins(&mut self) {
        let l = mk_level_param(Name::from_str("l"));
        let l1 = mk_level_param(Name::from_str("l1"));
        let l2 = mk_level_param(Name::from_str("l2"));
        let local = |name: &str, ty: Term, binder: BinderInfo| {
            mk_local(Id::fresh(), Name::from_str(name), ty, binder)
        };

        // eq.{l} : Π {A : Sort l}, A → A → Prop
        let a_ty = local("A", mk_sort(l.clone()), BinderInfo::Implicit);
        let eq_ty = mk_pi_locals(
            &[a_ty.clone()],
            &mk_arrow(a_ty.clone(), mk_arrow(a_ty.clone(), mk_prop())),
        );
        self.add_builtin(&EQ, &["l"], eq_ty);

        // eq.refl.{l} : Π {A : Sort l} (a : A), a = a
        let a = local("a", a_ty.clone(), BinderInfo::Default);
        let refl_ty = mk_pi_locals(
            &[a_ty.clone(), a.clone()],
            &mk_eq(&l, &a_ty, &a, &a),
        );
        self.add_builtin(&EQ_REFL, &["l"], refl_ty);

        // eq.symm.{l} : Π {A : Sort l} {a b : A}, a = b → b = a
        let ai = local("a", a_ty.clone(), BinderInfo::Implicit);
        let bi = local("b", a_ty.clone(), BinderInfo::Implicit);
        let symm_ty = mk_pi_locals(
            &[a_ty.clone(), ai.clone(), bi.clone()],
            &mk_arrow(mk_eq(&l, &a_ty, &ai, &bi), mk_eq(&l, &a_ty, &bi, &ai)),
        );
        self.add_builtin(&EQ_SYMM, &["l"], symm_ty);

        // eq.rec.{l1 l2}
        let a_ty = local("A", mk_sort(l2.clone()), BinderInfo::Implicit);
        let a = local("a", a_ty.clone(), BinderInfo::Implicit);
        let b = local("b", a_ty.clone(), BinderInfo::Implicit);
        let x = local("x", a_ty.clone(), BinderInfo::Default);
        let rec_ty = if self.eq_dep_elim {
            // Π {A : Sort l2} {a : A} {C : Π (x : A), a = x → Sort l1},
            //   C a (eq.refl a) → Π {b : A} (H : a = b), C b H
            let h_x = local("H", mk_eq(&l2, &a_ty, &a, &x), BinderInfo::Default);
            let c_ty = mk_pi_locals(&[x.clone(), h_x.clone()], &mk_sort(l1.clone()));
            let c = local("C", c_ty, BinderInfo::Implicit);
            let refl = mk_const(EQ_REFL.clone(), vec![l2.clone()]).apply([a_ty.clone(), a.clone()]);
            let minor = local("M", c.apply([a.clone(), refl]), BinderInfo::Default);
            let h = local("H", mk_eq(&l2, &a_ty, &a, &b), BinderInfo::Default);
            mk_pi_locals(
                &[a_ty.clone(), a.clone(), c.clone(), minor, b.clone(), h.clone()],
                &c.apply([b.clone(), h]),
            )
        } else {
            // Π {A : Sort l2} {a : A} {C : A → Sort l1}, C a → Π {b : A}, a = b → C b
            let c_ty = mk_pi_locals(&[x.clone()], &mk_sort(l1.clone()));
            let c = local("C", c_ty, BinderInfo::Implicit);
            let minor = local("M", c.apply([a.clone()]), BinderInfo::Default);
            let h = local("H", mk_eq(&l2, &a_ty, &a, &b), BinderInfo::Default);
            mk_pi_locals(
                &[a_ty.clone(), a.clone(), c.clone(), minor, b.clone(), h],
                &c.apply([b.clone()]),
            )
        };
        self.add_builtin(&EQ_REC, &["l1", "l2"], rec_ty);

        // iff : Prop → Prop → Prop, iff.refl : Π (a : Prop), a ↔ a
        self.add_builtin(&IFF, &[], mk_arrow(mk_prop(), mk_arrow(mk_prop(), mk_prop())));
        let p = local("a", mk_prop(), BinderInfo::Default);
        let iff_refl_ty = mk_pi_locals(
            &[p.clone()],
            &mk_const(IFF.clone(), vec![]).apply([p.clone(), p.clone()]),
        );
        self.add_builtin(&IFF_REFL, &[], iff_refl_ty);

        self.add_builtin(&TRUE, &[], mk_prop());
        self.add_builtin(&TRUE_INTRO, &[], mk_const(TRUE.clone(), vec![]));
    }
}

/// `@eq.{level} ty lhs rhs`
pub fn mk_eq(level: &Level, ty: &Term, lhs: &Term, rhs: &Term) -> Term {
    mk_const(EQ.clone(), vec![level.clone()]).apply([ty.clone(), lhs.clone(), rhs.clone()])
}

/// `@eq.refl.{level} ty a`
pub fn mk_eq_refl(level: &Level, ty: &Term, a: &Term) -> Term {
    mk_const(EQ_REFL.clone(), vec![level.clone()]).apply([ty.clone(), a.clone()])
}

/// `@eq.symm.{level} ty a b h`, turning `h : a = b` into `b = a`.
pub fn mk_eq_symm(level: &Level, ty: &Term, a: &Term, b: &Term, h: &Term) -> Term {
    mk_const(EQ_SYMM.clone(), vec![level.clone()]).apply([
        ty.clone(),
        a.clone(),
        b.clone(),
        h.clone(),
    ])
}

#[ext(TermEqExt)]
pub impl Term {
    /// Views `@eq A a b` as `(A, a, b)`.
    fn as_eq(&self) -> Option<(&Term, &Term, &Term)> {
        let (head, args) = self.unapp();
        if head.const_name() != Some(&*EQ) || args.len() != 3 {
            return None;
        }
        Some((args[0], args[1], args[2]))
    }

    /// The universe level of the carrier of an equality, read off its `eq` constant.
    fn eq_level(&self) -> Option<&Level> {
        self.as_eq()?;
        match self.head() {
            Term::Const(inner) => inner.levels.first(),
            _ => None,
        }
    }

    fn as_iff(&self) -> Option<(&Term, &Term)> {
        let (head, args) = self.unapp();
        if head.const_name() != Some(&*IFF) || args.len() != 2 {
            return None;
        }
        Some((args[0], args[1]))
    }

    fn is_true(&self) -> bool {
        self.const_name() == Some(&*TRUE)
    }
}
