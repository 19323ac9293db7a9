//! Dependent terms in the locally nameless representation. Terms may be ill-typed.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::iter::zip;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ext::ExtDef;

#[derive(Debug, Clone, Ord, PartialOrd, Default)]
pub struct Name(Arc<String>);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Id(usize);

static NAME_TABLE: Lazy<Mutex<HashMap<String, Weak<String>>>> = Lazy::new(Default::default);

static ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Name {
    pub fn from_str(value: &str) -> Name {
        let mut table = NAME_TABLE.lock().unwrap();
        if let Some(existing) = table.get(value).and_then(|weak| weak.upgrade()) {
            return Name(existing);
        }

        let owned = Arc::new(value.to_owned());
        table.insert(value.to_owned(), Arc::downgrade(&owned));
        Name(owned)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// An atomic name is a single identifier, i.e. it has no `.` separated components.
    pub fn is_atomic(&self) -> bool {
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^[\p{Alphabetic}_][\p{Alphabetic}\p{Number}_']*$").unwrap());
        RE.is_match(self.as_str())
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::from_str(value)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Id {
    pub fn fresh() -> Self {
        let id = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Id(id)
    }

    /// Re-creates an identifier read back from a stream. Later calls to [Id::fresh] never return it.
    /// Fails on `usize::MAX`, which would leave no fresh identifier after it.
    pub fn from_raw(raw: usize) -> Option<Self> {
        let next = raw.checked_add(1)?;
        ID_COUNTER.fetch_max(next, Ordering::Relaxed);
        Some(Id(raw))
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Universe levels.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Zero,
    Succ(Arc<Level>),
    Max(Arc<(Level, Level)>),
    IMax(Arc<(Level, Level)>),
    Param(Name),
    Meta(Id),
    /// Dense-indexed level placeholder used by match patterns.
    Slot(usize),
}

pub fn mk_level_zero() -> Level {
    Level::Zero
}

pub fn mk_level_one() -> Level {
    mk_level_succ(Level::Zero)
}

pub fn mk_level_succ(l: Level) -> Level {
    Level::Succ(Arc::new(l))
}

pub fn mk_level_max(l1: Level, l2: Level) -> Level {
    Level::Max(Arc::new((l1, l2)))
}

pub fn mk_level_imax(l1: Level, l2: Level) -> Level {
    Level::IMax(Arc::new((l1, l2)))
}

pub fn mk_level_param(name: Name) -> Level {
    Level::Param(name)
}

pub fn mk_fresh_level_meta() -> Level {
    Level::Meta(Id::fresh())
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (base, offset) = self.to_offset();
        match base {
            Level::Zero => write!(f, "{offset}"),
            _ => {
                match base {
                    Level::Max(inner) => write!(f, "(max {} {})", inner.0, inner.1)?,
                    Level::IMax(inner) => write!(f, "(imax {} {})", inner.0, inner.1)?,
                    Level::Param(name) => write!(f, "{name}")?,
                    Level::Meta(id) => write!(f, "?u{id}")?,
                    Level::Slot(index) => write!(f, "?_u{index}")?,
                    Level::Zero | Level::Succ(_) => unreachable!(),
                }
                if offset > 0 {
                    write!(f, "+{offset}")?;
                }
                Ok(())
            }
        }
    }
}

impl Level {
    /// Splits `l+k` into `(l, k)`.
    pub fn to_offset(&self) -> (&Level, usize) {
        let mut l = self;
        let mut k = 0;
        while let Level::Succ(inner) = l {
            l = inner;
            k += 1;
        }
        (l, k)
    }

    pub fn has_meta(&self) -> bool {
        match self {
            Level::Zero | Level::Param(_) | Level::Slot(_) => false,
            Level::Meta(_) => true,
            Level::Succ(l) => l.has_meta(),
            Level::Max(inner) | Level::IMax(inner) => inner.0.has_meta() || inner.1.has_meta(),
        }
    }

    pub fn has_slot(&self) -> bool {
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) => false,
            Level::Slot(_) => true,
            Level::Succ(l) => l.has_slot(),
            Level::Max(inner) | Level::IMax(inner) => inner.0.has_slot() || inner.1.has_slot(),
        }
    }

    pub fn occurs_meta(&self, id: Id) -> bool {
        match self {
            Level::Zero | Level::Param(_) | Level::Slot(_) => false,
            Level::Meta(other) => *other == id,
            Level::Succ(l) => l.occurs_meta(id),
            Level::Max(inner) | Level::IMax(inner) => {
                inner.0.occurs_meta(id) || inner.1.occurs_meta(id)
            }
        }
    }

    pub fn replace(&self, f: &impl Fn(&Level) -> Option<Level>) -> Level {
        if let Some(l) = f(self) {
            return l;
        }
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) | Level::Slot(_) => self.clone(),
            Level::Succ(l) => mk_level_succ(l.replace(f)),
            Level::Max(inner) => mk_level_max(inner.0.replace(f), inner.1.replace(f)),
            Level::IMax(inner) => mk_level_imax(inner.0.replace(f), inner.1.replace(f)),
        }
    }

    pub fn instantiate_params(&self, params: &[Name], levels: &[Level]) -> Level {
        self.replace(&|l| {
            let Level::Param(name) = l else {
                return None;
            };
            zip(params, levels)
                .find(|(param, _)| *param == name)
                .map(|(_, level)| level.clone())
        })
    }

    pub fn normalize(&self) -> Level {
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) | Level::Slot(_) => self.clone(),
            Level::Succ(l) => mk_level_succ(l.normalize()),
            Level::Max(inner) => simplify_max(inner.0.normalize(), inner.1.normalize()),
            Level::IMax(inner) => {
                let l1 = inner.0.normalize();
                let l2 = inner.1.normalize();
                if l2 == Level::Zero {
                    Level::Zero
                } else if matches!(l2, Level::Succ(_)) {
                    simplify_max(l1, l2)
                } else if l1 == l2 || l1 == Level::Zero {
                    l2
                } else {
                    mk_level_imax(l1, l2)
                }
            }
        }
    }

    /// Decides `self = other` up to normalization. Incomplete for `imax` of parameters.
    pub fn is_equiv(&self, other: &Level) -> bool {
        self == other || self.normalize() == other.normalize()
    }
}

fn simplify_max(l1: Level, l2: Level) -> Level {
    if l1 == l2 || l2 == Level::Zero {
        return l1;
    }
    if l1 == Level::Zero {
        return l2;
    }
    let (b1, k1) = l1.to_offset();
    let (b2, k2) = l2.to_offset();
    if b1 == b2 {
        return if k1 >= k2 { l1.clone() } else { l2.clone() };
    }
    // a constant is dominated by anything with at least the same offset
    if *b1 == Level::Zero && k2 >= k1 {
        return l2.clone();
    }
    if *b2 == Level::Zero && k1 >= k2 {
        return l1.clone();
    }
    if l1 <= l2 {
        mk_level_max(l1, l2)
    } else {
        mk_level_max(l2, l1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BinderInfo {
    #[default]
    Default,
    Implicit,
    InstImplicit,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TermMetadata {
    /// One more than the largest loose de Bruijn index.
    pub bound: usize,
    pub has_local: bool,
    pub has_meta: bool,
    pub has_univ_meta: bool,
    pub has_slot: bool,
}

impl TermMetadata {
    fn union(&self, other: &TermMetadata) -> TermMetadata {
        TermMetadata {
            bound: self.bound.max(other.bound),
            has_local: self.has_local || other.has_local,
            has_meta: self.has_meta || other.has_meta,
            has_univ_meta: self.has_univ_meta || other.has_univ_meta,
            has_slot: self.has_slot || other.has_slot,
        }
    }

    fn of_levels<'a>(levels: impl IntoIterator<Item = &'a Level>) -> TermMetadata {
        let mut metadata = TermMetadata::default();
        for l in levels {
            metadata.has_univ_meta |= l.has_meta();
            metadata.has_slot |= l.has_slot();
        }
        metadata
    }
}

/// Locally nameless representation. See [Charguéraud, 2012].
/// Use syn's convention [https://docs.rs/syn/latest/syn/enum.Expr.html#syntax-tree-enums].
#[derive(Clone, Debug)]
pub enum Term {
    Var(Arc<TermVar>),
    Sort(Arc<TermSort>),
    Const(Arc<TermConst>),
    Local(Arc<TermLocal>),
    Meta(Arc<TermMeta>),
    Slot(Arc<TermSlot>),
    App(Arc<TermApp>),
    Lam(Arc<TermBinder>),
    Pi(Arc<TermBinder>),
    Ext(Arc<TermExt>),
}

#[derive(Clone, Debug)]
pub struct TermVar {
    pub metadata: TermMetadata,
    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct TermSort {
    pub metadata: TermMetadata,
    pub level: Level,
}

#[derive(Clone, Debug)]
pub struct TermConst {
    pub metadata: TermMetadata,
    pub name: Name,
    pub levels: Vec<Level>,
}

#[derive(Clone, Debug)]
pub struct TermLocal {
    pub metadata: TermMetadata,
    pub id: Id,
    // for pretty-printing
    pub pp_name: Name,
    pub ty: Term,
    pub binder: BinderInfo,
}

#[derive(Clone, Debug)]
pub struct TermMeta {
    pub metadata: TermMetadata,
    pub id: Id,
    pub ty: Term,
}

#[derive(Clone, Debug)]
pub struct TermSlot {
    pub metadata: TermMetadata,
    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct TermApp {
    pub metadata: TermMetadata,
    pub fun: Term,
    pub arg: Term,
}

#[derive(Clone, Debug)]
pub struct TermBinder {
    pub metadata: TermMetadata,
    // for pretty-printing
    pub name: Name,
    pub binder: BinderInfo,
    pub dom: Term,
    pub body: Term,
}

#[derive(Clone, Debug)]
pub struct TermExt {
    pub metadata: TermMetadata,
    pub def: ExtDef,
    pub args: Vec<Term>,
}

pub fn mk_var(index: usize) -> Term {
    let metadata = TermMetadata {
        bound: index + 1,
        ..Default::default()
    };
    Term::Var(Arc::new(TermVar { metadata, index }))
}

pub fn mk_sort(level: Level) -> Term {
    let metadata = TermMetadata::of_levels([&level]);
    Term::Sort(Arc::new(TermSort { metadata, level }))
}

pub fn mk_prop() -> Term {
    mk_sort(Level::Zero)
}

pub fn mk_type() -> Term {
    mk_sort(mk_level_one())
}

pub fn mk_const(name: Name, levels: Vec<Level>) -> Term {
    let metadata = TermMetadata::of_levels(&levels);
    Term::Const(Arc::new(TermConst {
        metadata,
        name,
        levels,
    }))
}

pub fn mk_local(id: Id, pp_name: Name, ty: Term, binder: BinderInfo) -> Term {
    let metadata = TermMetadata {
        bound: 0,
        has_local: true,
        ..ty.metadata().clone()
    };
    Term::Local(Arc::new(TermLocal {
        metadata,
        id,
        pp_name,
        ty,
        binder,
    }))
}

pub fn mk_fresh_local(pp_name: Name, ty: Term) -> Term {
    mk_local(Id::fresh(), pp_name, ty, BinderInfo::Default)
}

pub fn mk_meta(id: Id, ty: Term) -> Term {
    let metadata = TermMetadata {
        bound: 0,
        has_meta: true,
        ..ty.metadata().clone()
    };
    Term::Meta(Arc::new(TermMeta { metadata, id, ty }))
}

pub fn mk_fresh_meta(ty: Term) -> Term {
    mk_meta(Id::fresh(), ty)
}

pub fn mk_slot(index: usize) -> Term {
    let metadata = TermMetadata {
        has_slot: true,
        ..Default::default()
    };
    Term::Slot(Arc::new(TermSlot { metadata, index }))
}

pub fn mk_app(fun: Term, arg: Term) -> Term {
    let metadata = fun.metadata().union(arg.metadata());
    Term::App(Arc::new(TermApp { metadata, fun, arg }))
}

fn binder_metadata(dom: &Term, body: &Term) -> TermMetadata {
    let mut metadata = dom.metadata().union(body.metadata());
    metadata.bound = dom.metadata().bound.max(body.metadata().bound.saturating_sub(1));
    metadata
}

pub fn mk_lam(name: Name, binder: BinderInfo, dom: Term, body: Term) -> Term {
    let metadata = binder_metadata(&dom, &body);
    Term::Lam(Arc::new(TermBinder {
        metadata,
        name,
        binder,
        dom,
        body,
    }))
}

pub fn mk_pi(name: Name, binder: BinderInfo, dom: Term, body: Term) -> Term {
    let metadata = binder_metadata(&dom, &body);
    Term::Pi(Arc::new(TermBinder {
        metadata,
        name,
        binder,
        dom,
        body,
    }))
}

/// Non-dependent arrow `dom → cod`; `cod` lives in the same scope as `dom`.
pub fn mk_arrow(dom: Term, cod: Term) -> Term {
    mk_pi(
        Name::from_str("a"),
        BinderInfo::Default,
        dom,
        cod.lift_loose(0, 1),
    )
}

pub fn mk_ext(def: ExtDef, args: Vec<Term>) -> Term {
    let mut metadata = TermMetadata::default();
    for arg in &args {
        metadata = metadata.union(arg.metadata());
    }
    Term::Ext(Arc::new(TermExt {
        metadata,
        def,
        args,
    }))
}

/// Returns `Π xs, body` where `xs` are locals. Domains are abstracted over the preceding locals.
pub fn mk_pi_locals(xs: &[Term], body: &Term) -> Term {
    mk_binding_locals(xs, body, mk_pi)
}

/// Returns `λ xs, body` where `xs` are locals.
pub fn mk_lambda_locals(xs: &[Term], body: &Term) -> Term {
    mk_binding_locals(xs, body, mk_lam)
}

fn mk_binding_locals(
    xs: &[Term],
    body: &Term,
    mk: fn(Name, BinderInfo, Term, Term) -> Term,
) -> Term {
    let locals = xs
        .iter()
        .filter_map(|x| match x {
            Term::Local(inner) => Some(inner.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(locals.len(), xs.len(), "binding over a non-local");
    let ids = locals.iter().map(|x| x.id).collect::<Vec<_>>();
    let mut m = body.close(&ids, 0);
    for (i, x) in locals.iter().enumerate().rev() {
        let dom = x.ty.close(&ids[..i], 0);
        m = mk(x.pp_name.clone(), x.binder, dom, m);
    }
    m
}

impl Default for Term {
    fn default() -> Self {
        mk_prop()
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self, other) {
            (Term::Var(a), Term::Var(b)) => a.index == b.index,
            (Term::Sort(a), Term::Sort(b)) => a.level == b.level,
            (Term::Const(a), Term::Const(b)) => a.name == b.name && a.levels == b.levels,
            (Term::Local(a), Term::Local(b)) => a.id == b.id,
            (Term::Meta(a), Term::Meta(b)) => a.id == b.id,
            (Term::Slot(a), Term::Slot(b)) => a.index == b.index,
            (Term::App(a), Term::App(b)) => {
                a.metadata == b.metadata && a.fun == b.fun && a.arg == b.arg
            }
            (Term::Lam(a), Term::Lam(b)) | (Term::Pi(a), Term::Pi(b)) => {
                a.metadata == b.metadata && a.dom == b.dom && a.body == b.body
            }
            (Term::Ext(a), Term::Ext(b)) => a.def == b.def && a.args == b.args,
            _ => false,
        }
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Term::Var(inner) => inner.index.hash(state),
            Term::Sort(inner) => inner.level.hash(state),
            Term::Const(inner) => {
                inner.name.hash(state);
                inner.levels.hash(state);
            }
            Term::Local(inner) => inner.id.hash(state),
            Term::Meta(inner) => inner.id.hash(state),
            Term::Slot(inner) => inner.index.hash(state),
            Term::App(inner) => {
                inner.fun.hash(state);
                inner.arg.hash(state);
            }
            Term::Lam(inner) | Term::Pi(inner) => {
                inner.dom.hash(state);
                inner.body.hash(state);
            }
            Term::Ext(inner) => {
                inner.def.hash(state);
                inner.args.hash(state);
            }
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const TERM_PREC_LAM: u8 = 0;
        const TERM_PREC_EQ: u8 = 1;
        const TERM_PREC_APP: u8 = 2;
        const TERM_PREC_ATOM: u8 = 3;

        fn paren(f: &mut std::fmt::Formatter<'_>, needs: bool, s: &str) -> std::fmt::Result {
            if needs {
                write!(f, "{s}")
            } else {
                Ok(())
            }
        }

        fn fmt_binder(
            inner: &TermBinder,
            f: &mut std::fmt::Formatter<'_>,
            names: &mut Vec<Name>,
        ) -> std::fmt::Result {
            let (open, close) = match inner.binder {
                BinderInfo::Default => ("(", ")"),
                BinderInfo::Implicit => ("{", "}"),
                BinderInfo::InstImplicit => ("[", "]"),
            };
            write!(f, "{open}{} : ", inner.name)?;
            fmt_term(&inner.dom, f, TERM_PREC_LAM, names)?;
            write!(f, "{close}, ")?;
            names.push(inner.name.clone());
            let r = fmt_term(&inner.body, f, TERM_PREC_LAM, names);
            names.pop();
            r
        }

        fn fmt_term(
            term: &Term,
            f: &mut std::fmt::Formatter<'_>,
            prec: u8,
            names: &mut Vec<Name>,
        ) -> std::fmt::Result {
            match term {
                Term::Var(inner) => match names.len().checked_sub(inner.index + 1) {
                    Some(i) => write!(f, "{}", names[i]),
                    None => write!(f, "#{}", inner.index),
                },
                Term::Sort(inner) => match inner.level.to_offset() {
                    (Level::Zero, 0) => write!(f, "Prop"),
                    (Level::Zero, 1) => write!(f, "Type"),
                    _ => {
                        paren(f, prec > TERM_PREC_APP, "(")?;
                        write!(f, "Sort {}", inner.level)?;
                        paren(f, prec > TERM_PREC_APP, ")")
                    }
                },
                Term::Const(inner) => write!(f, "{}", inner.name),
                Term::Local(inner) => write!(f, "{}", inner.pp_name),
                Term::Meta(inner) => write!(f, "?m{}", inner.id),
                Term::Slot(inner) => write!(f, "?_{}", inner.index),
                Term::App(_) => {
                    let (head, args) = term.unapp();
                    if let Term::Const(c) = head {
                        let infix = match (c.name.as_str(), args.len()) {
                            ("eq", 3) => Some((" = ", &args[1..])),
                            ("iff", 2) => Some((" ↔ ", &args[..])),
                            _ => None,
                        };
                        if let Some((op, operands)) = infix {
                            paren(f, prec > TERM_PREC_EQ, "(")?;
                            fmt_term(operands[0], f, TERM_PREC_APP, names)?;
                            write!(f, "{op}")?;
                            fmt_term(operands[1], f, TERM_PREC_APP, names)?;
                            return paren(f, prec > TERM_PREC_EQ, ")");
                        }
                    }
                    paren(f, prec > TERM_PREC_APP, "(")?;
                    fmt_term(head, f, TERM_PREC_APP, names)?;
                    for arg in args {
                        write!(f, " ")?;
                        fmt_term(arg, f, TERM_PREC_ATOM, names)?;
                    }
                    paren(f, prec > TERM_PREC_APP, ")")
                }
                Term::Lam(inner) => {
                    paren(f, prec > TERM_PREC_LAM, "(")?;
                    write!(f, "λ ")?;
                    fmt_binder(inner, f, names)?;
                    paren(f, prec > TERM_PREC_LAM, ")")
                }
                Term::Pi(inner) => {
                    paren(f, prec > TERM_PREC_LAM, "(")?;
                    if inner.body.contains_var(0) {
                        write!(f, "Π ")?;
                        fmt_binder(inner, f, names)?;
                    } else {
                        fmt_term(&inner.dom, f, TERM_PREC_EQ, names)?;
                        write!(f, " → ")?;
                        names.push(inner.name.clone());
                        let r = fmt_term(&inner.body, f, TERM_PREC_LAM, names);
                        names.pop();
                        r?;
                    }
                    paren(f, prec > TERM_PREC_LAM, ")")
                }
                Term::Ext(inner) => {
                    write!(f, "[{}", inner.def.name())?;
                    for arg in &inner.args {
                        write!(f, " ")?;
                        fmt_term(arg, f, TERM_PREC_ATOM, names)?;
                    }
                    write!(f, "]")
                }
            }
        }

        fmt_term(self, f, TERM_PREC_LAM, &mut vec![])
    }
}

impl Term {
    #[inline]
    pub fn metadata(&self) -> &TermMetadata {
        match self {
            Term::Var(inner) => &inner.metadata,
            Term::Sort(inner) => &inner.metadata,
            Term::Const(inner) => &inner.metadata,
            Term::Local(inner) => &inner.metadata,
            Term::Meta(inner) => &inner.metadata,
            Term::Slot(inner) => &inner.metadata,
            Term::App(inner) => &inner.metadata,
            Term::Lam(inner) => &inner.metadata,
            Term::Pi(inner) => &inner.metadata,
            Term::Ext(inner) => &inner.metadata,
        }
    }

    pub fn ptr_eq(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Var(a), Term::Var(b)) => Arc::ptr_eq(a, b),
            (Term::Sort(a), Term::Sort(b)) => Arc::ptr_eq(a, b),
            (Term::Const(a), Term::Const(b)) => Arc::ptr_eq(a, b),
            (Term::Local(a), Term::Local(b)) => Arc::ptr_eq(a, b),
            (Term::Meta(a), Term::Meta(b)) => Arc::ptr_eq(a, b),
            (Term::Slot(a), Term::Slot(b)) => Arc::ptr_eq(a, b),
            (Term::App(a), Term::App(b)) => Arc::ptr_eq(a, b),
            (Term::Lam(a), Term::Lam(b)) => Arc::ptr_eq(a, b),
            (Term::Pi(a), Term::Pi(b)) => Arc::ptr_eq(a, b),
            (Term::Ext(a), Term::Ext(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Has no loose bound variables.
    pub fn is_closed(&self) -> bool {
        self.metadata().bound == 0
    }

    pub fn has_local(&self) -> bool {
        self.metadata().has_local
    }

    pub fn has_meta(&self) -> bool {
        self.metadata().has_meta || self.metadata().has_univ_meta
    }

    pub fn has_expr_meta(&self) -> bool {
        self.metadata().has_meta
    }

    pub fn has_slot(&self) -> bool {
        self.metadata().has_slot
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, Term::Meta(_))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Term::Local(_))
    }

    pub fn is_pi(&self) -> bool {
        matches!(self, Term::Pi(_))
    }

    pub fn local_id(&self) -> Option<Id> {
        match self {
            Term::Local(inner) => Some(inner.id),
            _ => None,
        }
    }

    pub fn meta_id(&self) -> Option<Id> {
        match self {
            Term::Meta(inner) => Some(inner.id),
            _ => None,
        }
    }

    pub fn const_name(&self) -> Option<&Name> {
        match self {
            Term::Const(inner) => Some(&inner.name),
            _ => None,
        }
    }

    pub fn head(&self) -> &Term {
        let mut m = self;
        while let Self::App(inner) = m {
            m = &inner.fun;
        }
        m
    }

    pub fn args(&self) -> Vec<&Term> {
        let mut m = self;
        let mut args = vec![];
        while let Self::App(inner) = m {
            m = &inner.fun;
            args.push(&inner.arg);
        }
        args.reverse();
        args
    }

    pub fn unapp(&self) -> (&Term, Vec<&Term>) {
        (self.head(), self.args())
    }

    /// Returns the application `self l₁ ⋯ lₙ`.
    pub fn apply(&self, args: impl IntoIterator<Item = Term>) -> Term {
        let mut fun = self.clone();
        for arg in args {
            fun = mk_app(fun, arg);
        }
        fun
    }

    /// A metavariable applied to arguments, `?M t₁ ⋯ tₙ`.
    pub fn is_meta_app(&self) -> bool {
        self.head().is_meta()
    }

    /// self.open([x, y], k) == [x/k+1,y/k]self, lowering the remaining loose indices.
    pub fn open(&self, xs: &[Term], level: usize) -> Term {
        if self.metadata().bound <= level || xs.is_empty() {
            return self.clone();
        }
        match self {
            Term::Var(inner) => {
                if inner.index < level {
                    return self.clone();
                }
                let i = inner.index - level;
                if i < xs.len() {
                    xs[xs.len() - i - 1].lift_loose(0, level)
                } else {
                    mk_var(inner.index - xs.len())
                }
            }
            Term::Sort(_) | Term::Const(_) | Term::Local(_) | Term::Meta(_) | Term::Slot(_) => {
                self.clone()
            }
            Term::App(inner) => {
                let fun = inner.fun.open(xs, level);
                let arg = inner.arg.open(xs, level);
                mk_app(fun, arg)
            }
            Term::Lam(inner) => mk_lam(
                inner.name.clone(),
                inner.binder,
                inner.dom.open(xs, level),
                inner.body.open(xs, level + 1),
            ),
            Term::Pi(inner) => mk_pi(
                inner.name.clone(),
                inner.binder,
                inner.dom.open(xs, level),
                inner.body.open(xs, level + 1),
            ),
            Term::Ext(inner) => mk_ext(
                inner.def.clone(),
                inner.args.iter().map(|arg| arg.open(xs, level)).collect(),
            ),
        }
    }

    /// self.close([x, y], k) == [k+1/x, k/y]self
    pub fn close(&self, xs: &[Id], level: usize) -> Term {
        if !self.has_local() || xs.is_empty() {
            return self.clone();
        }
        self.replace(&mut |m, offset| {
            if !m.has_local() {
                return Some(m.clone());
            }
            let Term::Local(inner) = m else {
                return None;
            };
            for (i, &x) in xs.iter().rev().enumerate() {
                if inner.id == x {
                    return Some(mk_var(level + offset + i));
                }
            }
            Some(m.clone())
        })
    }

    /// Shifts loose indices `>= start` by `d`.
    pub fn lift_loose(&self, start: usize, d: usize) -> Term {
        if self.metadata().bound <= start || d == 0 {
            return self.clone();
        }
        self.replace(&mut |m, offset| {
            if m.metadata().bound <= start + offset {
                return Some(m.clone());
            }
            match m {
                Term::Var(inner) => Some(mk_var(inner.index + d)),
                _ => None,
            }
        })
    }

    pub fn contains_var(&self, i: usize) -> bool {
        if self.metadata().bound <= i {
            return false;
        }
        match self {
            Term::Var(inner) => inner.index == i,
            Term::Sort(_) | Term::Const(_) | Term::Local(_) | Term::Meta(_) | Term::Slot(_) => {
                false
            }
            Term::App(inner) => inner.fun.contains_var(i) || inner.arg.contains_var(i),
            Term::Lam(inner) | Term::Pi(inner) => {
                inner.dom.contains_var(i) || inner.body.contains_var(i + 1)
            }
            Term::Ext(inner) => inner.args.iter().any(|arg| arg.contains_var(i)),
        }
    }

    /// Bottom-up rebuilding driven by `f`, which receives each subterm with the number of binders
    /// above it. Types of locals and metavariables are not visited.
    pub fn replace(&self, f: &mut impl FnMut(&Term, usize) -> Option<Term>) -> Term {
        self.replace_rec(f, 0)
    }

    fn replace_rec(&self, f: &mut impl FnMut(&Term, usize) -> Option<Term>, offset: usize) -> Term {
        if let Some(m) = f(self, offset) {
            return m;
        }
        match self {
            Term::Var(_)
            | Term::Sort(_)
            | Term::Const(_)
            | Term::Local(_)
            | Term::Meta(_)
            | Term::Slot(_) => self.clone(),
            Term::App(inner) => {
                let fun = inner.fun.replace_rec(f, offset);
                let arg = inner.arg.replace_rec(f, offset);
                if inner.fun.ptr_eq(&fun) && inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_app(fun, arg)
                }
            }
            Term::Lam(inner) | Term::Pi(inner) => {
                let dom = inner.dom.replace_rec(f, offset);
                let body = inner.body.replace_rec(f, offset + 1);
                if inner.dom.ptr_eq(&dom) && inner.body.ptr_eq(&body) {
                    return self.clone();
                }
                match self {
                    Term::Lam(_) => mk_lam(inner.name.clone(), inner.binder, dom, body),
                    _ => mk_pi(inner.name.clone(), inner.binder, dom, body),
                }
            }
            Term::Ext(inner) => {
                let args = inner
                    .args
                    .iter()
                    .map(|arg| arg.replace_rec(f, offset))
                    .collect::<Vec<_>>();
                if zip(&inner.args, &args).all(|(a, b)| a.ptr_eq(b)) {
                    self.clone()
                } else {
                    mk_ext(inner.def.clone(), args)
                }
            }
        }
    }

    /// Pre-order traversal: a node, then its function before its argument, and a binder's domain
    /// before its body. `f` returns `Continue(false)` to skip the children of a node.
    pub fn visit<B>(
        &self,
        f: &mut impl FnMut(&Term, usize) -> ControlFlow<B, bool>,
    ) -> ControlFlow<B> {
        self.visit_rec(f, 0)
    }

    fn visit_rec<B>(
        &self,
        f: &mut impl FnMut(&Term, usize) -> ControlFlow<B, bool>,
        offset: usize,
    ) -> ControlFlow<B> {
        if !f(self, offset)? {
            return ControlFlow::Continue(());
        }
        match self {
            Term::Var(_)
            | Term::Sort(_)
            | Term::Const(_)
            | Term::Local(_)
            | Term::Meta(_)
            | Term::Slot(_) => ControlFlow::Continue(()),
            Term::App(inner) => {
                inner.fun.visit_rec(f, offset)?;
                inner.arg.visit_rec(f, offset)
            }
            Term::Lam(inner) | Term::Pi(inner) => {
                inner.dom.visit_rec(f, offset)?;
                inner.body.visit_rec(f, offset + 1)
            }
            Term::Ext(inner) => {
                for arg in &inner.args {
                    arg.visit_rec(f, offset)?;
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Checks whether some subterm satisfies `p`.
    pub fn find(&self, p: &mut impl FnMut(&Term) -> bool) -> bool {
        self.visit(&mut |m, _| {
            if p(m) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(true)
            }
        })
        .is_break()
    }

    pub fn occurs_meta(&self, id: Id) -> bool {
        if !self.has_meta() {
            return false;
        }
        self.find(&mut |m| match m {
            Term::Meta(inner) => inner.id == id || inner.ty.occurs_meta(id),
            _ => false,
        })
    }

    pub fn occurs_local(&self, id: Id) -> bool {
        if !self.has_local() {
            return false;
        }
        self.find(&mut |m| match m {
            Term::Local(inner) => inner.id == id || inner.ty.occurs_local(id),
            _ => false,
        })
    }

    pub fn replace_levels(&self, f: &impl Fn(&Level) -> Option<Level>) -> Term {
        self.replace(&mut |m, _| match m {
            Term::Sort(inner) => Some(mk_sort(inner.level.replace(f))),
            Term::Const(inner) if !inner.levels.is_empty() => Some(mk_const(
                inner.name.clone(),
                inner.levels.iter().map(|l| l.replace(f)).collect(),
            )),
            Term::Const(_) => Some(m.clone()),
            _ => None,
        })
    }

    pub fn instantiate_level_params(&self, params: &[Name], levels: &[Level]) -> Term {
        if params.is_empty() {
            return self.clone();
        }
        self.replace_levels(&|l| match l {
            Level::Param(_) => Some(l.instantiate_params(params, levels)),
            _ => None,
        })
    }

    /// Beta-reduces the head `(λ x, b) a ⋯` as far as possible.
    pub fn head_beta(&self) -> Term {
        let (head, args) = self.unapp();
        if !matches!(head, Term::Lam(_)) || args.is_empty() {
            return self.clone();
        }
        let mut m = head.clone();
        let mut i = 0;
        while i < args.len() {
            let Term::Lam(inner) = &m else {
                break;
            };
            m = inner.body.open(std::slice::from_ref(args[i]), 0);
            i += 1;
        }
        m.apply(args[i..].iter().map(|&arg| arg.clone())).head_beta()
    }
}
