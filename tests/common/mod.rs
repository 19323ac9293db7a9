#![allow(dead_code)]

use std::sync::OnceLock;

use log::{LevelFilter, Log, Metadata, Record};
use regex::Regex;

use rewriter::env::{mk_eq, Env, Reducibility};
use rewriter::tactic::{Goal, ProofState};
use rewriter::tt::{
    mk_arrow, mk_const, mk_fresh_local, mk_lambda_locals, mk_level_one, mk_pi_locals, mk_prop,
    mk_type, Name, Term,
};
use rewriter::unify::Substitution;

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

#[ctor::ctor]
fn init_logger() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}

pub fn c(name: &str) -> Term {
    mk_const(Name::from_str(name), vec![])
}

pub fn nat() -> Term {
    c("nat")
}

pub fn local(name: &str, ty: Term) -> Term {
    mk_fresh_local(Name::from_str(name), ty)
}

/// `a = b` at type `nat`
pub fn eq_nat(a: &Term, b: &Term) -> Term {
    mk_eq(&mk_level_one(), &nat(), a, b)
}

pub fn add(a: &Term, b: &Term) -> Term {
    c("add").apply([a.clone(), b.clone()])
}

/// Naturals with an opaque `add`, a few predicates, and equations about them.
pub fn env(dep_elim: bool) -> Env {
    let mut env = Env::new(dep_elim);
    let n2n = || mk_arrow(nat(), nat());
    env.add_axiom("nat", &[], mk_type()).unwrap();
    env.add_axiom("zero", &[], nat()).unwrap();
    env.add_axiom("succ", &[], n2n()).unwrap();
    env.add_axiom("f", &[], n2n()).unwrap();
    env.add_axiom("add", &[], mk_arrow(nat(), n2n())).unwrap();
    env.add_axiom("p", &[], mk_arrow(nat(), mk_prop())).unwrap();
    env.add_axiom("q", &[], mk_prop()).unwrap();
    env.add_axiom("p2", &[], mk_arrow(nat(), mk_arrow(nat(), mk_prop())))
        .unwrap();
    env.add_axiom(
        "p3",
        &[],
        mk_arrow(nat(), mk_arrow(nat(), mk_arrow(nat(), mk_prop()))),
    )
    .unwrap();

    let n = local("n", nat());
    let m = local("m", nat());
    env.add_axiom(
        "add_zero",
        &[],
        mk_pi_locals(&[n.clone()], &eq_nat(&add(&n, &c("zero")), &n)),
    )
    .unwrap();
    // the right side is not determined by the left
    env.add_axiom(
        "add_junk",
        &[],
        mk_pi_locals(&[n.clone(), m.clone()], &eq_nat(&add(&n, &c("zero")), &m)),
    )
    .unwrap();
    let fn_ = c("f").apply([n.clone()]);
    env.add_axiom(
        "f_expand",
        &[],
        mk_pi_locals(&[n.clone()], &eq_nat(&fn_, &c("f").apply([fn_.clone()]))),
    )
    .unwrap();
    env.add_definition(
        "double",
        n2n(),
        mk_lambda_locals(&[n.clone()], &add(&n, &n)),
        Reducibility::Semireducible,
    )
    .unwrap();
    env
}

/// A proof state with the single goal `hyps ⊢ ty`.
pub fn state(hyps: &[Term], ty: Term) -> (Goal, ProofState) {
    let goal = Goal::new_root(hyps, ty).unwrap();
    let ps = ProofState::new(vec![goal.clone()], Substitution::new());
    (goal, ps)
}

/// Hides metavariable numbers.
pub fn normalize_metas(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\?m\d+").expect("valid metavariable regex"))
        .replace_all(s, "?m")
        .into_owned()
}
