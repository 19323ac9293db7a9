mod common;

use common::{add, c, env, eq_nat, local, nat, normalize_metas, state};

use rewriter::codec::ExtRegistry;
use rewriter::env::Env;
use rewriter::step::{Location, Multiplicity, Occurrence, RewriteElement, RewriteStep};
use rewriter::tactic::{Goal, Interrupt, ProofState, TacticErrorKind};
use rewriter::tc::{Transparency, TypeChecker};
use rewriter::tt::{mk_const, Name, Term};
use rewriter::unify::{Constraint, Solutions, Substitution, Unifier, UnifierConfig};
use rewriter::{RewriteConfig, Rewriter};

fn rw(rule: &str) -> RewriteElement {
    RewriteElement::new(c(rule))
}

fn run(env: &Env, ps: &ProofState, steps: &[RewriteStep]) -> ProofState {
    Rewriter::new(env, RewriteConfig::default())
        .run(ps, steps)
        .unwrap()
}

fn main_ty(ps: &ProofState) -> String {
    ps.main_goal().unwrap().ty().to_string()
}

/// The proof recorded for `root` has the type `root` was stated with.
fn assert_proves(env: &Env, ps: &ProofState, root: &Goal) {
    let tc = TypeChecker::new(env, &Transparency::All);
    let proof = ps.instantiate_proof(root.meta());
    let ty = tc.infer(&proof).unwrap();
    let mut cs = vec![];
    assert!(tc.is_def_eq(&ty, root.ty(), &mut cs).unwrap(), "{ty} is not {}", root.ty());
    assert!(cs.is_empty());
}

#[test]
fn rewrite_goal() {
    for dep_elim in [true, false] {
        let env = env(dep_elim);
        let x = local("x", nat());
        let (root, ps) = state(&[x.clone()], c("p").apply([add(&x, &c("zero"))]));
        let ps = run(&env, &ps, &[RewriteStep::Rewrite(rw("add_zero"))]);
        insta::allow_duplicates! {
            insta::assert_snapshot!(main_ty(&ps), @"p x");
        }
        assert_eq!(ps.goals().len(), 1);
        assert_proves(&env, &ps, &root);
    }
}

#[test]
fn rewrite_hypothesis_keeps_context_shape() {
    for dep_elim in [true, false] {
        let env = env(dep_elim);
        let x = local("x", nat());
        let h = local("h", c("p").apply([add(&x, &c("zero"))]));
        let y = local("y", nat());
        let (root, ps) = state(&[x.clone(), h.clone(), y.clone()], c("q"));
        let mut elem = rw("add_zero");
        elem.location = Location::hyps(&["h"]).unwrap();
        let ps = run(&env, &ps, &[RewriteStep::Rewrite(elem)]);
        let goal = ps.main_goal().unwrap();
        insta::allow_duplicates! {
            insta::assert_snapshot!(goal, @"(x : nat) (h : p x) (y : nat) ⊢ q");
        }
        let ids = goal.hyps().iter().map(|h| h.local_id()).collect::<Vec<_>>();
        assert_eq!(ids, vec![x.local_id(), h.local_id(), y.local_id()]);
        assert_proves(&env, &ps, &root);
    }
}

#[test]
fn rewrite_everywhere() {
    let env = env(true);
    let x = local("x", nat());
    let h = local("h", c("p").apply([add(&x, &c("zero"))]));
    let ty = c("p2").apply([add(&x, &c("zero")), x.clone()]);
    let (root, ps) = state(&[x, h], ty);
    let mut elem = rw("add_zero");
    elem.location = Location::Everywhere(Occurrence::All);
    let ps = run(&env, &ps, &[RewriteStep::Rewrite(elem)]);
    insta::assert_snapshot!(ps.main_goal().unwrap(), @"(x : nat) (h : p x) ⊢ p2 x x");
    assert_proves(&env, &ps, &root);
}

#[test]
fn selected_occurrence_only() {
    let env = env(true);
    let x = local("x", nat());
    let a = add(&x, &c("zero"));
    let (root, ps) = state(&[x.clone()], c("p3").apply([a.clone(), a.clone(), a]));
    let mut elem = rw("add_zero");
    elem.location = Location::GoalOnly(Occurrence::only([2]));
    let ps = run(&env, &ps, &[RewriteStep::Rewrite(elem)]);
    insta::assert_snapshot!(main_ty(&ps), @"p3 (add x zero) x (add x zero)");
    assert_proves(&env, &ps, &root);
}

#[test]
fn unselectable_occurrence_fails() {
    let env = env(true);
    let x = local("x", nat());
    let (_, ps) = state(&[x.clone()], c("p").apply([add(&x, &c("zero"))]));
    let mut elem = rw("add_zero");
    elem.location = Location::GoalOnly(Occurrence::only([2]));
    let err = Rewriter::new(&env, RewriteConfig::default())
        .run(&ps, &[RewriteStep::Rewrite(elem)])
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::StepFailed);
}

fn two_rewrites() -> (Env, Goal, ProofState) {
    let env = env(true);
    let x = local("x", nat());
    let y = local("y", nat());
    let ty = c("p2").apply([add(&x, &c("zero")), add(&y, &c("zero"))]);
    let (root, ps) = state(&[x, y], ty);
    (env, root, ps)
}

fn repeated(multiplicity: Multiplicity) -> RewriteStep {
    let mut elem = rw("add_zero");
    elem.multiplicity = multiplicity;
    RewriteStep::Rewrite(elem)
}

#[test]
fn at_most_n_stops_when_nothing_is_left() {
    let (env, root, ps) = two_rewrites();
    let ps = run(&env, &ps, &[repeated(Multiplicity::AtMostN(3))]);
    insta::assert_snapshot!(main_ty(&ps), @"p2 x y");
    assert_proves(&env, &ps, &root);
}

#[test]
fn exactly_n_fails_and_restores_the_state() {
    let (env, _, ps) = two_rewrites();
    let step = repeated(Multiplicity::ExactlyN(3));
    let err = Rewriter::new(&env, RewriteConfig::default())
        .run(&ps, std::slice::from_ref(&step))
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::StepFailed);
    assert_eq!(err.step, Some(step));
    insta::assert_snapshot!(main_ty(&err.state), @"p2 (add x zero) (add y zero)");
    assert!(err.state.subst().is_empty());
    insta::assert_snapshot!(err, @r"
    invalid 'rewrite' tactic, rewrite step failed using pattern
      add ?_0 zero
    no subterm in the goal matched the pattern
    ");

    let ps = run(&env, &ps, &[repeated(Multiplicity::ExactlyN(2))]);
    insta::assert_snapshot!(main_ty(&ps), @"p2 x y");
}

#[test]
fn one_or_more_needs_a_first_rewrite() {
    let (env, _, ps) = two_rewrites();
    let ps = run(&env, &ps, &[repeated(Multiplicity::OneOrMore)]);
    insta::assert_snapshot!(main_ty(&ps), @"p2 x y");

    let err = Rewriter::new(&env, RewriteConfig::default())
        .run(&ps, &[repeated(Multiplicity::OneOrMore)])
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::StepFailed);

    let ps = run(&env, &ps, &[repeated(Multiplicity::ZeroOrMore)]);
    insta::assert_snapshot!(main_ty(&ps), @"p2 x y");
}

#[test]
fn self_reproducing_rule_exhausts_iterations() {
    let env = env(true);
    let x = local("x", nat());
    let ty = c("p").apply([c("f").apply([x.clone()])]);
    let (_, ps) = state(&[x], ty);
    let mut elem = rw("f_expand");
    elem.multiplicity = Multiplicity::ZeroOrMore;
    let config = RewriteConfig {
        max_iter: 5,
        ..RewriteConfig::default()
    };
    let err = Rewriter::new(&env, config)
        .run(&ps, &[RewriteStep::Rewrite(elem)])
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::IterationLimit);
    insta::assert_snapshot!(main_ty(&err.state), @"p (f x)");
    insta::assert_snapshot!(
        err,
        @"rewrite tactic failed, maximum number of iterations exceeded (current threshold: 5, increase the threshold by setting option 'rewriter.max_iter')"
    );
}

fn expand_f(multiplicity: Multiplicity) -> Result<ProofState, rewriter::TacticError> {
    let env = env(true);
    let x = local("x", nat());
    let (_, ps) = state(&[x.clone()], c("p").apply([c("f").apply([x])]));
    let mut elem = rw("f_expand");
    elem.multiplicity = multiplicity;
    let config = RewriteConfig {
        max_iter: 5,
        ..RewriteConfig::default()
    };
    Rewriter::new(&env, config).run(&ps, &[RewriteStep::Rewrite(elem)])
}

#[test]
fn counted_rewrites_beyond_the_limit_exhaust_iterations() {
    for multiplicity in [
        Multiplicity::AtMostN(10),
        Multiplicity::ExactlyN(10),
        Multiplicity::OneOrMore,
    ] {
        let err = expand_f(multiplicity).unwrap_err();
        assert_eq!(err.kind, TacticErrorKind::IterationLimit, "{multiplicity:?}");
        assert_eq!(main_ty(&err.state), "p (f x)", "{multiplicity:?}");
    }

    let ps = expand_f(Multiplicity::AtMostN(5)).unwrap();
    insta::assert_snapshot!(main_ty(&ps), @"p (f (f (f (f (f (f x))))))");
    let ps = expand_f(Multiplicity::ExactlyN(5)).unwrap();
    insta::assert_snapshot!(main_ty(&ps), @"p (f (f (f (f (f (f x))))))");
}

#[test]
fn reflexive_goal_is_closed() {
    for dep_elim in [true, false] {
        let env = env(dep_elim);
        let x = local("x", nat());
        let (root, ps) = state(&[x.clone()], eq_nat(&add(&x, &c("zero")), &x));
        let ps = run(&env, &ps, &[RewriteStep::Rewrite(rw("add_zero"))]);
        assert!(ps.goals().is_empty());
        assert_proves(&env, &ps, &root);
    }
}

#[test]
fn trivial_goals_close_without_steps() {
    let env = env(true);
    let (root, ps) = state(&[], c("true"));
    let ps = run(&env, &ps, &[]);
    assert!(ps.goals().is_empty());
    insta::assert_snapshot!(ps.instantiate_proof(root.meta()), @"true.intro");
}

#[test]
fn symmetric_rewrite_with_a_hypothesis() {
    let env = env(false);
    let x = local("x", nat());
    let y = local("y", nat());
    let h = local("h", eq_nat(&add(&x, &c("zero")), &y));
    let (root, ps) = state(&[x, y.clone(), h.clone()], c("p").apply([y]));
    let mut elem = RewriteElement::new(h);
    elem.symm = true;
    let ps = run(&env, &ps, &[RewriteStep::Rewrite(elem)]);
    insta::assert_snapshot!(main_ty(&ps), @"p (add x zero)");
    assert_proves(&env, &ps, &root);
}

#[test]
fn reduce() {
    let env = env(true);
    let x = local("x", nat());
    let (_, ps) = state(&[x.clone()], c("p").apply([x.clone()]));
    let reduce = RewriteStep::Reduce {
        to: None,
        location: Location::goal(),
    };
    let err = Rewriter::new(&env, RewriteConfig::default())
        .run(&ps, std::slice::from_ref(&reduce))
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::StepFailed);
    insta::assert_snapshot!(err, @"invalid 'rewrite' tactic, rewrite step failed");

    let double_x = c("double").apply([x.clone()]);
    let (root, ps) = state(&[x.clone()], c("p").apply([double_x]));
    let to = RewriteStep::Reduce {
        to: Some(c("p").apply([add(&x, &x)])),
        location: Location::goal(),
    };
    let ps = run(&env, &ps, &[to]);
    insta::assert_snapshot!(main_ty(&ps), @"p (add x x)");
    assert_proves(&env, &ps, &root);
}

#[test]
fn unfold_then_fold() {
    let env = env(true);
    let x = local("x", nat());
    let double_x = c("double").apply([x.clone()]);
    let (root, ps) = state(&[x.clone()], c("p").apply([double_x.clone()]));
    let unfold = RewriteStep::Unfold {
        names: vec![Name::from_str("double")],
        location: Location::goal(),
    };
    let ps = run(&env, &ps, std::slice::from_ref(&unfold));
    insta::assert_snapshot!(main_ty(&ps), @"p (add x x)");
    assert_proves(&env, &ps, &root);

    let err = Rewriter::new(&env, RewriteConfig::default())
        .run(&ps, &[unfold])
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::StepFailed);

    let fold = RewriteStep::Fold {
        term: double_x,
        location: Location::goal(),
    };
    let ps = run(&env, &ps, &[fold]);
    insta::assert_snapshot!(main_ty(&ps), @"p (double x)");
    assert_proves(&env, &ps, &root);
}

#[test]
fn failure_trace_lists_rejected_candidates() {
    let env = env(true);
    let x = local("x", nat());
    let (_, ps) = state(&[x.clone()], c("p").apply([add(&x, &c("zero"))]));
    let step = RewriteStep::Rewrite(rw("add_junk"));
    let err = Rewriter::new(&env, RewriteConfig::default())
        .run(&ps, std::slice::from_ref(&step))
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::StepFailed);
    insta::assert_snapshot!(normalize_metas(&err.to_string()), @r"
    invalid 'rewrite' tactic, rewrite step failed using pattern
      add ?_0 zero
    matching failures in the goal
      -lemma still contains meta-variables
        add_junk x (?m x)
      after the equation source has been unified with subterm
        add x zero
      (6 other subterms did not match the pattern)
    ");

    let config = RewriteConfig {
        trace: false,
        ..RewriteConfig::default()
    };
    let err = Rewriter::new(&env, config).run(&ps, &[step]).unwrap_err();
    insta::assert_snapshot!(err, @"invalid 'rewrite' tactic, rewrite step failed");
}

struct FailingUnifier;

impl Unifier for FailingUnifier {
    fn unify<'s>(
        &'s self,
        _tc: &'s TypeChecker<'s>,
        _constraints: Vec<Constraint>,
        _subst: Substitution,
        _config: UnifierConfig,
    ) -> Solutions<'s> {
        Box::new(std::iter::once(Err::<(Substitution, Vec<Constraint>), _>(
            anyhow::anyhow!("unifier crashed"),
        )))
    }
}

#[test]
fn unifier_errors_only_reject_the_candidate() {
    let env = env(true);
    let x = local("x", nat());
    let (_, ps) = state(&[x.clone()], c("p").apply([add(&x, &c("zero"))]));
    let err = Rewriter::new(&env, RewriteConfig::default())
        .with_unifier(&FailingUnifier)
        .run(&ps, &[RewriteStep::Rewrite(rw("add_zero"))])
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::StepFailed);
    insta::assert_snapshot!(err, @r"
    invalid 'rewrite' tactic, rewrite step failed using pattern
      add ?_0 zero
    matching failures in the goal
      -an exception occurred when unifying the subterm
        add x zero
      (6 other subterms did not match the pattern)
    ");
}

#[test]
fn malformed_steps() {
    let env = env(true);
    let x = local("x", nat());
    let (_, ps) = state(&[x.clone()], c("p").apply([x]));
    let rewriter = Rewriter::new(&env, RewriteConfig::default());

    let err = rewriter
        .run(&ps, &[RewriteStep::Rewrite(rw("zero"))])
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::Malformed);
    insta::assert_snapshot!(err, @"invalid rewrite tactic, given lemma is not an equality");

    let mut elem = rw("add_zero");
    elem.location = Location::Targets {
        hyps: vec![(Name::from_str("h.x"), Occurrence::All)],
        goal: None,
    };
    let err = rewriter.run(&ps, &[RewriteStep::Rewrite(elem)]).unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::Malformed);
    insta::assert_snapshot!(err, @"invalid hypothesis name 'h.x', hypothesis names must be atomic");

    let unknown: Term = mk_const(Name::from_str("no_such_lemma"), vec![]);
    let err = rewriter
        .run(&ps, &[RewriteStep::Rewrite(RewriteElement::new(unknown))])
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::StepFailed);
    insta::assert_snapshot!(err, @"invalid 'rewrite' tactic, unknown constant: no_such_lemma");
}

#[test]
fn no_goals_and_interrupts() {
    let env = env(true);
    let step = RewriteStep::Rewrite(rw("add_zero"));
    let err = Rewriter::new(&env, RewriteConfig::default())
        .run(&ProofState::default(), std::slice::from_ref(&step))
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::NoGoals);
    insta::assert_snapshot!(err, @"invalid 'rewrite' tactic, there are no goals to be proved");

    let x = local("x", nat());
    let (_, ps) = state(&[x.clone()], c("p").apply([add(&x, &c("zero"))]));
    let interrupt = Interrupt::new();
    interrupt.request();
    let err = Rewriter::new(&env, RewriteConfig::default())
        .with_interrupt(interrupt)
        .run(&ps, &[step])
        .unwrap_err();
    assert_eq!(err.kind, TacticErrorKind::Interrupted);
    insta::assert_snapshot!(main_ty(&err.state), @"p (add x zero)");
}

#[test]
fn decoded_steps_run() {
    let env = env(true);
    let x = local("x", nat());
    let h = local("h", c("p").apply([add(&x, &c("zero"))]));
    let (_, ps) = state(&[x.clone(), h], c("p").apply([add(&x, &c("zero"))]));
    let mut elem = rw("add_zero");
    elem.multiplicity = Multiplicity::AtMostN(2);
    elem.location = Location::targets(
        vec![(Name::from_str("h"), Occurrence::All)],
        Some(Occurrence::All),
    )
    .unwrap();
    let step = RewriteStep::Rewrite(elem);
    let registry = ExtRegistry::with_builtins();
    let decoded = RewriteStep::decode(&step.encode(), &registry).unwrap();
    assert_eq!(decoded, step);
    let ps = run(&env, &ps, &[decoded]);
    insta::assert_snapshot!(ps.main_goal().unwrap(), @"(x : nat) (h : p x) ⊢ p x");
}
