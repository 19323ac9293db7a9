//! Diagnostics of a failed rewrite step.

use std::fmt::Display;

use crate::tt::{Name, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The subterm does not match the pattern.
    NoMatch,
    /// The subterm matched but is not unifiable with the equation source.
    Unification,
    /// A collaborator raised an error while unifying.
    Exception,
    /// The lemma still contains metavariables after unification.
    HasMetavars,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FailureKind,
    pub lemma: Term,
    pub subterm: Term,
}

/// What happened in one goal or hypothesis.
#[derive(Debug, Clone)]
pub struct TargetTrace {
    /// `None` for the goal.
    pub hyp: Option<Name>,
    /// Most recent last.
    pub failures: Vec<Failure>,
    pub matched: Option<Term>,
}

impl TargetTrace {
    fn no_match_count(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| failure.kind == FailureKind::NoMatch)
            .count()
    }

    fn where_(&self) -> String {
        match &self.hyp {
            Some(name) => format!("the hypothesis '{name}'"),
            None => "the goal".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Trace {
    pub lemma: Term,
    pub pattern: Term,
    pub targets: Vec<TargetTrace>,
}

impl Trace {
    pub fn new(lemma: Term, pattern: Term) -> Trace {
        Trace {
            lemma,
            pattern,
            targets: vec![],
        }
    }

    pub fn add_target(&mut self, hyp: Option<Name>) {
        self.targets.push(TargetTrace {
            hyp,
            failures: vec![],
            matched: None,
        });
    }

    pub fn add_failure(&mut self, kind: FailureKind, lemma: Term, subterm: Term) {
        if let Some(target) = self.targets.last_mut() {
            target.failures.push(Failure {
                kind,
                lemma,
                subterm,
            });
        }
    }

    pub fn add_match(&mut self, subterm: Term) {
        if let Some(target) = self.targets.last_mut() {
            target.matched = Some(subterm);
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FailureKind::NoMatch => Ok(()),
            FailureKind::Unification => write!(
                f,
                "\n  -fail to unify equation source\n    {}\n  with subterm\n    {}",
                self.lemma, self.subterm
            ),
            FailureKind::Exception => write!(
                f,
                "\n  -an exception occurred when unifying the subterm\n    {}",
                self.subterm
            ),
            FailureKind::HasMetavars => write!(
                f,
                "\n  -lemma still contains meta-variables\n    {}\n  after the equation source has been unified with subterm\n    {}",
                self.lemma, self.subterm
            ),
        }
    }
}

impl Display for TargetTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.matched.is_some() {
            return Ok(());
        }
        let no_match = self.no_match_count();
        if no_match == self.failures.len() {
            return write!(f, "\nno subterm in {} matched the pattern", self.where_());
        }
        write!(f, "\nmatching failures in {}", self.where_())?;
        for failure in self.failures.iter().rev() {
            write!(f, "{failure}")?;
        }
        if no_match > 0 {
            write!(f, "\n  ({no_match} other subterms did not match the pattern)")?;
        }
        Ok(())
    }
}

impl Display for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rewrite step failed using pattern\n  {}", self.pattern)?;
        for target in &self.targets {
            write!(f, "{target}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tt::mk_const;

    fn c(name: &str) -> Term {
        mk_const(Name::from_str(name), vec![])
    }

    #[test]
    fn failures_are_listed_most_recent_first() {
        let mut trace = Trace::new(c("h"), c("p"));
        trace.add_target(None);
        trace.add_failure(FailureKind::NoMatch, c("h"), c("x"));
        trace.add_failure(FailureKind::Unification, c("a"), c("b"));
        trace.add_failure(FailureKind::HasMetavars, c("h"), c("c"));
        trace.add_target(Some(Name::from_str("h1")));
        trace.add_target(Some(Name::from_str("h2")));
        trace.add_match(c("d"));
        insta::assert_snapshot!(trace, @r"
        rewrite step failed using pattern
          p
        matching failures in the goal
          -lemma still contains meta-variables
            h
          after the equation source has been unified with subterm
            c
          -fail to unify equation source
            a
          with subterm
            b
          (1 other subterms did not match the pattern)
        no subterm in the hypothesis 'h1' matched the pattern
        ");
    }

    #[test]
    fn exceptions_show_the_subterm() {
        let mut trace = Trace::new(c("h"), c("p"));
        trace.add_target(Some(Name::from_str("h")));
        trace.add_failure(FailureKind::Exception, c("h"), c("q"));
        insta::assert_snapshot!(trace, @r"
        rewrite step failed using pattern
          p
        matching failures in the hypothesis 'h'
          -an exception occurred when unifying the subterm
            q
        ");
    }
}
