//! A rewrite tactic engine for a dependent-type proof assistant.
//!
//! The engine lives in [rewrite]. The remaining modules are the term language, environment,
//! type checker, unifier, and elaborator it is built on.

pub mod codec;
pub mod config;
pub mod elab;
pub mod env;
pub mod ext;
pub mod local_context;
pub mod matcher;
pub mod rewrite;
pub mod step;
pub mod tactic;
pub mod tc;
pub mod tt;
pub mod unify;

pub use crate::config::{Options, RewriteConfig};
pub use crate::rewrite::{RewriteError, Rewriter};
pub use crate::step::{Location, Multiplicity, Occurrence, RewriteElement, RewriteStep};
pub use crate::tactic::{Goal, ProofState, TacticError, TacticErrorKind};
