//! Sanitizer, rule store and priority-ordered policy engine.
//!
//! Evaluation order is fixed: sanitizer, session blacklist, static blacklist,
//! session whitelist, static whitelist, session allow-all, default policy.
//! The first stage that produces a verdict wins.

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod rules;
pub mod sanitizer;
pub mod signature;
pub mod store;

pub use config::{DefaultPolicy, PathScopeConfig, PolicyConfig, PolicyListConfig, SanitizationConfig};
pub use decision::{DecisionMethod, Evaluation, PolicyDecision};
pub use engine::PolicyEngine;
pub use error::PolicyError;
pub use rules::{ArgumentMatch, PolicyList, RuleMatch};
pub use sanitizer::{Rejection, Sanitizer};
pub use signature::{Invocation, ToolArgs};
pub use store::{PolicyStore, SessionCommand, SessionRule, SessionRules, StaticPolicy};
