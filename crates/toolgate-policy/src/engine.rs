use std::sync::Arc;

use crate::config::DefaultPolicy;
use crate::decision::{DecisionMethod, Evaluation, PolicyDecision};
use crate::rules::ArgumentMatch;
use crate::signature::{Invocation, ToolArgs};
use crate::store::PolicyStore;

/// Pure decision function over the current store state.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    store: Arc<PolicyStore>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Decide allow, deny or ask for one invocation.
    ///
    /// Stages run in fixed order and the first verdict wins. The result
    /// depends only on the static snapshot and session overlay, so repeated
    /// calls with unchanged state return the same evaluation.
    #[must_use]
    pub fn evaluate(&self, tool: &str, args: &ToolArgs) -> Evaluation {
        let policy = self.store.snapshot();
        let invocation = Invocation::new(tool, args, &policy.shell_tools);

        if let Err(rejection) = policy.sanitizer.sanitize(&invocation) {
            tracing::debug!(tool, %rejection, "sanitizer rejected invocation");
            return decided(PolicyDecision::deny(
                format!("rejected by sanitizer: {rejection}"),
                DecisionMethod::Sanitizer,
            ));
        }

        let session = self.store.session();

        if let Some(rule) = session.blacklist.find_match(&invocation, ArgumentMatch::Anywhere) {
            return decided(PolicyDecision::deny(
                format!("denied by session blacklist ({rule})"),
                DecisionMethod::SessionBlacklist,
            ));
        }
        if let Some(rule) = policy.blacklist.find_match(&invocation, ArgumentMatch::Anywhere) {
            return decided(PolicyDecision::deny(
                format!("denied by static blacklist ({rule})"),
                DecisionMethod::StaticBlacklist,
            ));
        }
        if let Some(rule) = session.whitelist.find_match(&invocation, ArgumentMatch::Leading) {
            return decided(PolicyDecision::allow(
                format!("allowed by session whitelist ({rule})"),
                DecisionMethod::SessionWhitelist,
            ));
        }
        if let Some(rule) = policy.whitelist.find_match(&invocation, ArgumentMatch::Leading) {
            return decided(PolicyDecision::allow(
                format!("allowed by static whitelist ({rule})"),
                DecisionMethod::StaticWhitelist,
            ));
        }
        if session.allow_all {
            return decided(PolicyDecision::allow(
                "all remaining calls allowed for this session",
                DecisionMethod::AllowAll,
            ));
        }

        match policy.default_policy {
            DefaultPolicy::Allow => decided(PolicyDecision::allow(
                "no rule matched; default policy allows",
                DecisionMethod::Default,
            )),
            DefaultPolicy::Deny => decided(PolicyDecision::deny(
                "no rule matched; default policy denies",
                DecisionMethod::Default,
            )),
            DefaultPolicy::Ask => Evaluation::Ask {
                reason: format!("no rule matched `{}`", invocation.signature()),
            },
        }
    }
}

fn decided(decision: PolicyDecision) -> Evaluation {
    tracing::debug!(
        allowed = decision.allowed,
        method = %decision.method,
        reason = %decision.reason,
        "policy evaluated"
    );
    Evaluation::Decided(decision)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::config::PolicyConfig;
    use crate::store::SessionRule;

    fn engine(toml_str: &str) -> PolicyEngine {
        let config: PolicyConfig = toml::from_str(toml_str).unwrap();
        PolicyEngine::new(Arc::new(PolicyStore::from_config(&config).unwrap()))
    }

    fn command(cmd: &str) -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("command".into(), json!(cmd));
        args
    }

    fn method(eval: &Evaluation) -> Option<DecisionMethod> {
        eval.decision().map(|d| d.method)
    }

    const SCENARIO: &str = r#"
        default_policy = "ask"
        [blacklist]
        patterns = ["rm -rf *"]
        [whitelist]
        patterns = ["git *"]
    "#;

    #[test]
    fn scenario_whitelist_blacklist_and_ask() {
        let engine = engine(SCENARIO);

        let git = engine.evaluate("bash", &command("git status"));
        let d = git.decision().unwrap();
        assert!(d.allowed);
        assert_eq!(d.method, DecisionMethod::StaticWhitelist);

        let rm = engine.evaluate("bash", &command("rm -rf /tmp"));
        let d = rm.decision().unwrap();
        assert!(!d.allowed);
        assert_eq!(d.method, DecisionMethod::StaticBlacklist);

        assert!(engine.evaluate("bash", &command("curl example.com")).is_ask());
    }

    #[test]
    fn argument_rule_respects_token_boundary() {
        let engine = engine(
            r#"
            [blacklist.arguments.shell_tool]
            command = ["sudo"]
        "#,
        );
        let sudo = engine.evaluate("shell_tool", &command("sudo apt update"));
        assert_eq!(method(&sudo), Some(DecisionMethod::StaticBlacklist));

        let sudoku = engine.evaluate("shell_tool", &command("sudoku-solver run"));
        assert!(sudoku.is_ask());
    }

    #[test]
    fn blacklist_argument_matches_anywhere() {
        let engine = engine(
            r#"
            [blacklist.arguments.shell_tool]
            command = ["sudo"]
        "#,
        );
        let eval = engine.evaluate("shell_tool", &command("env sudo ls"));
        assert_eq!(method(&eval), Some(DecisionMethod::StaticBlacklist));
    }

    #[test]
    fn whitelist_argument_matches_leading_only() {
        let engine = engine(
            r#"
            [whitelist.arguments.shell_tool]
            command = ["git"]
        "#,
        );
        let leading = engine.evaluate("shell_tool", &command("git log"));
        assert_eq!(method(&leading), Some(DecisionMethod::StaticWhitelist));

        let embedded = engine.evaluate("shell_tool", &command("env git log"));
        assert!(embedded.is_ask());
    }

    #[test]
    fn default_policies() {
        let allow = engine(r#"default_policy = "allow""#).evaluate("notes", &ToolArgs::new());
        assert_eq!(method(&allow), Some(DecisionMethod::Default));
        assert!(allow.decision().unwrap().allowed);

        let deny = engine(r#"default_policy = "deny""#).evaluate("notes", &ToolArgs::new());
        assert_eq!(method(&deny), Some(DecisionMethod::Default));
        assert!(!deny.decision().unwrap().allowed);

        let ask = engine("").evaluate("notes", &ToolArgs::new());
        assert_eq!(
            ask,
            Evaluation::Ask {
                reason: "no rule matched `notes()`".into()
            }
        );
    }

    #[test]
    fn sanitizer_overrides_whitelist_and_session() {
        let engine = engine(
            r#"
            [whitelist]
            tools = ["bash"]
        "#,
        );
        engine.store().allow_all_remaining();
        engine
            .store()
            .remember_allow(&SessionRule::Tool("bash".into()))
            .unwrap();
        let eval = engine.evaluate("bash", &command("git status; rm -rf /"));
        assert_eq!(method(&eval), Some(DecisionMethod::Sanitizer));
        assert!(!eval.decision().unwrap().allowed);
    }

    #[test]
    fn session_rules_order() {
        let engine = engine(SCENARIO);
        let store = engine.store();

        store
            .remember_allow(&SessionRule::Pattern("curl *".into()))
            .unwrap();
        let curl = engine.evaluate("bash", &command("curl example.com"));
        assert_eq!(method(&curl), Some(DecisionMethod::SessionWhitelist));

        store.remember_deny(&SessionRule::Tool("bash".into())).unwrap();
        let git = engine.evaluate("bash", &command("git status"));
        assert_eq!(method(&git), Some(DecisionMethod::SessionBlacklist));

        store.clear_session();
        let git = engine.evaluate("bash", &command("git status"));
        assert_eq!(method(&git), Some(DecisionMethod::StaticWhitelist));
    }

    #[test]
    fn session_whitelist_cannot_override_static_blacklist() {
        let engine = engine(SCENARIO);
        engine
            .store()
            .remember_allow(&SessionRule::Tool("bash".into()))
            .unwrap();
        let rm = engine.evaluate("bash", &command("rm -rf /tmp"));
        assert_eq!(method(&rm), Some(DecisionMethod::StaticBlacklist));
    }

    #[test]
    fn allow_all_after_lists() {
        let engine = engine(SCENARIO);
        engine.store().allow_all_remaining();
        let curl = engine.evaluate("bash", &command("curl example.com"));
        assert_eq!(method(&curl), Some(DecisionMethod::AllowAll));
        let rm = engine.evaluate("bash", &command("rm -rf /tmp"));
        assert_eq!(method(&rm), Some(DecisionMethod::StaticBlacklist));
    }

    #[test]
    fn generic_tool_pattern_uses_sorted_signature() {
        let engine = engine(
            r#"
            [blacklist]
            patterns = ["write_file(*path=/etc/*"]
        "#,
        );
        let mut args = ToolArgs::new();
        args.insert("path".into(), json!("/etc/hosts"));
        args.insert("content".into(), json!("x"));
        let eval = engine.evaluate("write_file", &args);
        assert_eq!(method(&eval), Some(DecisionMethod::StaticBlacklist));
    }

    #[test]
    fn pattern_matching_is_case_insensitive() {
        let engine = engine(SCENARIO);
        let eval = engine.evaluate("bash", &command("GIT Status"));
        assert_eq!(method(&eval), Some(DecisionMethod::StaticWhitelist));
    }

    proptest! {
        #[test]
        fn evaluation_is_idempotent(cmd in "[a-z ]{0,24}", tool in "[a-z_]{1,12}") {
            let engine = engine(SCENARIO);
            let args = command(&cmd);
            let first = engine.evaluate(&tool, &args);
            let second = engine.evaluate(&tool, &args);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn blacklist_always_beats_whitelist(tool in "[a-z_]{1,12}", cmd in "[a-z ]{0,24}") {
            let engine = engine(&format!(
                "[blacklist]\ntools = [\"{tool}\"]\n[whitelist]\ntools = [\"{tool}\"]\n"
            ));
            engine.store().allow_all_remaining();
            let eval = engine.evaluate(&tool, &command(&cmd));
            let decision = eval.decision().unwrap();
            prop_assert!(!decision.allowed);
            prop_assert_eq!(decision.method, DecisionMethod::StaticBlacklist);
        }

        #[test]
        fn sanitizer_rejection_is_final(
            prefix in "[a-z ]{0,12}",
            meta in prop::sample::select(vec![";", "|", "&", "`", "$(", ">", "<"]),
            suffix in "[a-z ]{0,12}",
        ) {
            let engine = engine("default_policy = \"allow\"\n[whitelist]\ntools = [\"bash\"]\npatterns = [\"*\"]\n");
            engine.store().allow_all_remaining();
            let eval = engine.evaluate("bash", &command(&format!("{prefix}{meta}{suffix}")));
            let decision = eval.decision().unwrap();
            prop_assert!(!decision.allowed);
            prop_assert_eq!(decision.method, DecisionMethod::Sanitizer);
        }
    }
}
