use std::io::Write;

use serial_test::serial;
use toolgate_approval::ChannelKind;
use toolgate_policy::DefaultPolicy;

use super::*;

const ENV_KEYS: [&str; 8] = [
    "TOOLGATE_DEFAULT_POLICY",
    "TOOLGATE_CHANNEL_TYPE",
    "TOOLGATE_CHANNEL_TIMEOUT",
    "TOOLGATE_WEBHOOK_ENDPOINT",
    "TOOLGATE_WEBHOOK_TOKEN",
    "TOOLGATE_FILE_BASE_PATH",
    "TOOLGATE_TASKS_MAX_CONCURRENT",
    "TOOLGATE_AUDIT_DESTINATION",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{content}").unwrap();
    path
}

#[test]
fn defaults() {
    let config = Config::default();
    assert_eq!(config.policy.default_policy, DefaultPolicy::Ask);
    assert!(config.policy.shell_tools.iter().any(|t| t == "bash"));
    assert_eq!(config.channel.kind, ChannelKind::Console);
    assert_eq!(config.channel.timeout, 30);
    assert_eq!(config.tasks.max_concurrent, 8);
    assert!(config.audit.enabled);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.policy.default_policy, DefaultPolicy::Ask);
    assert_eq!(config.channel.timeout, 30);
}

#[test]
#[serial]
fn parse_full_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "toolgate.toml",
        r#"
default_policy = "deny"
shell_tools = ["bash"]

[blacklist]
tools = ["format_disk"]
patterns = ["rm -rf *"]

[blacklist.arguments.bash]
command = ["sudo"]

[whitelist]
patterns = ["git *"]

[sanitization.path_scope]
enabled = true
allowed_roots = ["/workspace"]

[channel]
type = "webhook"
timeout = 10
endpoint = "https://approvals.example/hook"

[tasks]
max_concurrent = 2
retention_secs = 60

[audit]
destination = "/var/log/toolgate/audit.jsonl"
"#,
    );
    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.policy.default_policy, DefaultPolicy::Deny);
    assert_eq!(config.policy.blacklist.tools, vec!["format_disk"]);
    assert_eq!(config.policy.blacklist.arguments["bash"]["command"], vec!["sudo"]);
    assert_eq!(config.policy.whitelist.patterns, vec!["git *"]);
    assert!(config.policy.sanitization.path_scope.enabled);
    assert_eq!(config.channel.kind, ChannelKind::Webhook);
    assert_eq!(config.channel.timeout, 10);
    assert_eq!(config.tasks.max_concurrent, 2);
    assert_eq!(config.tasks.retention_secs, 60);
    assert_eq!(config.audit.destination, "/var/log/toolgate/audit.jsonl");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn parse_json_with_camel_case_alias() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "policy.json",
        r#"{
            "defaultPolicy": "allow",
            "blacklist": { "patterns": ["rm -rf *"] },
            "channel": { "type": "interactive" }
        }"#,
    );
    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.policy.default_policy, DefaultPolicy::Allow);
    assert_eq!(config.policy.blacklist.patterns, vec!["rm -rf *"]);
    assert_eq!(config.channel.kind, ChannelKind::Console);
}

#[test]
#[serial]
fn malformed_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "bad.toml", "default_policy = [");
    clear_env();

    let err = Config::load(&path).unwrap_err();
    assert_eq!(err.to_string(), "failed to parse config file");
}

#[test]
fn validate_rejects_bad_glob() {
    let mut config = Config::default();
    config.policy.whitelist.patterns.push("[unclosed".into());
    let err = config.validate().unwrap_err();
    assert_eq!(err.to_string(), "invalid policy rules");
}

#[test]
fn validate_rejects_incomplete_channel() {
    let mut config = Config::default();
    config.channel.kind = ChannelKind::Webhook;
    assert!(config.validate().is_err());

    config.channel.kind = ChannelKind::File;
    assert!(config.validate().is_err());
    config.channel.base_path = Some("/tmp/approvals".into());
    assert!(config.validate().is_ok());

    config.channel.timeout = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_empty_pool() {
    let mut config = Config::default();
    config.tasks.max_concurrent = 0;
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    unsafe {
        std::env::set_var("TOOLGATE_DEFAULT_POLICY", "deny");
        std::env::set_var("TOOLGATE_CHANNEL_TYPE", "file");
        std::env::set_var("TOOLGATE_CHANNEL_TIMEOUT", "45");
        std::env::set_var("TOOLGATE_FILE_BASE_PATH", "/srv/approvals");
        std::env::set_var("TOOLGATE_WEBHOOK_ENDPOINT", "https://hook.example");
        std::env::set_var("TOOLGATE_WEBHOOK_TOKEN", "secret");
        std::env::set_var("TOOLGATE_TASKS_MAX_CONCURRENT", "3");
        std::env::set_var("TOOLGATE_AUDIT_DESTINATION", "/tmp/audit.jsonl");
    }

    let mut config = Config::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.policy.default_policy, DefaultPolicy::Deny);
    assert_eq!(config.channel.kind, ChannelKind::File);
    assert_eq!(config.channel.timeout, 45);
    assert_eq!(
        config.channel.base_path.as_deref(),
        Some(std::path::Path::new("/srv/approvals"))
    );
    assert_eq!(config.channel.endpoint.as_deref(), Some("https://hook.example"));
    assert_eq!(config.channel.token.as_deref(), Some("secret"));
    assert_eq!(config.tasks.max_concurrent, 3);
    assert_eq!(config.audit.destination, "/tmp/audit.jsonl");
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("TOOLGATE_DEFAULT_POLICY", "maybe");
        std::env::set_var("TOOLGATE_CHANNEL_TYPE", "carrier-pigeon");
        std::env::set_var("TOOLGATE_CHANNEL_TIMEOUT", "0");
        std::env::set_var("TOOLGATE_TASKS_MAX_CONCURRENT", "many");
    }

    let mut config = Config::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.policy.default_policy, DefaultPolicy::Ask);
    assert_eq!(config.channel.kind, ChannelKind::Console);
    assert_eq!(config.channel.timeout, 30);
    assert_eq!(config.tasks.max_concurrent, 8);
}
