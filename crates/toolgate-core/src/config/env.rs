use std::path::PathBuf;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TOOLGATE_DEFAULT_POLICY") {
            if let Ok(policy) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.policy.default_policy = policy;
            } else {
                tracing::warn!("ignoring invalid TOOLGATE_DEFAULT_POLICY value: {v}");
            }
        }
        if let Ok(v) = std::env::var("TOOLGATE_CHANNEL_TYPE") {
            match v.parse() {
                Ok(kind) => self.channel.kind = kind,
                Err(_) => tracing::warn!("ignoring invalid TOOLGATE_CHANNEL_TYPE value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("TOOLGATE_CHANNEL_TIMEOUT") {
            match v.parse::<u64>() {
                Ok(secs) if secs > 0 => self.channel.timeout = secs,
                _ => tracing::warn!("ignoring invalid TOOLGATE_CHANNEL_TIMEOUT value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("TOOLGATE_WEBHOOK_ENDPOINT") {
            self.channel.endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("TOOLGATE_WEBHOOK_TOKEN") {
            self.channel.token = Some(v);
        }
        if let Ok(v) = std::env::var("TOOLGATE_FILE_BASE_PATH") {
            self.channel.base_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("TOOLGATE_TASKS_MAX_CONCURRENT") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.tasks.max_concurrent = n,
                _ => tracing::warn!("ignoring invalid TOOLGATE_TASKS_MAX_CONCURRENT value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("TOOLGATE_AUDIT_DESTINATION") {
            self.audit.destination = v;
        }
    }
}
