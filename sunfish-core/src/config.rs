//! Service configuration, loaded from a TOML file at startup.

use serde::Deserialize;

fn default_redfish_root() -> String {
    "/redfish/v1/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Debug, Deserialize)]
pub struct PluginConfig {
    pub module: String,
    pub class: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BackendConfig {
    pub fs_root: String,
    pub subscribers_root: String,
    pub fs_private: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AgentClientConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_redfish_root")]
    pub redfish_root: String,
    pub storage_backend: PluginConfig,
    pub events_handler: PluginConfig,
    pub objects_handler: PluginConfig,
    pub backend_conf: BackendConfig,
    #[serde(default)]
    pub agent_client: AgentClientConfig,
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let toml_src = r#"
            [storage_backend]
            module = "sunfish_core.store"
            class = "MemoryResourceStore"

            [events_handler]
            module = "sunfish_core.event_handlers"
            class = "EventHandlerTable"

            [objects_handler]
            module = "sunfish_core.object_handlers"
            class = "ObjectHandlerTable"

            [backend_conf]
            fs_root = "/var/lib/sunfish/resources"
            subscribers_root = "/var/lib/sunfish/subscriptions"
            fs_private = "/var/lib/sunfish/private"
        "#;
        let config = Config::from_toml_str(toml_src).unwrap();
        assert_eq!(config.redfish_root, "/redfish/v1/");
        assert_eq!(config.agent_client.timeout_secs, 30);
        assert_eq!(config.storage_backend.class, "MemoryResourceStore");
    }

    #[test]
    fn honors_explicit_overrides() {
        let toml_src = r#"
            redfish_root = "/redfish/v1/"

            [storage_backend]
            module = "m"
            class = "c"

            [events_handler]
            module = "m"
            class = "c"

            [objects_handler]
            module = "m"
            class = "c"

            [backend_conf]
            fs_root = "/a"
            subscribers_root = "/b"
            fs_private = "/c"

            [agent_client]
            timeout_secs = 5
        "#;
        let config = Config::from_toml_str(toml_src).unwrap();
        assert_eq!(config.agent_client.timeout_secs, 5);
    }
}
