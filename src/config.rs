use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

fn load_dotenv_from(env_path: &Path) {
    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            pairs.push((key, value));
        }
    }

    pairs
}

/// Parse a boolean flag the way operators write them in `.env` files.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Options that shape which states a device exposes and where the
/// enumeration data comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Expose the accumulating `debug_output` state
    pub debug_output: bool,
    /// Expose the `messages_stat` state and track MessageReceived traffic
    pub messages_stat: bool,
    /// Device inventory produced by the enumeration collaborator
    pub inventory_path: PathBuf,
    /// Extra property-bag model families, appended after the built-in table
    pub external_devices_path: Option<PathBuf>,
    /// Topic prefix for published states
    pub state_prefix: String,
}

impl GatewayConfig {
    /// State names removed from every resolved spec by these options.
    pub fn excluded_states(&self) -> Vec<&'static str> {
        let mut excluded = Vec::new();
        if !self.debug_output {
            excluded.push("debug_output");
        }
        if !self.messages_stat {
            excluded.push("messages_stat");
        }
        excluded
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            debug_output: false,
            messages_stat: false,
            inventory_path: PathBuf::from("inventory.json"),
            external_devices_path: None,
            state_prefix: "gw3".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "192.168.1.1".to_string(),
                broker_port: 1883,
                client_id: "gateway3-bridge".to_string(),
                username: None,
                password: None,
            },
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MQTT configuration
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }

        // Gateway options
        if let Ok(flag) = std::env::var("GW3_DEBUG_OUTPUT")
            && let Some(f) = parse_flag(&flag)
        {
            config.gateway.debug_output = f;
        }
        if let Ok(flag) = std::env::var("GW3_MESSAGES_STAT")
            && let Some(f) = parse_flag(&flag)
        {
            config.gateway.messages_stat = f;
        }
        if let Ok(path) = std::env::var("GW3_INVENTORY") {
            config.gateway.inventory_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GW3_EXTERNAL_DEVICES") {
            config.gateway.external_devices_path = Some(PathBuf::from(path));
        }
        if let Ok(prefix) = std::env::var("GW3_STATE_PREFIX") {
            config.gateway.state_prefix = prefix.trim_end_matches('/').to_string();
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotenv_strips_quotes_and_comments() {
        let content = "# comment\nMQTT_BROKER_HOST = 10.0.0.5\nMQTT_USERNAME=\"gw user\"\n\nBROKEN\nX='y'";
        let pairs = parse_dotenv(content);
        assert_eq!(
            pairs,
            vec![
                ("MQTT_BROKER_HOST", "10.0.0.5"),
                ("MQTT_USERNAME", "gw user"),
                ("X", "y"),
            ]
        );
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_excluded_states_follow_options() {
        let mut gateway = GatewayConfig::default();
        assert_eq!(gateway.excluded_states(), vec!["debug_output", "messages_stat"]);

        gateway.debug_output = true;
        assert_eq!(gateway.excluded_states(), vec!["messages_stat"]);

        gateway.messages_stat = true;
        assert!(gateway.excluded_states().is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.gateway.state_prefix, "gw3");
        assert!(config.gateway.external_devices_path.is_none());
    }
}
