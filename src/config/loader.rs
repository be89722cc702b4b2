use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::router::RouteKind;

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate cross-references and invariants.
    pub fn validate(&self) -> Result<()> {
        let mut usernames = HashSet::new();
        for client in &self.clients {
            if !usernames.insert(&client.username) {
                anyhow::bail!("duplicate client username: {}", client.username);
            }

            if client.password_hash.len() != 64
                || !client.password_hash.bytes().all(|b| b.is_ascii_hexdigit())
            {
                anyhow::bail!(
                    "client '{}': password_hash must be hex SHA-256",
                    client.username
                );
            }

            for num in &client.numbers {
                if num.number.is_empty() {
                    anyhow::bail!("client '{}' has an empty number", client.username);
                }
                if num.carrier.is_empty() {
                    anyhow::bail!(
                        "number '{}' of client '{}' has no carrier",
                        num.number,
                        client.username
                    );
                }
            }
        }

        // The pair (number, client) is unique; so is the number itself, since
        // a number is bound to exactly one client.
        let mut numbers = HashSet::new();
        for client in &self.clients {
            for num in &client.numbers {
                if !numbers.insert(&num.number) {
                    anyhow::bail!("number '{}' is owned by more than one client", num.number);
                }
            }
        }

        let mut carrier_names = HashSet::new();
        for carrier in &self.carriers {
            if !carrier_names.insert(&carrier.name) {
                anyhow::bail!("duplicate carrier name: {}", carrier.name);
            }
        }

        for route in &self.routes {
            if route.endpoint.is_empty() {
                anyhow::bail!("route with prefix '{}' has no endpoint", route.prefix);
            }
            if route.kind == RouteKind::Carrier && !carrier_names.contains(&route.endpoint) {
                anyhow::bail!(
                    "route with prefix '{}' references unknown carrier: {}",
                    route.prefix,
                    route.endpoint
                );
            }
        }

        info!("configuration validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::NumberMatch;

    const HASH: &str = "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b";

    fn minimal_yaml() -> String {
        format!(
            r#"
clients:
  - username: acme
    password_hash: "{HASH}"
    numbers:
      - number: "+15550001"
        carrier: twilio

carriers:
  - name: twilio
    type: twilio
    account_sid: AC123
    auth_token: tok

routes:
  - type: carrier
    endpoint: twilio
"#
        )
    }

    #[test]
    fn minimal_config_parses() {
        let config = Config::from_yaml(&minimal_yaml()).unwrap();
        assert_eq!(config.clients.len(), 1);
        assert_eq!(config.listeners.smpp.address.port(), 2775);
        assert_eq!(config.listeners.mm4.address.port(), 2566);
        assert_eq!(config.settings.number_match, NumberMatch::Substring);
    }

    #[test]
    fn settings_toggle_exact_matching() {
        let yaml = format!(
            "{}\nsettings:\n  number_match: exact\n  mm4_timeout: 5s\n",
            minimal_yaml()
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.settings.number_match, NumberMatch::Exact);
        assert_eq!(config.settings.mm4_timeout.as_secs(), 5);
    }

    #[test]
    fn duplicate_number_is_rejected() {
        let yaml = format!(
            r#"
clients:
  - username: acme
    password_hash: "{HASH}"
    numbers:
      - number: "+15550001"
        carrier: twilio
  - username: globex
    password_hash: "{HASH}"
    numbers:
      - number: "+15550001"
        carrier: twilio
"#
        );
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn route_to_unknown_carrier_is_rejected() {
        let yaml = format!(
            r#"
clients:
  - username: acme
    password_hash: "{HASH}"

routes:
  - type: carrier
    endpoint: nexmo
"#
        );
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn malformed_password_hash_is_rejected() {
        let yaml = r#"
clients:
  - username: acme
    password_hash: "not-a-digest"
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}
