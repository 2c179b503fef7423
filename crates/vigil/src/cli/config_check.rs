//! `vigil config check` (spec.md §6, SPEC_FULL.md C16): loads and validates
//! the configuration tree without touching any outbound dependency,
//! printing the resolved tree back with secret-reference fields redacted
//! rather than resolved (resolving them would require live vault access,
//! which this command deliberately avoids).

use std::path::Path;

use vigil_mcp::config::{load_config, ConfigError, VigilConfig};

pub fn run(config_path: Option<&Path>, json: bool) -> Result<(), ConfigError> {
    let mut config = load_config(config_path)?;
    redact_secrets(&mut config);

    if json {
        println!("{}", serde_json::to_string_pretty(&config).expect("VigilConfig always serializes"));
    } else {
        println!("configuration OK");
        println!("  transport:     {:?} ({}:{})", config.transport.mode, config.transport.tcp_bind, config.transport.tcp_port);
        println!("  siem_store:    {}", config.siem_store.url);
        println!("  threat_intel:  {} source(s)", config.threat_intel.sources.len());
        println!("  strict_startup: {}", config.strict_startup);
    }

    Ok(())
}

/// Replaces anything that looks like a literal secret value (not a
/// `secret://` reference, which is already just a pointer) with a fixed
/// placeholder so `config check --json` is safe to paste into a bug report.
fn redact_secrets(config: &mut VigilConfig) {
    if let Some(password) = config.siem_store.password.as_mut() {
        if !password.starts_with("secret://") {
            *password = "<redacted>".to_string();
        }
    }
    for source in &mut config.threat_intel.sources {
        if let Some(key) = source.api_key.as_mut() {
            if !key.starts_with("secret://") {
                *key = "<redacted>".to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_mcp::config::ThreatIntelSourceConfig;

    #[test]
    fn redacts_literal_secrets_but_not_references() {
        let mut config = VigilConfig::default();
        config.siem_store.password = Some("hunter2".to_string());
        config.threat_intel.sources.push(ThreatIntelSourceConfig {
            name: "otx".to_string(),
            base_url: "https://otx.example".to_string(),
            api_key: Some("secret://vault/otx/api_key".to_string()),
            reliability_weight: 1.0,
            requests_per_minute: 60,
            max_concurrent_requests: 4,
        });
        config.threat_intel.sources.push(ThreatIntelSourceConfig {
            name: "abuseipdb".to_string(),
            base_url: "https://abuseipdb.example".to_string(),
            api_key: Some("literal-key-value".to_string()),
            reliability_weight: 1.0,
            requests_per_minute: 60,
            max_concurrent_requests: 4,
        });

        redact_secrets(&mut config);

        assert_eq!(config.siem_store.password.as_deref(), Some("<redacted>"));
        assert_eq!(config.threat_intel.sources[0].api_key.as_deref(), Some("secret://vault/otx/api_key"));
        assert_eq!(config.threat_intel.sources[1].api_key.as_deref(), Some("<redacted>"));
    }

    #[test]
    fn leaves_absent_secrets_untouched() {
        let mut config = VigilConfig::default();
        redact_secrets(&mut config);
        assert!(config.siem_store.password.is_none());
    }
}
