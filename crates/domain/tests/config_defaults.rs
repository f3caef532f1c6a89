//! Full-config parsing tests: an empty TOML file must yield a usable
//! default configuration, and partial files must only override what they
//! name.

use ca_domain::config::{Config, ConfigSeverity};

#[test]
fn empty_toml_parses_to_defaults() {
    let cfg: Config = toml::from_str("").unwrap();
    assert_eq!(cfg.server.port, 8000);
    assert_eq!(cfg.agent.max_iterations, 10);
    assert_eq!(cfg.agent.max_concurrent_specialists, 5);
    assert_eq!(cfg.agent.specialist_timeout_sec, 30);
    assert_eq!(cfg.tasks.max_concurrent, 5);
    assert_eq!(cfg.tasks.max_attempts, 3);
    assert_eq!(cfg.tools.http_timeout_sec, 90);
    assert!(cfg.llm.providers.is_empty());
}

#[test]
fn full_config_parses() {
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [agent]
        max_iterations = 6
        specialist_timeout_sec = 10

        [tasks]
        max_concurrent = 2

        [[llm.providers]]
        id = "kimi"
        base_url = "https://api.moonshot.ai/v1"
        api_key_env = "KIMI_API_KEY"
        default_model = "kimi-k2-thinking"

        [storage]
        state_path = "/var/lib/clinagent"
    "#;
    let cfg: Config = toml::from_str(toml).unwrap();
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.agent.max_iterations, 6);
    assert_eq!(cfg.agent.specialist_timeout_sec, 10);
    // Sections not named keep their defaults.
    assert_eq!(cfg.agent.max_concurrent_specialists, 5);
    assert_eq!(cfg.tasks.max_concurrent, 2);
    assert_eq!(cfg.llm.providers.len(), 1);
    assert_eq!(cfg.llm.providers[0].id, "kimi");
    assert_eq!(
        cfg.storage.state_path,
        std::path::PathBuf::from("/var/lib/clinagent")
    );
}

#[test]
fn validate_accepts_configured_provider() {
    let toml = r#"
        [[llm.providers]]
        id = "kimi"
        base_url = "https://api.moonshot.ai/v1"
    "#;
    let cfg: Config = toml::from_str(toml).unwrap();
    assert!(!cfg
        .validate()
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error));
}
