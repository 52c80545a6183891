use dlgate::config::Config;
use dlgate::error::ConfigError;
use dlgate::key::{Directive, KeyDeriver, RequestContext};
use dlgate::tiers::MAX_WINDOW_DAYS;
use std::io::Write;

#[test]
fn defaults_apply() {
    let cfg: Config = "secret_key = \"s\"".parse().unwrap();
    assert_eq!(cfg.db_path, "sqlite:///var/lib/dlgate/downloads.db");
    assert_eq!(cfg.max_tier, 4);
    assert_eq!(cfg.write_retries, 5);
    assert!(cfg.tiers.is_empty());
}

#[test]
fn tier_table_fills_unlisted_tiers() {
    let toml = r#"secret_key = "s"
max_tier = 3
[[tiers]]
tier = 1
downloads_allowed = 5
allowed_days = 30
[[tiers]]
tier = 3
downloads_allowed = 100
allowed_days = 900
"#;
    let cfg: Config = toml::from_str(toml).unwrap();
    let table = cfg.tier_table().unwrap();
    assert_eq!(table.max_tier(), Some(3));
    assert!(!table.get(0).unwrap().has_quota());
    assert_eq!(table.get(1).unwrap().downloads_allowed, 5);
    assert!(!table.get(2).unwrap().has_quota());
    assert_eq!(table.get(3).unwrap().allowed_days, MAX_WINDOW_DAYS);
    assert_eq!(table.min_tier_for_downloads(), Some(1));
}

#[test]
fn allowed_without_days_is_no_quota() {
    let toml = r#"secret_key = "s"
max_tier = 1
[[tiers]]
tier = 1
downloads_allowed = 5
"#;
    let cfg: Config = toml::from_str(toml).unwrap();
    let table = cfg.tier_table().unwrap();
    assert!(!table.get(1).unwrap().has_quota());
    assert_eq!(table.min_tier_for_downloads(), None);
}

#[test]
fn duplicate_tier_is_rejected() {
    let toml = r#"secret_key = "s"
[[tiers]]
tier = 2
downloads_allowed = 1
allowed_days = 1
[[tiers]]
tier = 2
downloads_allowed = 3
allowed_days = 3
"#;
    let cfg: Config = toml::from_str(toml).unwrap();
    assert!(matches!(cfg.tier_table(), Err(ConfigError::DuplicateTier(2))));
}

#[test]
fn tier_above_max_is_rejected() {
    let toml = r#"secret_key = "s"
max_tier = 2
[[tiers]]
tier = 5
downloads_allowed = 1
allowed_days = 1
"#;
    let cfg: Config = toml::from_str(toml).unwrap();
    assert!(matches!(
        cfg.tier_table(),
        Err(ConfigError::TierOutOfRange {
            tier: 5,
            max_tier: 2
        })
    ));
}

#[test]
fn empty_secret_is_missing() {
    let cfg: Config = "max_tier = 1".parse().unwrap();
    assert!(matches!(
        cfg.key_deriver(),
        Err(ConfigError::MissingField("secret_key"))
    ));
}

#[test]
fn invalid_toml_is_reported() {
    let err = "max_tier = \"four\"".parse::<Config>().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn secret_from_file_placeholder() {
    let mut secret = tempfile::NamedTempFile::new().unwrap();
    writeln!(secret, "file-secret").unwrap();

    let mut cfg_file = tempfile::NamedTempFile::new().unwrap();
    write!(
        cfg_file,
        "secret_key = \"$FILE{{{}}}\"\nmax_tier = 2\n",
        secret.path().display()
    )
    .unwrap();

    let cfg = Config::from_file(cfg_file.path().to_str().unwrap()).unwrap();
    assert_eq!(cfg.secret_key, "file-secret");
    assert_eq!(cfg.max_tier, 2);

    let ctx = RequestContext::default();
    assert_eq!(
        cfg.key_deriver().unwrap().derive("a.zip", Directive::Universal, &ctx),
        KeyDeriver::new("file-secret").derive("a.zip", Directive::Universal, &ctx)
    );
}

#[test]
fn missing_file_is_reported() {
    let err = Config::from_file("/nonexistent/dlgate.toml").unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
fn debug_redacts_secret() {
    let cfg: Config = "secret_key = \"hunter2\"".parse().unwrap();
    assert!(!format!("{cfg:?}").contains("hunter2"));
}
