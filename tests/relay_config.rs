// tests/relay_config.rs
use keyword_relay::config::RelayConfig;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

const OVERRIDES: &[&str] = &[
    "RELAY_CONFIG_PATH",
    "TELEGRAM_BOT_TOKEN",
    "ALLOWED_USER_ID",
    "POLL_INTERVAL",
    "DATABASE_PATH",
    "MAX_NOTIFICATIONS_PER_POLL",
    "RSS_FAIL_ALERT_THRESHOLD",
    "RSS_BASE_URL",
];

fn clear_env() {
    for k in OVERRIDES {
        env::remove_var(k);
    }
}

#[test]
fn partial_toml_keeps_defaults_and_sanitizes() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("relay.toml");
    fs::write(
        &p,
        r#"
poll_interval_secs = 120
max_notifications_per_cycle = 0
fail_alert_threshold = 0
match_body = true

[telegram]
bot_token = "123:abc"
recipient = "42"

[delivery]
spacing_ms = 0
max_attempts = 7
"#,
    )
    .unwrap();

    let cfg = RelayConfig::load_from(&p).unwrap();
    assert_eq!(cfg.poll_interval_secs, 120);
    assert_eq!(cfg.max_notifications_per_cycle, 1);
    assert_eq!(cfg.fail_alert_threshold, 1);
    assert!(cfg.match_body);
    assert_eq!(cfg.feed_url, "https://rss.nodeseek.com/");

    let s = cfg.relay_settings();
    assert_eq!(s.dispatch.recipient.0, "42");
    assert_eq!(s.dispatch.spacing, Duration::ZERO);
    assert_eq!(s.dispatch.retry.max_attempts, 3);
    assert_eq!(s.dispatch.retry.base_delay, Duration::from_secs(1));
    assert_eq!(s.dispatch.retry.max_delay, Duration::from_secs(30));
    assert_eq!(s.fetch_timeout, Duration::from_secs(30));
    assert!(cfg.require_telegram().is_ok());
}

#[test]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("relay.toml");
    fs::write(&p, "poll_interval_secs = \"soon\"").unwrap();
    assert!(RelayConfig::load_from(&p).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is not read.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) Nothing at all → built-in defaults
    let d = RelayConfig::load_default().unwrap();
    assert_eq!(d, RelayConfig::default());
    assert!(d.require_telegram().is_err());

    // 2) Fallback TOML in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("relay.toml"), "poll_interval_secs = 90\n").unwrap();
    assert_eq!(RelayConfig::load_default().unwrap().poll_interval_secs, 90);

    // 3) RELAY_CONFIG_PATH wins over the fallback
    let p_env = tmp.path().join("other.toml");
    fs::write(&p_env, "poll_interval_secs = 15\n").unwrap();
    env::set_var("RELAY_CONFIG_PATH", p_env.display().to_string());
    assert_eq!(RelayConfig::load_default().unwrap().poll_interval_secs, 15);

    // 4) Missing explicit path is an error
    env::set_var("RELAY_CONFIG_PATH", tmp.path().join("nope.toml").display().to_string());
    assert!(RelayConfig::load_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_win_over_file() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    env::set_var("TELEGRAM_BOT_TOKEN", "999:zzz");
    env::set_var("ALLOWED_USER_ID", " 777 ");
    env::set_var("POLL_INTERVAL", "30");
    env::set_var("DATABASE_PATH", "/tmp/relay-test.db");
    env::set_var("MAX_NOTIFICATIONS_PER_POLL", "4");
    env::set_var("RSS_FAIL_ALERT_THRESHOLD", "5");
    env::set_var("RSS_BASE_URL", "http://127.0.0.1:8080/rss");

    let cfg = RelayConfig::load_default().unwrap();
    assert_eq!(cfg.telegram.bot_token, "999:zzz");
    assert_eq!(cfg.telegram.recipient, "777");
    assert_eq!(cfg.poll_interval_secs, 30);
    assert_eq!(cfg.database_path, PathBuf::from("/tmp/relay-test.db"));
    assert_eq!(cfg.max_notifications_per_cycle, 4);
    assert_eq!(cfg.fail_alert_threshold, 5);
    assert_eq!(cfg.feed_url, "http://127.0.0.1:8080/rss");
    assert_eq!(cfg.scheduler_cfg().interval, Duration::from_secs(30));

    env::set_var("POLL_INTERVAL", "often");
    assert!(RelayConfig::load_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}
