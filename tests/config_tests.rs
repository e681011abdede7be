//! Configuration loading tests.
//!
//! The configuration is a process-wide singleton loaded on first
//! access, so everything that depends on load order lives in one
//! serialized test.

use std::env;

use serial_test::serial;

use warden::config::{get_config, init_config};

#[test]
#[serial]
fn env_overrides_apply_and_config_is_cached() {
    env::set_var("WARDEN_SERVER_PORT", "9191");
    env::set_var("WARDEN_DATABASE_TYPE", "memory");
    env::set_var("WARDEN_LOG_LEVEL", "debug");

    let config = init_config().expect("config load failed");
    assert_eq!(config.server.port, 9191);
    assert_eq!(config.database.db_type, "memory");
    assert_eq!(config.logging.level, "debug");

    // Later env changes must not alter the cached configuration.
    env::set_var("WARDEN_SERVER_PORT", "1234");
    let again = get_config().expect("config reload failed");
    assert_eq!(again.server.port, 9191);
    assert!(std::ptr::eq(config, again));

    env::remove_var("WARDEN_SERVER_PORT");
    env::remove_var("WARDEN_DATABASE_TYPE");
    env::remove_var("WARDEN_LOG_LEVEL");
}
