//! Integration tests for configuration parsing and handling.

use std::time::Duration;

use dbmap::{Config, MapEnvSource, PoolConfig, SslMode};
use pretty_assertions::assert_eq;

/// Test minimal configuration
#[test]
fn test_config_minimal() {
    let config_str = r#"
        database = "inventory"
    "#;

    let config: Config = toml::from_str(config_str).expect("Failed to parse config");
    assert_eq!(config.database, "inventory");
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 5432);
    assert_eq!(config.pool, PoolConfig::default());
    assert!(config.use_statement_cache);
    config.validate().unwrap();
}

/// Test full configuration with all options
#[test]
fn test_config_full() {
    let config_str = r#"
        host = "db.internal"
        port = 6432
        database = "orders"
        schema = "billing"
        user = "svc"
        password = "secret"
        ssl_mode = "require"
        connect_timeout = 5
        statement_timeout = 2500
        application_name = "worker"
        use_statement_cache = false

        [pool]
        max_connections = 20
        idle_connections = 4
        connection_timeout = 10
        idle_timeout = 300
        max_lifetime = 1800
    "#;

    let config: Config = toml::from_str(config_str).expect("Failed to parse config");

    assert_eq!(config.host, "db.internal");
    assert_eq!(config.port, 6432);
    assert_eq!(config.schema.as_deref(), Some("billing"));
    assert_eq!(config.search_path().as_deref(), Some("billing,public"));
    assert_eq!(config.password.as_deref(), Some("secret"));
    assert_eq!(config.ssl_mode, SslMode::Require);
    assert_eq!(config.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.statement_timeout, Some(Duration::from_millis(2500)));
    assert_eq!(config.application_name.as_deref(), Some("worker"));
    assert!(!config.use_statement_cache);

    assert_eq!(config.pool.max_connections, 20);
    assert_eq!(config.pool.idle_connections, 4);
    assert_eq!(config.pool.connection_timeout, Some(Duration::from_secs(10)));
    assert_eq!(config.pool.idle_timeout, Some(Duration::from_secs(300)));
    assert_eq!(config.pool.max_lifetime, Some(Duration::from_secs(1800)));
}

/// Test that a partial pool table keeps the remaining defaults
#[test]
fn test_config_partial_pool() {
    let config_str = r#"
        [pool]
        max_connections = 8
    "#;

    let config: Config = toml::from_str(config_str).expect("Failed to parse config");
    assert_eq!(config.pool.max_connections, 8);
    assert_eq!(config.pool.idle_connections, PoolConfig::default().idle_connections);
    assert_eq!(config.pool.max_lifetime, None);
}

/// Test that an unknown SSL mode is rejected
#[test]
fn test_config_invalid_ssl_mode() {
    let result: Result<Config, _> = toml::from_str(r#"ssl_mode = "sometimes""#);
    assert!(result.is_err());
}

/// Test that validation catches an oversized idle pool
#[test]
fn test_config_validation() {
    let config_str = r#"
        [pool]
        max_connections = 2
        idle_connections = 5
    "#;

    let config: Config = toml::from_str(config_str).expect("Failed to parse config");
    let err = config.validate().unwrap_err();
    assert!(err.is_configuration());
}

/// Test that a single-connection pool is rejected, since the statement
/// cache keeps one session checked out
#[test]
fn test_config_single_connection_pool_rejected() {
    let env = MapEnvSource::new()
        .set("DB_NAME", "orders")
        .set("DB_MAX_CONNECTIONS", "1")
        .set("DB_IDLE_CONNECTIONS", "0");
    let err = Config::from_env_source(&env).unwrap_err();
    assert!(err.is_configuration());

    let config: Config = toml::from_str(
        r#"
        [pool]
        max_connections = 2
        idle_connections = 1
    "#,
    )
    .expect("Failed to parse config");
    config.validate().unwrap();
}

/// Test environment overrides on top of DATABASE_URL
#[test]
fn test_config_from_env() {
    let env = MapEnvSource::new()
        .set("DATABASE_URL", "postgres://app@db.internal/orders?sslmode=disable")
        .set("DB_SCHEMA", "audit")
        .set("DB_MAX_CONNECTIONS", "4")
        .set("DB_IDLE_CONNECTIONS", "1")
        .set("DB_MAX_LIFETIME", "60");

    let config = Config::from_env_source(&env).unwrap();
    assert_eq!(config.host, "db.internal");
    assert_eq!(config.user, "app");
    assert_eq!(config.database, "orders");
    assert_eq!(config.ssl_mode, SslMode::Disable);
    assert_eq!(config.schema.as_deref(), Some("audit"));
    assert_eq!(config.pool.max_connections, 4);
    assert_eq!(config.pool.max_lifetime, Some(Duration::from_secs(60)));
}

/// Test that malformed environment values are configuration errors
#[test]
fn test_config_from_env_invalid() {
    let env = MapEnvSource::new().set("DB_PORT", "not-a-port");
    assert!(Config::from_env_source(&env).unwrap_err().is_configuration());

    let env = MapEnvSource::new().set("DATABASE_URL", "mysql://localhost/orders");
    assert!(Config::from_env_source(&env).unwrap_err().is_configuration());
}

/// Test the builder layered over a URL
#[test]
fn test_config_builder_over_url() {
    let config = Config::builder()
        .url("postgresql://svc:pw@localhost:6432/inventory")
        .database("inventory_test")
        .statement_timeout(Duration::from_secs(3))
        .build()
        .unwrap();

    assert_eq!(config.port, 6432);
    assert_eq!(config.database, "inventory_test");
    assert_eq!(config.statement_timeout, Some(Duration::from_secs(3)));
    assert_eq!(
        config.url.as_deref(),
        Some("postgresql://svc:pw@localhost:6432/inventory")
    );
}

/// Test translation into the PostgreSQL driver's configuration
#[cfg(feature = "postgres")]
#[test]
fn test_config_to_pg_config() {
    use dbmap::postgres::config::{startup_options, to_pg_config};

    let config = Config::builder()
        .host("db.internal")
        .port(6432)
        .database("orders")
        .user("svc")
        .schema("billing")
        .statement_timeout(Duration::from_millis(1500))
        .build()
        .unwrap();

    let pg = to_pg_config(&config);
    assert_eq!(pg.get_dbname(), Some("orders"));
    assert_eq!(pg.get_user(), Some("svc"));
    assert_eq!(pg.get_ports(), &[6432]);
    assert_eq!(
        startup_options(&config).as_deref(),
        Some("-c search_path=billing,public -c statement_timeout=1500")
    );
}
