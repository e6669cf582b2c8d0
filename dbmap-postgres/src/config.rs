//! Translation of [`Config`] into `tokio-postgres` settings.

use dbmap_core::{Config, SslMode};

/// Build the `tokio-postgres` configuration for `config`.
///
/// The schema and statement timeout are applied through startup options, so
/// every pooled connection starts with them set.
pub fn to_pg_config(config: &Config) -> tokio_postgres::Config {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host);
    pg.port(config.port);
    pg.dbname(&config.database);
    pg.user(&config.user);

    if let Some(ref password) = config.password {
        pg.password(password);
    }

    if let Some(ref app_name) = config.application_name {
        pg.application_name(app_name);
    }

    pg.connect_timeout(config.connect_timeout);
    pg.ssl_mode(match config.ssl_mode {
        SslMode::Disable => tokio_postgres::config::SslMode::Disable,
        SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
        SslMode::Require => tokio_postgres::config::SslMode::Require,
    });

    if let Some(options) = startup_options(config) {
        pg.options(&options);
    }

    pg
}

/// `-c name=value` startup options for the session settings in `config`.
pub fn startup_options(config: &Config) -> Option<String> {
    let mut options = Vec::new();
    if let Some(search_path) = config.search_path() {
        options.push(format!("-c search_path={}", escape_option(&search_path)));
    }
    if let Some(timeout) = config.statement_timeout {
        options.push(format!("-c statement_timeout={}", timeout.as_millis()));
    }

    if options.is_empty() {
        None
    } else {
        Some(options.join(" "))
    }
}

fn escape_option(value: &str) -> String {
    value.replace('\\', "\\\\").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_to_pg_config() {
        let config = Config::builder()
            .host("db.internal")
            .port(6543)
            .database("ledger")
            .user("app")
            .password("hunter2")
            .application_name("billing")
            .build()
            .unwrap();

        let pg = to_pg_config(&config);
        assert_eq!(pg.get_dbname(), Some("ledger"));
        assert_eq!(pg.get_user(), Some("app"));
        assert_eq!(pg.get_password(), Some(&b"hunter2"[..]));
        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_application_name(), Some("billing"));
        assert_eq!(pg.get_connect_timeout(), Some(&Duration::from_secs(30)));
        assert_eq!(pg.get_options(), None);
    }

    #[test]
    fn test_schema_and_statement_timeout_become_options() {
        let config = Config::builder()
            .schema("tenant_a")
            .statement_timeout(Duration::from_millis(2500))
            .build()
            .unwrap();

        assert_eq!(
            startup_options(&config).as_deref(),
            Some("-c search_path=tenant_a,public -c statement_timeout=2500")
        );
        assert_eq!(
            to_pg_config(&config).get_options(),
            Some("-c search_path=tenant_a,public -c statement_timeout=2500")
        );
    }

    #[test]
    fn test_option_escaping() {
        assert_eq!(escape_option("my schema,public"), "my\\ schema,public");
    }
}
