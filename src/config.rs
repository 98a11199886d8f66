use serde::Deserialize;

/// Service configuration, read from the environment (`SERVER_PORT`,
/// `DATABASE_URL`, `MAX_CONNECTIONS`). Business settings live in the database.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("server_port", 8000)?
            .set_default("max_connections", 8)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        config.try_deserialize()
    }
}
