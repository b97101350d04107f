//! Environment-variable configuration, read the way `sem_os_server::main`
//! reads its own (`spec.md` §6 "Environment variables").

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub env: Environment,
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub artifact_path: std::path::PathBuf,
}

impl RuntimeConfig {
    /// Read from the process environment, with `.env` loaded first if
    /// present. `FORGE_ENV` defaults to `development`; `PORT` defaults to
    /// 8080 (`spec.md` §6).
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let env = match std::env::var("FORGE_ENV").unwrap_or_else(|_| "development".to_string()).as_str() {
            "production" => Environment::Production,
            _ => Environment::Development,
        };
        let database_url = std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_default();
        let port = std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let artifact_path = std::env::var("FORGE_ARTIFACT_PATH").map(std::path::PathBuf::from).unwrap_or_else(|_| std::path::PathBuf::from(".forge-runtime/artifact.json"));

        Ok(Self { env, database_url, jwt_secret, port, artifact_path })
    }
}
