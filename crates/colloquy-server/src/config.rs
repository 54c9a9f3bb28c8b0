use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use colloquy_core::HttpGeneratorConfig;

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub generator: HttpGeneratorConfig,
    pub generation_timeout: Duration,
    pub secure_cookies: bool,
    pub cleanup_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("COLLOQUY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COLLOQUY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let Some(generator_url) = get("COLLOQUY_GENERATOR_URL").filter(|u| !u.is_empty()) else {
            bail!("COLLOQUY_GENERATOR_URL is unset");
        };

        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port: u16 = var("COLLOQUY_PORT", "3000")
            .parse()
            .context("COLLOQUY_PORT must be a port number")?;
        let timeout_secs: u64 = var("COLLOQUY_GENERATION_TIMEOUT_SECS", "60")
            .parse()
            .context("COLLOQUY_GENERATION_TIMEOUT_SECS must be a whole number of seconds")?;
        let max_new_tokens: u32 = var("COLLOQUY_MAX_NEW_TOKENS", "256")
            .parse()
            .context("COLLOQUY_MAX_NEW_TOKENS must be a positive integer")?;
        let temperature: f32 = var("COLLOQUY_TEMPERATURE", "0.1")
            .parse()
            .context("COLLOQUY_TEMPERATURE must be a number")?;
        let secure_cookies: bool = var("COLLOQUY_SECURE_COOKIES", "false")
            .parse()
            .context("COLLOQUY_SECURE_COOKIES must be true or false")?;

        if timeout_secs == 0 {
            bail!("COLLOQUY_GENERATION_TIMEOUT_SECS must be greater than zero");
        }

        Ok(Self {
            jwt_secret,
            db_path: var("COLLOQUY_DB_PATH", "colloquy.db").into(),
            host: var("COLLOQUY_HOST", "0.0.0.0"),
            port,
            generator: HttpGeneratorConfig {
                url: generator_url,
                api_token: get("COLLOQUY_GENERATOR_TOKEN").filter(|t| !t.is_empty()),
                max_new_tokens,
                temperature,
            },
            generation_timeout: Duration::from_secs(timeout_secs),
            secure_cookies,
            cleanup_interval: Duration::from_secs(3600),
        })
    }
}
