use std::str::FromStr;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: "sqlite:./data/servicing.db".to_string(),
            port: 8080,
            max_connections: 10,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let config = AppConfig {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            port: parsed(&lookup, "PORT", defaults.port),
            max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", defaults.max_connections),
            default_page_size: parsed(&lookup, "SERVICING_PAGE_SIZE", defaults.default_page_size),
            max_page_size: parsed(&lookup, "SERVICING_MAX_PAGE_SIZE", defaults.max_page_size),
        };
        AppConfig {
            default_page_size: config.default_page_size.clamp(1, config.max_page_size.max(1)),
            ..config
        }
    }

    /// Requested page size clamped to the configured bounds.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring {}={:?}, using default {}", key, raw, default);
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]), AppConfig::default());
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = config(&[("PORT", "eighty"), ("DB_MAX_CONNECTIONS", "4")]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_connections, 4);
    }

    #[test]
    fn page_size_is_clamped() {
        let cfg = config(&[("SERVICING_PAGE_SIZE", "20"), ("SERVICING_MAX_PAGE_SIZE", "100")]);
        assert_eq!(cfg.page_size(None), 20);
        assert_eq!(cfg.page_size(Some(0)), 1);
        assert_eq!(cfg.page_size(Some(1000)), 100);
    }
}
