use std::env;

/// Default directive when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub filter: String,
    pub json_logs: bool,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            filter: DEFAULT_FILTER.to_string(),
            json_logs: true,
        }
    }

    pub fn from_env(default_service_name: &str) -> Self {
        let service_name = env::var("SERVICE_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_service_name.to_string());
        let filter = env::var("RUST_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let json_logs = env::var("LOG_FORMAT")
            .map(|v| json_format(&v))
            .unwrap_or(true);
        Self {
            service_name,
            filter,
            json_logs,
        }
    }
}

fn json_format(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "text" | "pretty" | "plain"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn log_format_switches_to_text() {
        assert!(json_format("json"));
        assert!(json_format(""));
        assert!(!json_format("Pretty"));
        assert!(!json_format(" plain "));
    }

    #[test]
    fn from_env_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        unsafe {
            env::remove_var("SERVICE_NAME");
            env::remove_var("RUST_LOG");
            env::set_var("LOG_FORMAT", "text");
        }
        let cfg = TelemetryConfig::from_env("ucg-gateway");
        assert_eq!(cfg.service_name, "ucg-gateway");
        assert_eq!(cfg.filter, DEFAULT_FILTER);
        assert!(!cfg.json_logs);
        unsafe {
            env::remove_var("LOG_FORMAT");
        }
    }
}
