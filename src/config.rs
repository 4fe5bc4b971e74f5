use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::{JobPriority, RetrainingConfiguration, RetrainingKind};
use crate::scheduler::ScheduleSpec;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub triggers: TriggerConfig,
    pub engine: EngineConfig,
    /// Audit store; audit events stay in memory when absent
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Schedule-fire loop period; the trigger poll runs at twice this
    pub check_interval_secs: u64,
    /// Global cap on dispatched, non-terminal jobs
    pub max_concurrent_jobs: usize,
    /// Dispatch loop wake-up when nothing was enqueued
    pub dispatch_retry_ms: u64,
    pub reconcile_interval_secs: u64,
    /// Finished jobs kept in memory
    pub completed_history_limit: usize,
    /// Turn detector triggers into jobs automatically
    pub trigger_polling_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            max_concurrent_jobs: 2,
            dispatch_retry_ms: 5_000,
            reconcile_interval_secs: 60,
            completed_history_limit: 500,
            trigger_polling_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub performance_check_interval_secs: u64,
    pub data_check_interval_secs: u64,
    pub market_check_interval_secs: u64,
    pub calendar_check_interval_secs: u64,

    /// Rolling window compared against the baseline
    pub short_window_days: u32,
    /// Window the long-term baseline is computed over
    pub long_window_days: u32,
    pub baseline_refresh_hours: u64,
    /// ROI decline (%) that raises a performance trigger
    pub roi_decline_threshold_pct: f64,
    pub win_rate_decline_threshold_pct: f64,
    /// Windows with fewer settled bets never trigger
    pub min_sample_size: u64,
    pub high_decline_pct: f64,
    pub critical_decline_pct: f64,

    /// New samples since the last retrain that raise a data trigger
    pub new_data_threshold: u64,
    pub market_change_threshold_pct: f64,
    pub max_days_between_retrains: i64,

    /// Resolved/superseded triggers kept in history
    pub history_limit: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            performance_check_interval_secs: 3_600,
            data_check_interval_secs: 6 * 3_600,
            market_check_interval_secs: 3_600,
            calendar_check_interval_secs: 24 * 3_600,
            short_window_days: 7,
            long_window_days: 60,
            baseline_refresh_hours: 24,
            roi_decline_threshold_pct: 20.0,
            win_rate_decline_threshold_pct: 10.0,
            min_sample_size: 30,
            high_decline_pct: 30.0,
            critical_decline_pct: 50.0,
            new_data_threshold: 500,
            market_change_threshold_pct: 25.0,
            max_days_between_retrains: 30,
            history_limit: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout monitor period
    pub timeout_check_secs: u64,
    /// Finished jobs kept in memory
    pub history_limit: usize,
    /// Configuration used when a job or schedule does not bring its own.
    /// Its `max_concurrent_jobs` is the engine-wide cap.
    pub defaults: RetrainingConfiguration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_check_secs: 60,
            history_limit: 500,
            defaults: RetrainingConfiguration::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Daily rolling log files go here when set
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,ploy_retrain=debug,sqlx=warn".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

/// A strategy under management, with its optional recurring schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub name: String,
    /// Crontab expression (5 fields, or 6/7 with seconds)
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub interval_hours: Option<f64>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub retraining_kind: RetrainingKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides `engine.defaults` for this strategy's scheduled jobs
    #[serde(default)]
    pub configuration: Option<RetrainingConfiguration>,
}

fn default_true() -> bool {
    true
}

impl StrategyConfig {
    /// Unscheduled strategy at normal priority
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cron: None,
            interval_hours: None,
            priority: JobPriority::default(),
            retraining_kind: RetrainingKind::default(),
            enabled: true,
            configuration: None,
        }
    }

    pub fn schedule_spec(&self) -> Option<ScheduleSpec> {
        match (&self.cron, self.interval_hours) {
            (Some(expr), _) => Some(ScheduleSpec::Cron(expr.clone())),
            (None, Some(hours)) => Some(ScheduleSpec::Interval { hours }),
            (None, None) => None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.json", false)?
            .set_default("scheduler.check_interval_secs", 60)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PLOY_RETRAIN_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PLOY_RETRAIN_SCHEDULER__MAX_CONCURRENT_JOBS, etc.)
            .add_source(
                Environment::with_prefix("PLOY_RETRAIN")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.scheduler.check_interval_secs == 0 {
            errors.push("scheduler.check_interval_secs must be positive".to_string());
        }
        if self.scheduler.max_concurrent_jobs == 0 {
            errors.push("scheduler.max_concurrent_jobs must be positive".to_string());
        }
        if self.scheduler.reconcile_interval_secs == 0 {
            errors.push("scheduler.reconcile_interval_secs must be positive".to_string());
        }

        let t = &self.triggers;
        if t.short_window_days == 0 || t.short_window_days >= t.long_window_days {
            errors.push("triggers.short_window_days must be positive and below long_window_days".to_string());
        }
        if t.high_decline_pct > t.critical_decline_pct {
            errors.push("triggers.high_decline_pct must not exceed critical_decline_pct".to_string());
        }
        for (name, secs) in [
            ("performance", t.performance_check_interval_secs),
            ("data", t.data_check_interval_secs),
            ("market", t.market_check_interval_secs),
            ("calendar", t.calendar_check_interval_secs),
        ] {
            if secs == 0 {
                errors.push(format!("triggers.{}_check_interval_secs must be positive", name));
            }
        }

        if self.engine.timeout_check_secs == 0 {
            errors.push("engine.timeout_check_secs must be positive".to_string());
        }
        if let Err(e) = self.engine.defaults.validate() {
            errors.push(format!("engine.defaults: {}", e));
        }

        let mut seen = std::collections::HashSet::new();
        for strategy in &self.strategies {
            if strategy.name.trim().is_empty() {
                errors.push("strategy name must not be empty".to_string());
            }
            if !seen.insert(strategy.name.as_str()) {
                errors.push(format!("strategy '{}' is listed twice", strategy.name));
            }
            if strategy.cron.is_some() && strategy.interval_hours.is_some() {
                errors.push(format!(
                    "strategy '{}': set either cron or interval_hours, not both",
                    strategy.name
                ));
            }
            if let Some(spec) = strategy.schedule_spec() {
                if let Err(e) = spec.validate() {
                    errors.push(format!("strategy '{}': {}", strategy.name, e));
                }
            }
            if let Some(cfg) = &strategy.configuration {
                if let Err(e) = cfg.validate() {
                    errors.push(format!("strategy '{}': {}", strategy.name, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_parse_toml_with_strategies() {
        let raw = r#"
            [scheduler]
            max_concurrent_jobs = 4

            [engine.defaults]
            rollout_stages = [20, 100]
            ab_test_enabled = false

            [[strategies]]
            name = "sharp_action"
            cron = "0 3 * * *"
            priority = "high"

            [[strategies]]
            name = "line_movement"
            interval_hours = 12.0
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.scheduler.max_concurrent_jobs, 4);
        assert_eq!(config.scheduler.check_interval_secs, 60);
        assert_eq!(config.engine.defaults.rollout_stages, vec![20, 100]);
        assert!(!config.engine.defaults.ab_test_enabled);
        assert_eq!(config.strategies[0].priority, JobPriority::High);
        assert_eq!(
            config.strategies[1].schedule_spec(),
            Some(ScheduleSpec::Interval { hours: 12.0 })
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = AppConfig::default();
        config.scheduler.max_concurrent_jobs = 0;
        config.engine.defaults.rollout_stages = vec![50, 25];
        config.strategies.push(StrategyConfig {
            name: "sharp_action".into(),
            cron: Some("not a cron".into()),
            interval_hours: None,
            priority: JobPriority::Normal,
            retraining_kind: RetrainingKind::FullRetrain,
            enabled: true,
            configuration: None,
        });
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_show_config_round_trip() {
        let rendered = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.scheduler.max_concurrent_jobs, 2);
        assert_eq!(parsed.engine.defaults, RetrainingConfiguration::default());
    }
}
