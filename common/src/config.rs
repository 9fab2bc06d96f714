// Configuration management with layered configuration (file, env)

use crate::schedule::{parse_cron_expression, parse_timezone};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub push: PushConfig,
    pub scheduler: SchedulerConfig,
    pub reminders: ReminderConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub mode: PushMode,
    /// `mailto:` or `https:` contact placed in the VAPID `sub` claim
    pub vapid_subject: String,
    #[serde(default)]
    pub vapid_public_key: String,
    /// PKCS#8 EC private key; requests go out unsigned when absent
    #[serde(default)]
    pub vapid_private_key_pem: Option<String>,
    pub ttl_seconds: u32,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    WebPush,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub reminder_cron: String,
    pub escalation_cron: String,
    pub cleanup_cron: String,
    pub timezone: String,
    pub run_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Zone in which "HH:MM" dose times and "today" are interpreted
    pub wall_clock_timezone: String,
    pub notification_window_minutes: u32,
    pub escalation_window_minutes: u32,
    pub dose_tolerance_minutes: u32,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.database.min_connections > self.database.max_connections {
            return Err("Database min_connections cannot exceed max_connections".to_string());
        }

        if self.push.mode == PushMode::WebPush {
            if self.push.vapid_subject.is_empty() {
                return Err("Push vapid_subject cannot be empty".to_string());
            }
            if self.push.vapid_private_key_pem.is_some() && self.push.vapid_public_key.is_empty() {
                return Err("Push vapid_public_key is required with a private key".to_string());
            }
        }
        if self.push.request_timeout_seconds == 0 {
            return Err("Push request_timeout_seconds must be greater than 0".to_string());
        }

        for (name, expression) in [
            ("reminder_cron", &self.scheduler.reminder_cron),
            ("escalation_cron", &self.scheduler.escalation_cron),
            ("cleanup_cron", &self.scheduler.cleanup_cron),
        ] {
            parse_cron_expression(expression)
                .map_err(|e| format!("Scheduler {} is invalid: {}", name, e))?;
        }
        parse_timezone(&self.scheduler.timezone).map_err(|e| format!("Scheduler {}", e))?;
        if self.scheduler.run_timeout_seconds == 0 {
            return Err("Scheduler run_timeout_seconds must be greater than 0".to_string());
        }

        parse_timezone(&self.reminders.wall_clock_timezone)
            .map_err(|e| format!("Reminders {}", e))?;
        if self.reminders.notification_window_minutes == 0 {
            return Err("Reminders notification_window_minutes must be greater than 0".to_string());
        }
        if self.reminders.escalation_window_minutes == 0 {
            return Err("Reminders escalation_window_minutes must be greater than 0".to_string());
        }
        if self.reminders.retention_days == 0 {
            return Err("Reminders retention_days must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/medication_reminders".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            push: PushConfig {
                mode: PushMode::Log,
                vapid_subject: "mailto:support@example.com".to_string(),
                vapid_public_key: String::new(),
                vapid_private_key_pem: None,
                ttl_seconds: 3600,
                request_timeout_seconds: 10,
            },
            scheduler: SchedulerConfig {
                reminder_cron: "0 */5 * * * *".to_string(),
                escalation_cron: "0 */10 * * * *".to_string(),
                cleanup_cron: "0 0 2 * * *".to_string(),
                timezone: "UTC".to_string(),
                run_timeout_seconds: 240,
            },
            reminders: ReminderConfig {
                wall_clock_timezone: "UTC".to_string(),
                notification_window_minutes: 5,
                escalation_window_minutes: 5,
                dose_tolerance_minutes: 60,
                retention_days: 30,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: Some(9090),
                tracing_endpoint: None,
            },
        }
    }
}
