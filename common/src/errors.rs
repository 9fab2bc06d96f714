// Error handling framework for the reminder engine

use thiserror::Error;

/// Errors raised while parsing or evaluating task schedules
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTimeOfDay(String),

    #[error("No next execution time available for {schedule}")]
    NoNextExecution { schedule: String },
}

/// Validation errors for user-supplied notification settings
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Push transport errors
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Push subscription is gone (HTTP {status})")]
    Gone { status: u16 },

    #[error("Push service rejected the message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Push request failed: {0}")]
    Network(String),

    #[error("VAPID signing failed: {0}")]
    Vapid(String),

    #[error("Invalid push subscription: {0}")]
    InvalidSubscription(String),

    #[error("Payload encryption failed: {0}")]
    Encryption(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(String),
}

/// Errors surfaced by the periodic tasks and their manual triggers
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Task '{task}' is already running")]
    AlreadyRunning { task: String },

    #[error("Task '{task}' timed out after {seconds} seconds")]
    Timeout { task: String, seconds: u64 },

    #[error("Schedule error: {0}")]
    Schedule(ScheduleError),
}

/// Errors from the notification settings service
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(ValidationError),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for SchedulerError {
    fn from(err: DatabaseError) -> Self {
        SchedulerError::Database(err)
    }
}

impl From<ScheduleError> for SchedulerError {
    fn from(err: ScheduleError) -> Self {
        SchedulerError::Schedule(err)
    }
}

impl From<DatabaseError> for NotificationError {
    fn from(err: DatabaseError) -> Self {
        NotificationError::Database(err)
    }
}

impl From<ValidationError> for NotificationError {
    fn from(err: ValidationError) -> Self {
        NotificationError::Validation(err)
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // Unique violations back the notification dedup key
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InvalidJson(err.to_string())
    }
}

impl From<serde_json::Error> for PushError {
    fn from(err: serde_json::Error) -> Self {
        PushError::Serialization(err.to_string())
    }
}
