// PostgreSQL implementations of the store contracts

pub mod dose;
pub mod medication;
pub mod notification_log;
pub mod user;

pub use dose::DoseLogRepository;
pub use medication::MedicationRepository;
pub use notification_log::NotificationLogRepository;
pub use user::UserRepository;
