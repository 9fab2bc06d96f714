// Push payload sent to the service worker

use crate::models::Medication;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const MEDICATION_REMINDER_TYPE: &str = "medication_reminder";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderNotification {
    pub title: String,
    pub body: String,
    pub data: ReminderData,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderData {
    #[serde(rename = "type")]
    pub kind: String,
    pub medication_id: String,
    pub medication_name: String,
    /// ISO-8601 with millisecond precision
    pub scheduled_time: String,
    pub dosage: DosagePayload,
    pub with_food: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DosagePayload {
    pub amount: f64,
    pub unit: String,
    pub form: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

impl ReminderNotification {
    pub fn for_dose(medication: &Medication, scheduled_time: DateTime<Utc>) -> Self {
        let dosage = &medication.dosage;
        let food_suffix = if medication.with_food {
            " • Take with food"
        } else {
            ""
        };

        Self {
            title: format!("Time for {}", medication.name),
            body: format!(
                "{} {} {}{}",
                format_amount(dosage.amount),
                dosage.unit,
                dosage.form,
                food_suffix
            ),
            data: ReminderData {
                kind: MEDICATION_REMINDER_TYPE.to_string(),
                medication_id: medication.id.to_string(),
                medication_name: medication.name.clone(),
                scheduled_time: scheduled_time.to_rfc3339_opts(SecondsFormat::Millis, true),
                dosage: DosagePayload {
                    amount: dosage.amount,
                    unit: dosage.unit.clone(),
                    form: dosage.form.clone(),
                },
                with_food: medication.with_food,
            },
            actions: vec![
                NotificationAction {
                    action: "take".to_string(),
                    title: "Take Now".to_string(),
                },
                NotificationAction {
                    action: "skip".to_string(),
                    title: "Skip".to_string(),
                },
            ],
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Whole amounts render without a trailing ".0"
fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 && amount.abs() < 1e15 {
        format!("{}", amount as i64)
    } else {
        format!("{}", amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dosage, Frequency};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn medication(with_food: bool, amount: f64) -> Medication {
        Medication {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Metformin".to_string(),
            dosage: Dosage {
                amount,
                unit: "mg".to_string(),
                form: "tablet".to_string(),
            },
            frequency: Frequency {
                times_per_day: 1,
                specific_times: vec!["08:00".to_string()],
            },
            with_food,
            is_active: true,
        }
    }

    #[test]
    fn test_body_includes_food_instruction() {
        let scheduled = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let payload = ReminderNotification::for_dose(&medication(true, 500.0), scheduled);
        assert_eq!(payload.title, "Time for Metformin");
        assert_eq!(payload.body, "500 mg tablet • Take with food");

        let payload = ReminderNotification::for_dose(&medication(false, 2.5), scheduled);
        assert_eq!(payload.body, "2.5 mg tablet");
    }

    #[test]
    fn test_json_shape() {
        let med = medication(false, 10.0);
        let scheduled = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&ReminderNotification::for_dose(&med, scheduled).to_json().unwrap())
                .unwrap();

        assert_eq!(json["data"]["type"], "medication_reminder");
        assert_eq!(json["data"]["medicationId"], med.id.to_string());
        assert_eq!(json["data"]["medicationName"], "Metformin");
        assert_eq!(json["data"]["scheduledTime"], "2025-03-01T08:00:00.000Z");
        assert_eq!(json["data"]["withFood"], false);
        assert_eq!(json["data"]["dosage"]["unit"], "mg");
        assert_eq!(json["actions"][0]["action"], "take");
        assert_eq!(json["actions"][1]["action"], "skip");
    }
}
