use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::templates::{AnalysisSummaryEmail, ContactAckEmail, NotificationTemplates, VaccineReminderEmail};
use crate::backend::{Analysis, Backend, BackendError, EmailMessage, Pet, Records, User, VaccinationRecord};
use crate::error::FormError;
use crate::metrics;
use crate::validation::{validate_contact_form, ContactForm};

const CHANNEL: &str = "email";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to render email: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Totals for one reminder sweep.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReminderReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    /// Sent, but `reminder_sent` could not be saved; these go out again on
    /// the next sweep.
    pub unflagged: usize,
}

/// Sends email through the platform's SendEmail integration.
pub struct EmailNotifier {
    templates: NotificationTemplates,
    from_name: String,
}

impl EmailNotifier {
    pub fn new(from_name: impl Into<String>) -> Result<Self, handlebars::TemplateError> {
        Ok(Self {
            templates: NotificationTemplates::new()?,
            from_name: from_name.into(),
        })
    }

    async fn deliver(&self, backend: &dyn Backend, to: &str, subject: String, body: String) -> Result<(), BackendError> {
        let message = EmailMessage {
            to: to.to_string(),
            subject,
            body,
            from_name: self.from_name.clone(),
        };
        match backend.send_email(&message).await {
            Ok(()) => {
                info!(subject = %message.subject, "✅ Email sent");
                metrics::increment_notifications_sent(CHANNEL);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, subject = %message.subject, "❌ Failed to send email");
                metrics::increment_notifications_failed(CHANNEL);
                Err(e)
            }
        }
    }

    /// Emails every dose that is overdue or due within `window_days` and has
    /// not been reminded yet, then flags it. One failure never stops the rest.
    pub async fn send_vaccine_reminders(
        &self,
        backend: &dyn Backend,
        user: &User,
        today: NaiveDate,
        window_days: i64,
    ) -> Result<ReminderReport, BackendError> {
        let horizon = today + Duration::days(window_days.max(0));
        let records = Records::<VaccinationRecord>::new(backend).list(None, None).await?;
        let due: Vec<VaccinationRecord> = records
            .into_iter()
            .filter(|r| !r.reminder_sent && r.next_due_date.is_some_and(|d| d <= horizon))
            .collect();

        let mut report = ReminderReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }
        if !user.wants_email() {
            info!(due = report.due, "Reminders skipped, user opted out of email");
            return Ok(report);
        }

        let pets: HashMap<String, Pet> = Records::<Pet>::new(backend)
            .list(None, None)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        for record in &due {
            match self.remind(backend, user, &pets, record, today).await {
                Ok(true) => report.sent += 1,
                Ok(false) => {
                    report.sent += 1;
                    report.unflagged += 1;
                }
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Vaccine reminder not sent");
                    report.failed += 1;
                }
            }
        }
        info!(
            due = report.due,
            sent = report.sent,
            failed = report.failed,
            unflagged = report.unflagged,
            "Reminder sweep finished"
        );
        Ok(report)
    }

    async fn remind(
        &self,
        backend: &dyn Backend,
        user: &User,
        pets: &HashMap<String, Pet>,
        record: &VaccinationRecord,
        today: NaiveDate,
    ) -> Result<bool, NotifyError> {
        let Some(due_date) = record.next_due_date else {
            return Ok(true);
        };
        let pet_name = pets.get(&record.pet_id).map_or("your pet", |p| p.name.as_str());
        let body = self.templates.vaccine_reminder(
            user.display_name(),
            &VaccineReminderEmail {
                pet_name,
                vaccine_name: &record.vaccine_name,
                due_date: due_date.format("%B %-d, %Y").to_string(),
                overdue: due_date < today,
                clinic_name: record.clinic_name.as_deref(),
            },
        )?;
        let subject = format!("{pet_name}'s {} vaccination is due", record.vaccine_name);
        self.deliver(backend, &user.email, subject, body).await?;

        // `Ok(false)`: delivered but not flagged.
        if let Err(e) = Records::<VaccinationRecord>::new(backend)
            .update(&record.id, json!({ "reminder_sent": true }))
            .await
        {
            error!(record_id = %record.id, error = %e, "Reminder sent but not flagged, next sweep will repeat it");
            metrics::increment_reminders_unflagged();
            return Ok(false);
        }
        Ok(true)
    }

    /// Summary of a finished analysis, for users who have email enabled.
    pub async fn send_analysis_summary(
        &self,
        backend: &dyn Backend,
        user: &User,
        pet_name: &str,
        analysis: &Analysis,
    ) -> Result<(), NotifyError> {
        if !user.wants_email() {
            return Ok(());
        }
        let body = self.templates.analysis_summary(
            user.display_name(),
            &AnalysisSummaryEmail {
                pet_name,
                emotion: &analysis.emotion_detected,
                confidence: analysis.confidence_level,
                summary: &analysis.behavior_summary,
                recommendations: &analysis.recommendations,
            },
        )?;
        let subject = format!("{pet_name} seems {}", analysis.emotion_detected.to_lowercase());
        self.deliver(backend, &user.email, subject, body).await?;
        Ok(())
    }

    /// Validates the contact form and acknowledges it to the sender.
    pub async fn acknowledge_contact(&self, backend: &dyn Backend, form: &ContactForm) -> Result<(), FormError> {
        FormError::check(validate_contact_form(form))?;

        let body = self
            .templates
            .contact_ack(
                form.name.trim(),
                &ContactAckEmail {
                    subject: form.subject.trim(),
                    message: form.message.trim(),
                },
            )
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let subject = format!("Re: {}", form.subject.trim());
        self.deliver(backend, form.email.trim(), subject, body).await?;
        Ok(())
    }
}
