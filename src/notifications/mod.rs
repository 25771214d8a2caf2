pub mod email;
pub mod templates;

pub use email::{EmailNotifier, NotifyError, ReminderReport};
pub use templates::NotificationTemplates;
