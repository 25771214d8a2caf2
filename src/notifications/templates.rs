use handlebars::Handlebars;
use serde::Serialize;

const LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body { font-family: 'Helvetica Neue', Helvetica, Arial, sans-serif; line-height: 1.6; color: #333; }
        .container { max-width: 600px; margin: 0 auto; padding: 20px; border: 1px solid #ddd; border-radius: 8px; }
        .header { background-color: #f3e8ff; padding: 15px; border-radius: 8px 8px 0 0; text-align: center; }
        .header h1 { margin: 0; color: #4c1d95; }
        .content { padding: 20px; }
        .section { margin-bottom: 20px; }
        .section h3 { border-bottom: 2px solid #eee; padding-bottom: 5px; color: #636e72; }
        .badge { background-color: #7c3aed; color: white; padding: 5px 10px; border-radius: 4px; font-weight: bold; display: inline-block; }
        .overdue { background-color: #d63031; }
        .footer { margin-top: 30px; font-size: 12px; color: #b2bec3; text-align: center; }
        ul { padding-left: 20px; }
        li { margin-bottom: 5px; }
    </style>
</head>
<body>
    <div class="container">
        <div class="header"><h1>{{title}}</h1></div>
        <div class="content">
            <p>Hi {{greeting_name}},</p>
            {{> body}}
        </div>
        <div class="footer">
            <p>Sent by Pet Decoder AI. You can turn off emails in your account settings.</p>
        </div>
    </div>
</body>
</html>
"#;

const ANALYSIS_SUMMARY: &str = r#"
<p>Here is what we saw in the latest clip of <strong>{{pet_name}}</strong>.</p>
<p><span class="badge">{{emotion}} &middot; {{confidence}}% confidence</span></p>
<p>{{summary}}</p>
<div class="section">
    <h3>Recommendations</h3>
    <ul>{{#each recommendations}}<li>{{this}}</li>{{/each}}</ul>
</div>
"#;

const VACCINE_REMINDER: &str = r#"
<p><strong>{{pet_name}}</strong> has a vaccination coming up.</p>
<div class="section">
    <h3>{{vaccine_name}}</h3>
    {{#if overdue}}
    <p><span class="badge overdue">Overdue since {{due_date}}</span></p>
    {{else}}
    <p><span class="badge">Due {{due_date}}</span></p>
    {{/if}}
    {{#if clinic_name}}<p>Last given at {{clinic_name}}.</p>{{/if}}
</div>
<p>Book an appointment with your vet and log the dose once it is done.</p>
"#;

const CONTACT_ACK: &str = r#"
<p>Thanks for getting in touch. We received your message about <strong>{{subject}}</strong> and will reply within two business days.</p>
<div class="section">
    <h3>Your message</h3>
    <p>{{message}}</p>
</div>
"#;

#[derive(Debug, Serialize)]
pub struct AnalysisSummaryEmail<'a> {
    pub pet_name: &'a str,
    pub emotion: &'a str,
    pub confidence: u8,
    pub summary: &'a str,
    pub recommendations: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct VaccineReminderEmail<'a> {
    pub pet_name: &'a str,
    pub vaccine_name: &'a str,
    pub due_date: String,
    pub overdue: bool,
    pub clinic_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct ContactAckEmail<'a> {
    pub subject: &'a str,
    pub message: &'a str,
}

#[derive(Serialize)]
struct Page<'a, T> {
    title: &'a str,
    greeting_name: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

/// Handlebars registry with every email body. HTML escaping stays on, so
/// user-entered text can be passed straight in.
pub struct NotificationTemplates {
    registry: Handlebars<'static>,
}

impl NotificationTemplates {
    pub fn new() -> Result<Self, handlebars::TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_template_string("analysis_summary", wrap(ANALYSIS_SUMMARY))?;
        registry.register_template_string("vaccine_reminder", wrap(VACCINE_REMINDER))?;
        registry.register_template_string("contact_ack", wrap(CONTACT_ACK))?;
        Ok(Self { registry })
    }

    fn render<T: Serialize>(
        &self,
        name: &str,
        title: &str,
        greeting_name: &str,
        body: &T,
    ) -> Result<String, handlebars::RenderError> {
        self.registry.render(
            name,
            &Page {
                title,
                greeting_name,
                body,
            },
        )
    }

    pub fn analysis_summary(&self, greeting_name: &str, email: &AnalysisSummaryEmail) -> Result<String, handlebars::RenderError> {
        self.render("analysis_summary", "🐾 New behaviour analysis", greeting_name, email)
    }

    pub fn vaccine_reminder(&self, greeting_name: &str, email: &VaccineReminderEmail) -> Result<String, handlebars::RenderError> {
        self.render("vaccine_reminder", "💉 Vaccination reminder", greeting_name, email)
    }

    pub fn contact_ack(&self, greeting_name: &str, email: &ContactAckEmail) -> Result<String, handlebars::RenderError> {
        self.render("contact_ack", "📬 We got your message", greeting_name, email)
    }
}

// One template per email: the body is spliced into the layout.
fn wrap(body: &str) -> String {
    LAYOUT.replace("{{> body}}", body)
}
