pub fn record_analysis_outcome(outcome: &'static str) {
    metrics::counter!("petdecoder_analyses_total", "outcome" => outcome).increment(1);
}

pub fn record_analysis_duration(seconds: f64, outcome: &'static str) {
    metrics::histogram!("petdecoder_analysis_duration_seconds", "outcome" => outcome)
        .record(seconds);
}

pub fn increment_uploads(kind: &'static str) {
    metrics::counter!("petdecoder_uploads_total", "kind" => kind).increment(1);
}

pub fn increment_retries(operation: &str) {
    metrics::counter!("petdecoder_retries_total", "operation" => operation.to_string())
        .increment(1);
}

pub fn increment_rate_limited() {
    metrics::counter!("petdecoder_rate_limited_total").increment(1);
}

pub fn increment_guest_blocked() {
    metrics::counter!("petdecoder_guest_blocked_total").increment(1);
}

pub fn increment_vaccinations_recorded() {
    metrics::counter!("petdecoder_vaccinations_recorded_total").increment(1);
}

pub fn increment_notifications_sent(channel: &'static str) {
    metrics::counter!("petdecoder_notifications_sent_total", "channel" => channel).increment(1);
}

pub fn increment_notifications_failed(channel: &'static str) {
    metrics::counter!("petdecoder_notifications_failed_total", "channel" => channel).increment(1);
}

pub fn increment_reminders_unflagged() {
    metrics::counter!("petdecoder_reminders_unflagged_total").increment(1);
}
