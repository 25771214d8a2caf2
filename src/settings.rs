use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{ClientState, StoreError, ACCESSIBILITY_KEY, CONSENT_KEY, COOKIE_PREFERENCES_KEY};

/// Whether the user has answered the privacy banner, and when.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentState {
    pub accepted: bool,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ConsentState {
    pub fn decided(&self) -> bool {
        self.decided_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookiePreferences {
    pub necessary: bool,
    pub analytics: bool,
    pub marketing: bool,
}

impl Default for CookiePreferences {
    fn default() -> Self {
        Self {
            necessary: true,
            analytics: false,
            marketing: false,
        }
    }
}

impl CookiePreferences {
    /// Necessary cookies cannot be switched off.
    pub fn normalized(mut self) -> Self {
        self.necessary = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessibilitySettings {
    pub high_contrast: bool,
    pub large_text: bool,
    pub reduce_motion: bool,
    pub dyslexia_font: bool,
}

pub async fn load_consent(state: &ClientState) -> Result<ConsentState, StoreError> {
    state.get_or_default(CONSENT_KEY).await
}

pub async fn save_consent(state: &ClientState, accepted: bool, now: DateTime<Utc>) -> Result<ConsentState, StoreError> {
    let consent = ConsentState {
        accepted,
        decided_at: Some(now),
    };
    state.set_json(CONSENT_KEY, &consent).await?;
    Ok(consent)
}

pub async fn load_cookie_preferences(state: &ClientState) -> Result<CookiePreferences, StoreError> {
    Ok(state
        .get_or_default::<CookiePreferences>(COOKIE_PREFERENCES_KEY)
        .await?
        .normalized())
}

pub async fn save_cookie_preferences(
    state: &ClientState,
    prefs: CookiePreferences,
) -> Result<CookiePreferences, StoreError> {
    let prefs = prefs.normalized();
    state.set_json(COOKIE_PREFERENCES_KEY, &prefs).await?;
    Ok(prefs)
}

pub async fn load_accessibility(state: &ClientState) -> Result<AccessibilitySettings, StoreError> {
    state.get_or_default(ACCESSIBILITY_KEY).await
}

pub async fn save_accessibility(
    state: &ClientState,
    settings: AccessibilitySettings,
) -> Result<AccessibilitySettings, StoreError> {
    state.set_json(ACCESSIBILITY_KEY, &settings).await?;
    Ok(settings)
}
