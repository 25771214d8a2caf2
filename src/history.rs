//! Browsing past analyses.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backend::Analysis;

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PER_PAGE: usize = 10;
pub const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryFilter {
    pub pet_id: Option<String>,
    pub emotion: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Matched against emotion, summary and details.
    pub search: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl HistoryFilter {
    pub fn matches(&self, analysis: &Analysis) -> bool {
        if let Some(pet_id) = non_empty(&self.pet_id) {
            if analysis.pet_id.as_deref() != Some(pet_id) {
                return false;
            }
        }
        if let Some(emotion) = non_empty(&self.emotion) {
            if !analysis.emotion_detected.eq_ignore_ascii_case(emotion) {
                return false;
            }
        }
        if self.from.is_some() || self.to.is_some() {
            let Some(day) = analysis.created_at().map(|t| t.date_naive()) else {
                return false;
            };
            if self.from.is_some_and(|from| day < from) || self.to.is_some_and(|to| day > to) {
                return false;
            }
        }
        if let Some(search) = non_empty(&self.search) {
            let needle = search.to_lowercase();
            let found = [
                &analysis.emotion_detected,
                &analysis.behavior_summary,
                &analysis.detailed_analysis,
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));
            if !found {
                return false;
            }
        }
        true
    }

    /// Matching analyses, newest first.
    pub fn apply(&self, analyses: Vec<Analysis>) -> Vec<Analysis> {
        let mut kept: Vec<Analysis> = analyses.into_iter().filter(|a| self.matches(a)).collect();
        kept.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        kept
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// 1-based pages. Zero or missing values fall back to the defaults and
/// `per_page` is capped.
pub fn paginate<T>(items: Vec<T>, page: Option<usize>, per_page: Option<usize>) -> Page<T> {
    let page = page.filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE);
    let per_page = per_page
        .filter(|p| *p > 0)
        .unwrap_or(DEFAULT_PER_PAGE)
        .min(MAX_PER_PAGE);

    let total = items.len();
    let total_pages = total.div_ceil(per_page);
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(per_page))
        .take(per_page)
        .collect();

    Page {
        items,
        total,
        page,
        per_page,
        total_pages,
    }
}
