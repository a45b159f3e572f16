/*
 * Recollect CLI - Rust Edition
 * Copyright (c) 2025 Recollect Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

use std::sync::Arc;

use crate::error::PipelineError;
use crate::llm::{
    json_confidence, json_string, parse_llm_json, with_transport_retry, LanguageModel,
    LlmOptions,
};
use crate::storage::TemplateRecord;
use crate::types::Classification;

pub const DEFAULT_CATEGORIES: &[&str] = &["lecture", "meeting", "conversation", "memo"];

const FALLBACK_CATEGORY: &str = "memo";

/// Classifies recording content into categories using the LM provider.
///
/// Zero-shot: no task-specific tuning, just the provider's classification
/// directive describing each category.
pub struct ZeroShotClassifier {
    llm: Arc<dyn LanguageModel>,
}

impl ZeroShotClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Classify text into one of the given categories (defaults apply when
    /// none are supplied).
    ///
    /// Empty input short-circuits to memo without invoking the LM. The LM
    /// output is validated defensively: unknown categories demote to memo,
    /// confidence is coerced finite and clamped to [0, 1], reason is coerced
    /// to a string.
    pub async fn classify(
        &self,
        text: &str,
        categories: Option<&[String]>,
    ) -> Result<Classification, PipelineError> {
        if text.trim().is_empty() {
            return Ok(Classification {
                category: FALLBACK_CATEGORY.to_string(),
                confidence: 0.0,
                reason: "Empty input text; defaulting to memo.".to_string(),
            });
        }

        let defaults: Vec<String> = DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect();
        let cats: &[String] = categories.unwrap_or(&defaults);

        let options = LlmOptions::default();
        let raw = with_transport_retry(|| self.llm.classify(text, cats, &options))
            .await
        .map_err(|err| {
            PipelineError::Classification(format!("LM classification call failed: {err}"))
        })?;

        let data = parse_llm_json(&raw).map_err(|err| {
            PipelineError::Classification(format!("invalid JSON from LM classification: {err}"))
        })?;

        let mut category = json_string(&data, "category");
        if !cats.iter().any(|c| c == &category) {
            tracing::warn!(
                "LM returned unknown category {category:?}, falling back to {FALLBACK_CATEGORY}"
            );
            category = FALLBACK_CATEGORY.to_string();
        }

        Ok(Classification {
            category,
            confidence: json_confidence(&data, "confidence"),
            reason: json_string(&data, "reason"),
        })
    }
}

/// Count how many of a template's triggers occur (case-insensitively) in the
/// classification reason.
fn trigger_score(template: &TemplateRecord, reason_lower: &str) -> usize {
    template
        .triggers
        .iter()
        .filter(|trigger| reason_lower.contains(&trigger.to_lowercase()))
        .count()
}

fn best_by_triggers<'a>(
    templates: &'a [&'a TemplateRecord],
    reason_lower: &str,
) -> Option<&'a TemplateRecord> {
    templates
        .iter()
        .max_by_key(|t| (trigger_score(t, reason_lower), t.priority))
        .copied()
}

/// Select the best output template for a classification.
///
/// Ladder: exact category-name match (trigger/priority break ties among
/// several), then trigger scoring across all active templates, then the
/// default template, then the highest-priority active template. `templates`
/// must be the active set ordered by priority descending. Fails only when it
/// is empty.
pub fn match_template(
    templates: &[TemplateRecord],
    classification: &Classification,
) -> Result<TemplateRecord, PipelineError> {
    if templates.is_empty() {
        return Err(PipelineError::TemplateNotFound);
    }

    let reason_lower = classification.reason.to_lowercase();

    let category_matches: Vec<&TemplateRecord> = templates
        .iter()
        .filter(|t| t.name == classification.category)
        .collect();

    match category_matches.len() {
        1 => return Ok(category_matches[0].clone()),
        n if n > 1 => {
            if let Some(best) = best_by_triggers(&category_matches, &reason_lower) {
                return Ok(best.clone());
            }
        }
        _ => {}
    }

    // No category match: score every active template by trigger overlap.
    let all: Vec<&TemplateRecord> = templates.iter().collect();
    if let Some(best) = best_by_triggers(&all, &reason_lower) {
        if trigger_score(best, &reason_lower) > 0 {
            return Ok(best.clone());
        }
    }

    if let Some(default) = templates.iter().find(|t| t.is_default) {
        return Ok(default.clone());
    }

    Ok(templates[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::llm::LlmError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedLm {
        response: String,
        calls: AtomicUsize,
    }

    impl CannedLm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedLm {
        fn model(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _prompt: &str, _options: &LlmOptions) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn template(name: &str, priority: i64, triggers: &[&str], is_default: bool) -> TemplateRecord {
        TemplateRecord {
            id: priority,
            name: name.to_string(),
            display_name: name.to_uppercase(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            output_format: String::new(),
            fields: Vec::new(),
            icon: String::new(),
            priority,
            is_default,
            is_active: true,
        }
    }

    fn classification(category: &str, reason: &str) -> Classification {
        Classification {
            category: category.to_string(),
            confidence: 0.9,
            reason: reason.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_text_short_circuits() {
        let llm = Arc::new(CannedLm::new("unused"));
        let classifier = ZeroShotClassifier::new(llm.clone());

        let result = classifier.classify("   ", None).await.unwrap();
        assert_eq!(result.category, "memo");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.reason, "Empty input text; defaulting to memo.");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_category_demotes_to_memo() {
        let llm = Arc::new(CannedLm::new(
            r#"{"category": "podcast", "confidence": 0.8, "reason": "sounds like a show"}"#,
        ));
        let classifier = ZeroShotClassifier::new(llm);

        let result = classifier.classify("some text", None).await.unwrap();
        assert_eq!(result.category, "memo");
        assert_eq!(result.confidence, 0.8);
    }

    #[tokio::test]
    async fn confidence_is_clamped_and_coerced() {
        let over = ZeroShotClassifier::new(Arc::new(CannedLm::new(
            r#"{"category": "lecture", "confidence": 3.5, "reason": "x"}"#,
        )));
        assert_eq!(over.classify("t", None).await.unwrap().confidence, 1.0);

        let negative = ZeroShotClassifier::new(Arc::new(CannedLm::new(
            r#"{"category": "lecture", "confidence": -0.4, "reason": "x"}"#,
        )));
        assert_eq!(negative.classify("t", None).await.unwrap().confidence, 0.0);

        let textual = ZeroShotClassifier::new(Arc::new(CannedLm::new(
            r#"{"category": "lecture", "confidence": "very", "reason": "x"}"#,
        )));
        assert_eq!(textual.classify("t", None).await.unwrap().confidence, 0.0);
    }

    #[tokio::test]
    async fn reason_is_coerced_to_string() {
        let classifier = ZeroShotClassifier::new(Arc::new(CannedLm::new(
            r#"{"category": "meeting", "confidence": 0.7, "reason": 12}"#,
        )));
        let result = classifier.classify("t", None).await.unwrap();
        assert_eq!(result.reason, "12");
    }

    #[tokio::test]
    async fn custom_categories_are_respected() {
        let classifier = ZeroShotClassifier::new(Arc::new(CannedLm::new(
            r#"{"category": "interview", "confidence": 0.6, "reason": "questions asked"}"#,
        )));
        let cats = vec!["interview".to_string(), "memo".to_string()];
        let result = classifier.classify("t", Some(&cats)).await.unwrap();
        assert_eq!(result.category, "interview");
    }

    #[test]
    fn matcher_requires_active_templates() {
        let err = match_template(&[], &classification("memo", "")).unwrap_err();
        assert!(matches!(err, PipelineError::TemplateNotFound));
    }

    #[test]
    fn direct_category_match_dominates_triggers() {
        // lecture matches by name even though meeting's triggers appear in
        // the reason text.
        let templates = vec![
            template("lecture", 10, &[], false),
            template("meeting", 8, &["agenda", "discussion"], false),
        ];
        let result = match_template(
            &templates,
            &classification("lecture", "an agenda-driven discussion"),
        )
        .unwrap();
        assert_eq!(result.name, "lecture");
    }

    #[test]
    fn duplicate_category_names_resolve_by_trigger_then_priority() {
        let templates = vec![
            template("meeting", 5, &["standup"], false),
            template("meeting", 9, &[], false),
        ];
        let result = match_template(
            &templates,
            &classification("meeting", "daily standup notes"),
        )
        .unwrap();
        assert_eq!(result.priority, 5);
    }

    #[test]
    fn trigger_scoring_when_no_name_matches() {
        let templates = vec![
            template("lecture", 10, &["professor"], false),
            template("memo", 1, &["grocery", "errand"], false),
        ];
        let result = match_template(
            &templates,
            &classification("conversation", "Grocery list and errand reminders"),
        )
        .unwrap();
        assert_eq!(result.name, "memo");
    }

    #[test]
    fn falls_back_to_default_then_priority() {
        let with_default = vec![
            template("lecture", 10, &["professor"], false),
            template("memo", 1, &[], true),
        ];
        let result = match_template(
            &with_default,
            &classification("conversation", "nothing matches"),
        )
        .unwrap();
        assert_eq!(result.name, "memo");

        let without_default = vec![
            template("lecture", 10, &["professor"], false),
            template("memo", 1, &[], false),
        ];
        let result = match_template(
            &without_default,
            &classification("conversation", "nothing matches"),
        )
        .unwrap();
        // Active list is priority-ordered; first entry wins.
        assert_eq!(result.name, "lecture");
    }
}
