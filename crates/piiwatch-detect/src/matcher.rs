//! The pattern matcher: fixed patterns plus model-extracted entities over
//! one text blob, with first-seen-wins dedup on identical content.

use std::collections::HashSet;
use std::sync::Arc;

use piiwatch_protocol::PiiType;
use tracing::{debug, error};

use crate::context::context_window;
use crate::model::EntityModel;
use crate::patterns::PATTERNS;

/// A finding before it is stamped with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: PiiType,
    pub content: String,
    pub context: String,
}

pub struct Matcher {
    model: Arc<dyn EntityModel>,
}

impl Matcher {
    pub fn new(model: Arc<dyn EntityModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &dyn EntityModel {
        self.model.as_ref()
    }

    /// Scan one text blob. Fixed patterns run first, then the entity model
    /// over the full text; a model failure is logged per call and the
    /// pattern findings already collected survive. Two matches with
    /// identical content keep only the first.
    pub async fn scan(&self, text: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut seen_content: HashSet<String> = HashSet::new();
        if text.is_empty() {
            return findings;
        }

        for def in PATTERNS.iter() {
            for caps in def.re.captures_iter(text) {
                // Group 1, when a pattern has one, is the finding; the rest
                // of the match is labelling.
                let m = caps.get(1).unwrap_or_else(|| caps.get(0).expect("group 0"));
                if !seen_content.insert(m.as_str().to_string()) {
                    continue;
                }
                findings.push(Finding {
                    kind: def.kind,
                    content: m.as_str().to_string(),
                    context: context_window(text, m.start(), m.end()),
                });
            }
        }

        match self.model.extract(text).await {
            Ok(spans) => {
                for span in spans {
                    let Some(kind) = PiiType::from_model_category(&span.category) else {
                        debug!(category = %span.category, "dropping untracked entity category");
                        continue;
                    };
                    // Prefer the span slice over the reported surface form;
                    // the context math needs offsets that hold in our text.
                    let content = match text.get(span.start..span.end) {
                        Some(slice) if !slice.is_empty() => slice.to_string(),
                        _ => {
                            debug!(start = span.start, end = span.end, "dropping entity with invalid span");
                            continue;
                        }
                    };
                    if !seen_content.insert(content.clone()) {
                        continue;
                    }
                    findings.push(Finding {
                        kind,
                        content,
                        context: context_window(text, span.start, span.end),
                    });
                }
            }
            Err(err) => {
                error!(error = %err, "entity extraction failed; keeping pattern findings");
            }
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntitySpan, ModelError};
    use async_trait::async_trait;

    struct FixedModel(Vec<EntitySpan>);

    #[async_trait]
    impl EntityModel for FixedModel {
        async fn ready(&self) -> Result<(), ModelError> {
            Ok(())
        }
        async fn extract(&self, _text: &str) -> Result<Vec<EntitySpan>, ModelError> {
            Ok(self.0.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl EntityModel for FailingModel {
        async fn ready(&self) -> Result<(), ModelError> {
            Ok(())
        }
        async fn extract(&self, _text: &str) -> Result<Vec<EntitySpan>, ModelError> {
            Err(ModelError::Http { status: 500 })
        }
    }

    #[tokio::test]
    async fn pattern_and_model_findings_share_one_schema() {
        let text = "contact a@b.com or ask Kim Minsu directly";
        let kim_start = text.find("Kim Minsu").unwrap();
        let model = FixedModel(vec![EntitySpan {
            category: "PS".into(),
            text: "Kim Minsu".into(),
            start: kim_start,
            end: kim_start + "Kim Minsu".len(),
        }]);
        let matcher = Matcher::new(Arc::new(model));
        let findings = matcher.scan(text).await;
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].kind, PiiType::Email);
        assert_eq!(findings[0].content, "a@b.com");
        assert_eq!(findings[1].kind, PiiType::Person);
        assert_eq!(findings[1].content, "Kim Minsu");
        assert!(findings[1].context.contains("Kim Minsu"));
    }

    #[tokio::test]
    async fn identical_content_keeps_first_only() {
        let text = "a@b.com again a@b.com and c@d.com";
        let matcher = Matcher::new(Arc::new(FixedModel(vec![])));
        let findings = matcher.scan(text).await;
        let contents: Vec<_> = findings.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, ["a@b.com", "c@d.com"]);
    }

    #[tokio::test]
    async fn model_failure_keeps_pattern_findings() {
        let matcher = Matcher::new(Arc::new(FailingModel));
        let findings = matcher.scan("reach a@b.com today").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].content, "a@b.com");
    }

    #[tokio::test]
    async fn untracked_categories_are_dropped() {
        let model = FixedModel(vec![EntitySpan {
            category: "DT".into(),
            text: "yesterday".into(),
            start: 0,
            end: 9,
        }]);
        let matcher = Matcher::new(Arc::new(model));
        assert!(matcher.scan("yesterday it rained").await.is_empty());
    }
}
