//! Content validation against compliance data.
//!
//! Rules come inline with the call or from a record in
//! `compliance_profiles` (cached as reference data). A `failed` verdict is
//! a business outcome, not a tool failure: the result still succeeds and
//! carries the findings for the model to act on.

use async_trait::async_trait;
use draftsmith_cache::{CacheKey, DataClass, TieredCache};
use draftsmith_core::error::ToolError;
use draftsmith_core::record::{RecordStore, tables};
use draftsmith_core::tool::{Tool, ToolContext, ToolOutput};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// An explicit rule set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceRules {
    /// Any occurrence fails the content
    pub forbidden_phrases: Vec<String>,

    /// Each missing phrase is a warning
    pub required_phrases: Vec<String>,

    /// Missing disclaimer fails the content
    pub required_disclaimer: Option<String>,

    /// Longer content (in characters) is a warning
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Warning,
    Failed,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Warning => "warning",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    pub severity: Severity,
    pub detail: String,
}

impl ComplianceRules {
    /// Apply every rule. Phrase matching ignores case.
    pub fn check(&self, content: &str) -> (Verdict, Vec<Finding>) {
        let haystack = content.to_lowercase();
        let mut findings = Vec::new();

        for phrase in &self.forbidden_phrases {
            if !phrase.is_empty() && haystack.contains(&phrase.to_lowercase()) {
                findings.push(Finding {
                    rule: "forbidden-phrase".into(),
                    severity: Severity::Failed,
                    detail: format!("contains \"{phrase}\""),
                });
            }
        }

        if let Some(disclaimer) = &self.required_disclaimer
            && !haystack.contains(&disclaimer.to_lowercase())
        {
            findings.push(Finding {
                rule: "required-disclaimer".into(),
                severity: Severity::Failed,
                detail: format!("missing disclaimer \"{disclaimer}\""),
            });
        }

        for phrase in &self.required_phrases {
            if !haystack.contains(&phrase.to_lowercase()) {
                findings.push(Finding {
                    rule: "required-phrase".into(),
                    severity: Severity::Warning,
                    detail: format!("missing \"{phrase}\""),
                });
            }
        }

        let length = content.chars().count();
        if let Some(max) = self.max_length
            && length > max
        {
            findings.push(Finding {
                rule: "max-length".into(),
                severity: Severity::Warning,
                detail: format!("{length} characters exceeds the limit of {max}"),
            });
        }

        let verdict = match findings.iter().map(|f| f.severity).max() {
            Some(Severity::Failed) => Verdict::Failed,
            Some(Severity::Warning) => Verdict::Warning,
            None => Verdict::Passed,
        };
        (verdict, findings)
    }
}

pub struct ValidateContentTool {
    cache: Arc<TieredCache>,
    records: Arc<dyn RecordStore>,
}

impl ValidateContentTool {
    pub fn new(cache: Arc<TieredCache>, records: Arc<dyn RecordStore>) -> Self {
        Self { cache, records }
    }

    async fn load_profile(&self, profile_id: &str) -> Result<ComplianceRules, ToolError> {
        let key = CacheKey::new(profile_id, tables::COMPLIANCE_PROFILES);
        self.cache
            .get_or_compute(
                DataClass::ReferenceData,
                &key,
                || async {
                    let record = self
                        .records
                        .get_record(tables::COMPLIANCE_PROFILES, profile_id)
                        .await?
                        .ok_or_else(|| ToolError::ExecutionFailed {
                            tool_name: "validate_content".into(),
                            reason: format!("no compliance profile '{profile_id}'"),
                        })?;
                    let fields = serde_json::Value::Object(record.fields);
                    serde_json::from_value::<ComplianceRules>(fields).map_err(|e| {
                        ToolError::ExecutionFailed {
                            tool_name: "validate_content".into(),
                            reason: format!("compliance profile '{profile_id}' is malformed: {e}"),
                        }
                    })
                },
                None,
            )
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateContentArgs {
    pub content: String,

    /// Compliance profile to load; defaults to the caller's own
    #[serde(default)]
    pub profile_id: Option<String>,

    /// Inline rules, used instead of a stored profile
    #[serde(default)]
    pub rules: Option<ComplianceRules>,
}

#[async_trait]
impl Tool for ValidateContentTool {
    type Args = ValidateContentArgs;

    fn name(&self) -> &str {
        "validate_content"
    }

    fn description(&self) -> &str {
        "Check draft content against compliance rules (forbidden phrases, required disclaimers, length). Returns passed, warning, or failed with itemized findings."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The draft to check"
                },
                "profile_id": {
                    "type": "string",
                    "description": "Compliance profile id (defaults to the caller's profile)"
                },
                "rules": {
                    "type": "object",
                    "description": "Inline rules instead of a stored profile",
                    "properties": {
                        "forbidden_phrases": { "type": "array", "items": { "type": "string" } },
                        "required_phrases": { "type": "array", "items": { "type": "string" } },
                        "required_disclaimer": { "type": "string" },
                        "max_length": { "type": "integer", "minimum": 1 }
                    }
                }
            },
            "required": ["content"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &ValidateContentArgs) -> Result<(), ToolError> {
        if args.content.trim().is_empty() {
            return Err(ToolError::InvalidArguments("content must not be empty".into()));
        }
        if args.profile_id.is_some() && args.rules.is_some() {
            return Err(ToolError::InvalidArguments(
                "pass either profile_id or rules, not both".into(),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        args: ValidateContentArgs,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let (profile, rules) = match args.rules {
            Some(rules) => ("inline".to_string(), rules),
            None => {
                let profile_id = args.profile_id.unwrap_or_else(|| ctx.caller_id.clone());
                let rules = self.load_profile(&profile_id).await?;
                (profile_id, rules)
            }
        };

        let (verdict, findings) = rules.check(&args.content);
        debug!(profile = %profile, verdict = verdict.as_str(), findings = findings.len(), "Content validated");

        ctx.insight(
            self.name(),
            format!(
                "Compliance check {} with {} finding(s)",
                verdict.as_str(),
                findings.len()
            ),
            serde_json::json!({ "profile": profile, "verdict": verdict }),
        );

        Ok(ToolOutput::new(serde_json::json!({
            "verdict": verdict,
            "profile": profile,
            "findings": findings,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ctx, drain};
    use draftsmith_core::event::RunEvent;
    use draftsmith_core::record::Fields;
    use draftsmith_core::tool::{FailureKind, ToolCall, ToolRegistry};
    use draftsmith_stores::InMemoryRecordStore;

    fn rules() -> ComplianceRules {
        ComplianceRules {
            forbidden_phrases: vec!["guaranteed returns".into()],
            required_phrases: vec!["Acme".into()],
            required_disclaimer: Some("Terms apply.".into()),
            max_length: Some(80),
        }
    }

    #[test]
    fn clean_content_passes() {
        let (verdict, findings) = rules().check("Welcome to ACME! Terms apply.");
        assert_eq!(verdict, Verdict::Passed);
        assert!(findings.is_empty());
    }

    #[test]
    fn soft_rules_only_warn() {
        let long = format!("Welcome aboard. {} Terms apply.", "x".repeat(80));
        let (verdict, findings) = rules().check(&long);
        assert_eq!(verdict, Verdict::Warning);
        let rules: Vec<_> = findings.iter().map(|f| f.rule.as_str()).collect();
        assert_eq!(rules, vec!["required-phrase", "max-length"]);
    }

    #[test]
    fn hard_rules_fail() {
        let (verdict, findings) = rules().check("Acme: Guaranteed Returns for everyone");
        assert_eq!(verdict, Verdict::Failed);
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.severity == Severity::Failed));
    }

    fn call(arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_val".into(),
            name: "validate_content".into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn stored_profile_is_loaded_once_and_cached() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut fields = Fields::new();
        fields.insert("name".into(), "Acme retail".into());
        fields.insert("forbidden_phrases".into(), serde_json::json!(["free money"]));
        store
            .put_record(tables::COMPLIANCE_PROFILES, "acme", fields)
            .await
            .unwrap();

        let cache = Arc::new(TieredCache::in_memory());
        let mut registry = ToolRegistry::new();
        registry.register(ValidateContentTool::new(cache.clone(), store));
        let (ctx, mut rx) = ctx();

        let result = registry
            .dispatch(&call(serde_json::json!({"content": "Get free money now"})), &ctx)
            .await;
        assert!(result.succeeded);
        let payload = result.payload.unwrap();
        assert_eq!(payload["verdict"], "failed");
        assert_eq!(payload["profile"], "acme");

        registry
            .dispatch(&call(serde_json::json!({"content": "Hello"})), &ctx)
            .await;
        assert_eq!(cache.stats().hits, 1);

        assert!(matches!(drain(&mut rx).first(), Some(RunEvent::Insight { .. })));
    }

    #[tokio::test]
    async fn missing_profile_is_a_tool_execution_error() {
        let mut registry = ToolRegistry::new();
        registry.register(ValidateContentTool::new(
            Arc::new(TieredCache::in_memory()),
            Arc::new(InMemoryRecordStore::new()),
        ));
        let (ctx, _rx) = ctx();
        let result = registry
            .dispatch(
                &call(serde_json::json!({"content": "Hi", "profile_id": "ghost"})),
                &ctx,
            )
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::ToolExecutionError));
    }

    #[tokio::test]
    async fn inline_rules_skip_the_store() {
        let mut registry = ToolRegistry::new();
        registry.register(ValidateContentTool::new(
            Arc::new(TieredCache::in_memory()),
            Arc::new(InMemoryRecordStore::new()),
        ));
        let (ctx, _rx) = ctx();
        let result = registry
            .dispatch(
                &call(serde_json::json!({
                    "content": "Hello there",
                    "rules": {"required_disclaimer": "Terms apply."}
                })),
                &ctx,
            )
            .await;
        assert_eq!(result.payload.unwrap()["verdict"], "failed");
    }
}
