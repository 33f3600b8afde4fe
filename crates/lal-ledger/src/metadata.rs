use lal_types::{EventType, Metadata};
use serde_json::Value;

use crate::config::MetadataConfig;
use crate::error::LedgerError;

/// Metadata schema versions this ledger understands.
pub const SUPPORTED_SCHEMA_VERSION: u64 = 1;

/// Per-event-type metadata schema checks, run before any store write.
pub struct MetadataValidator {
    max_keys: usize,
}

/// Expected shape of one metadata entry.
#[derive(Clone, Copy)]
enum Rule {
    Amount,
    Text,
    OptionalText,
}

impl MetadataValidator {
    pub fn new(config: &MetadataConfig) -> Self {
        Self {
            max_keys: config.max_keys,
        }
    }

    /// Check `metadata` against the rules for `event_type`.
    pub fn validate(&self, event_type: EventType, metadata: &Metadata) -> Result<(), LedgerError> {
        let malformed = |reason: String| LedgerError::MalformedMetadata { event_type, reason };

        if metadata.len() > self.max_keys {
            return Err(malformed(format!(
                "{} keys exceeds the limit of {}",
                metadata.len(),
                self.max_keys
            )));
        }
        if metadata.keys().any(|k| k.trim().is_empty()) {
            return Err(malformed("metadata keys must not be empty".into()));
        }
        if let Some(version) = metadata.get("schema_version") {
            if version.as_u64() != Some(SUPPORTED_SCHEMA_VERSION) {
                return Err(malformed(format!(
                    "unsupported schema_version {version}"
                )));
            }
        }

        for &(key, rule) in rules_for(event_type) {
            check(key, rule, metadata.get(key)).map_err(malformed)?;
        }
        Ok(())
    }
}

impl Default for MetadataValidator {
    fn default() -> Self {
        Self::new(&MetadataConfig::default())
    }
}

fn rules_for(event_type: EventType) -> &'static [(&'static str, Rule)] {
    match event_type {
        EventType::MeasurementRecorded => &[("area", Rule::Amount)],
        EventType::NoticeGenerated => &[("notice_number", Rule::OptionalText)],
        EventType::DocumentUploaded => &[("document_url", Rule::Text)],
        EventType::PaymentInitiated => &[("amount", Rule::Amount)],
        EventType::PaymentCompleted => &[("amount", Rule::Amount), ("reference", Rule::OptionalText)],
        EventType::OwnershipUpdated => &[("owner_name", Rule::Text)],
        EventType::AwardDeclared => &[("award_amount", Rule::Amount)],
        EventType::SnapshotReconciled => &[],
    }
}

fn check(key: &str, rule: Rule, value: Option<&Value>) -> Result<(), String> {
    match (rule, value) {
        (Rule::OptionalText, None) => Ok(()),
        (Rule::Amount | Rule::Text, None) => Err(format!("`{key}` is required")),
        (Rule::Amount, Some(v)) => match v.as_f64() {
            Some(n) if n >= 0.0 => Ok(()),
            Some(_) => Err(format!("`{key}` must not be negative")),
            None => Err(format!("`{key}` must be a number")),
        },
        (Rule::Text, Some(v)) => match v.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(()),
            Some(_) => Err(format!("`{key}` must not be empty")),
            None => Err(format!("`{key}` must be a string")),
        },
        (Rule::OptionalText, Some(v)) => {
            if v.is_string() {
                Ok(())
            } else {
                Err(format!("`{key}` must be a string"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn meta(value: Value) -> Metadata {
        serde_json::from_value(value).unwrap()
    }

    fn reason(err: LedgerError) -> String {
        match err {
            LedgerError::MalformedMetadata { reason, .. } => reason,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn measurement_requires_non_negative_area() {
        let v = MetadataValidator::default();
        v.validate(EventType::MeasurementRecorded, &meta(json!({"area": 2.5})))
            .unwrap();
        v.validate(EventType::MeasurementRecorded, &meta(json!({"area": 0})))
            .unwrap();

        let missing = v
            .validate(EventType::MeasurementRecorded, &Metadata::new())
            .unwrap_err();
        assert_eq!(reason(missing), "`area` is required");

        let negative = v
            .validate(EventType::MeasurementRecorded, &meta(json!({"area": -1})))
            .unwrap_err();
        assert_eq!(reason(negative), "`area` must not be negative");

        let text = v
            .validate(EventType::MeasurementRecorded, &meta(json!({"area": "2.5"})))
            .unwrap_err();
        assert_eq!(reason(text), "`area` must be a number");
    }

    #[test]
    fn notice_number_is_optional() {
        let v = MetadataValidator::default();
        v.validate(EventType::NoticeGenerated, &Metadata::new()).unwrap();
        v.validate(EventType::NoticeGenerated, &meta(json!({"notice_number": "N-19"})))
            .unwrap();
        assert!(v
            .validate(EventType::NoticeGenerated, &meta(json!({"notice_number": 19})))
            .is_err());
    }

    #[test]
    fn text_fields_must_be_non_empty() {
        let v = MetadataValidator::default();
        v.validate(
            EventType::DocumentUploaded,
            &meta(json!({"document_url": "s3://docs/7-12.pdf"})),
        )
        .unwrap();
        assert!(v
            .validate(EventType::DocumentUploaded, &meta(json!({"document_url": "  "})))
            .is_err());
        assert!(v
            .validate(EventType::OwnershipUpdated, &meta(json!({"owner_name": ""})))
            .is_err());
    }

    #[test]
    fn payment_completed_checks_reference_type() {
        let v = MetadataValidator::default();
        v.validate(
            EventType::PaymentCompleted,
            &meta(json!({"amount": 125000, "reference": "UTR123"})),
        )
        .unwrap();
        assert!(v
            .validate(
                EventType::PaymentCompleted,
                &meta(json!({"amount": 125000, "reference": 5}))
            )
            .is_err());
    }

    #[test]
    fn extra_keys_are_allowed() {
        let v = MetadataValidator::default();
        v.validate(
            EventType::AwardDeclared,
            &meta(json!({"award_amount": 10, "award_number": "AW-3", "remarks": "final"})),
        )
        .unwrap();
    }

    #[test]
    fn common_rules() {
        let v = MetadataValidator::new(&MetadataConfig { max_keys: 2 });
        assert!(v
            .validate(EventType::NoticeGenerated, &meta(json!({"a": 1, "b": 2, "c": 3})))
            .is_err());
        assert!(v
            .validate(EventType::NoticeGenerated, &meta(json!({"": 1})))
            .is_err());
        assert!(v
            .validate(EventType::NoticeGenerated, &meta(json!({"schema_version": 2})))
            .is_err());
        v.validate(EventType::NoticeGenerated, &meta(json!({"schema_version": 1})))
            .unwrap();
    }
}
