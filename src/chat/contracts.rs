//! Unified chat response contract.
//!
//! The response is a typed struct, so well-formedness is largely enforced
//! by construction; `validate_output` re-checks the serialized document
//! against the contract before anything leaves the composer. A violation
//! here is a server-side bug and must surface as a 500, never as a silent
//! empty answer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::router::Route;

pub const ROUTES: &[&str] = &["RAG", "OPEN", "BI", "NO_ANSWER"];

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DocRef {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DataProvenance {
    pub tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Provenance {
    pub data: DataProvenance,
    pub docs: Vec<DocRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Card {
    #[serde(rename = "type")]
    pub card_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnifiedResponse {
    pub route: String,
    pub answer: String,
    pub cards: Vec<Card>,
    pub provenance: Provenance,
    pub confidence: f64,
    pub follow_ups: Vec<String>,
}

impl UnifiedResponse {
    pub fn base() -> Self {
        Self {
            route: Route::NoAnswer.as_str().into(),
            answer: String::new(),
            cards: vec![],
            provenance: Provenance::default(),
            confidence: 0.0,
            follow_ups: vec![],
        }
    }
}

#[derive(Debug, Error)]
#[error("unified response failed contract validation: {}", .0.join("; "))]
pub struct SchemaValidationError(pub Vec<String>);

/// Validate a serialized response document against the unified contract,
/// collecting all violations.
pub fn validate_output(payload: &Value) -> Result<(), SchemaValidationError> {
    let mut errors = Vec::new();

    let Some(obj) = payload.as_object() else {
        return Err(SchemaValidationError(vec!["payload is not an object".into()]));
    };

    for key in ["route", "answer", "provenance", "confidence", "follow_ups"] {
        if !obj.contains_key(key) {
            errors.push(format!("missing required field `{key}`"));
        }
    }

    match obj.get("route").and_then(Value::as_str) {
        Some(route) if ROUTES.contains(&route) => {}
        Some(route) => errors.push(format!("route `{route}` is not one of {ROUTES:?}")),
        None => errors.push("route must be a string".into()),
    }

    if obj.get("answer").map(|v| !v.is_string()).unwrap_or(false) {
        errors.push("answer must be a string".into());
    }

    if let Some(cards) = obj.get("cards") {
        match cards.as_array() {
            Some(cards) => {
                for (i, card) in cards.iter().enumerate() {
                    if !card.is_object() {
                        errors.push(format!("cards[{i}] must be an object"));
                    }
                }
            }
            None => errors.push("cards must be an array".into()),
        }
    }

    if let Some(prov) = obj.get("provenance") {
        match prov.as_object() {
            Some(prov) => {
                if let Some(data) = prov.get("data") {
                    let tables_ok = data
                        .get("tables")
                        .and_then(Value::as_array)
                        .is_some_and(|t| t.iter().all(Value::is_string));
                    if !tables_ok {
                        errors.push("provenance.data.tables must be an array of strings".into());
                    }
                }
                if let Some(docs) = prov.get("docs").and_then(Value::as_array) {
                    for (i, doc) in docs.iter().enumerate() {
                        let has_title = doc.get("title").is_some_and(Value::is_string);
                        let has_url = doc.get("url").is_some_and(Value::is_string);
                        if !has_title || !has_url {
                            errors.push(format!("provenance.docs[{i}] requires title and url"));
                        }
                    }
                }
            }
            None => errors.push("provenance must be an object".into()),
        }
    }

    if obj.get("confidence").map(|v| !v.is_number()).unwrap_or(false) {
        errors.push("confidence must be a number".into());
    }

    let follow_ups_ok = obj
        .get("follow_ups")
        .map(|v| v.as_array().is_some_and(|a| a.iter().all(Value::is_string)))
        .unwrap_or(true);
    if !follow_ups_ok {
        errors.push("follow_ups must be an array of strings".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaValidationError(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_response_validates() {
        let value = serde_json::to_value(UnifiedResponse::base()).unwrap();
        assert!(validate_output(&value).is_ok());
    }

    #[test]
    fn missing_fields_are_collected() {
        let err = validate_output(&json!({"route": "OPEN"})).unwrap_err();
        assert!(err.0.iter().any(|e| e.contains("answer")));
        assert!(err.0.iter().any(|e| e.contains("confidence")));
    }

    #[test]
    fn invalid_route_rejected() {
        let value = json!({
            "route": "MAGIC", "answer": "x",
            "provenance": {"data": {"tables": []}, "docs": []},
            "confidence": 0.5, "follow_ups": []
        });
        assert!(validate_output(&value).is_err());
    }

    #[test]
    fn doc_without_url_rejected() {
        let value = json!({
            "route": "RAG", "answer": "x",
            "provenance": {"data": {"tables": []}, "docs": [{"title": "t"}]},
            "confidence": 0.5, "follow_ups": []
        });
        assert!(validate_output(&value).is_err());
    }

    #[test]
    fn revalidation_round_trips() {
        let value = json!({
            "route": "BI", "answer": "numbers", "cards": [{"type": "table", "data": {}}],
            "provenance": {"data": {"tables": ["sales_daily"]}, "docs": []},
            "confidence": 0.8, "follow_ups": ["more?"]
        });
        assert!(validate_output(&value).is_ok());
        let reparsed: UnifiedResponse = serde_json::from_value(value).unwrap();
        let again = serde_json::to_value(reparsed).unwrap();
        assert!(validate_output(&again).is_ok());
    }
}
