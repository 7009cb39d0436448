//! Answer composer: shapes every outcome into the unified contract and
//! refuses to emit anything that fails validation.

use serde_json::{Value, json};

use super::contracts::{
    Card, DocRef, SchemaValidationError, UnifiedResponse, validate_output,
};
use super::intents::IntentData;
use super::retriever::DocSnippet;
use super::router::Route;

fn finish(payload: UnifiedResponse) -> Result<UnifiedResponse, SchemaValidationError> {
    let value = serde_json::to_value(&payload)
        .map_err(|e| SchemaValidationError(vec![format!("serialization failed: {e}")]))?;
    validate_output(&value)?;
    Ok(payload)
}

pub fn compose_rag(
    snippets: &[DocSnippet],
    answer: String,
    confidence: f64,
) -> Result<UnifiedResponse, SchemaValidationError> {
    if snippets.is_empty() {
        return compose_no_answer(
            "No supporting documents found".into(),
            vec!["Try rephrasing".into(), "Ask a general question".into()],
        );
    }
    let docs: Vec<DocRef> = snippets
        .iter()
        .map(|s| DocRef { title: s.title.clone(), url: s.url.clone(), quote: s.quote.clone() })
        .collect();
    let citation_data: Vec<Value> = snippets.iter().take(10).map(|s| json!(s)).collect();

    let mut payload = UnifiedResponse::base();
    payload.route = Route::Rag.as_str().into();
    payload.answer = answer;
    payload.cards = vec![Card { card_type: "citations".into(), data: json!(citation_data) }];
    payload.provenance.docs = docs;
    payload.confidence = (confidence * 1000.0).round() / 1000.0;
    payload.follow_ups =
        vec!["Ask another question".into(), "Refine the policy question".into()];
    finish(payload)
}

pub fn compose_open(answer: String) -> Result<UnifiedResponse, SchemaValidationError> {
    let mut payload = UnifiedResponse::base();
    payload.route = Route::Open.as_str().into();
    payload.answer = answer;
    payload.confidence = 0.6;
    payload.follow_ups = vec!["Ask about inventory".into(), "How can I help?".into()];
    finish(payload)
}

pub fn compose_bi(
    data: &IntentData,
    summary: String,
    intent: &str,
    confidence: f64,
) -> Result<UnifiedResponse, SchemaValidationError> {
    let mut payload = UnifiedResponse::base();
    payload.route = Route::Bi.as_str().into();
    payload.answer = summary;
    payload.cards = vec![Card {
        card_type: "table".into(),
        data: json!({
            "intent": intent,
            "columns": data.columns,
            "rows": data.rows,
            "definition": data.definition,
        }),
    }];
    payload.provenance.data.tables = data.tables.clone();
    payload.confidence = (confidence * 1000.0).round() / 1000.0;
    payload.follow_ups = vec!["Drill into a SKU".into(), "Show stockout risks".into()];
    finish(payload)
}

pub fn compose_mixed(
    data: &IntentData,
    snippets: &[DocSnippet],
    synthesis: String,
    confidence: f64,
    intent: &str,
) -> Result<UnifiedResponse, SchemaValidationError> {
    let mut payload = UnifiedResponse::base();
    payload.route = Route::Bi.as_str().into();
    payload.answer = synthesis;
    payload.cards = vec![
        Card {
            card_type: "table".into(),
            data: json!({
                "intent": intent,
                "columns": data.columns,
                "rows": data.rows,
                "definition": data.definition,
            }),
        },
        Card {
            card_type: "citations".into(),
            data: json!(snippets.iter().take(10).collect::<Vec<_>>()),
        },
    ];
    payload.provenance.data.tables = data.tables.clone();
    payload.provenance.docs = snippets
        .iter()
        .map(|s| DocRef { title: s.title.clone(), url: s.url.clone(), quote: s.quote.clone() })
        .collect();
    payload.confidence = (confidence * 1000.0).round() / 1000.0;
    payload.follow_ups = vec!["Ask another question".into(), "Drill into the data".into()];
    finish(payload)
}

pub fn compose_no_answer(
    reason: String,
    follow_ups: Vec<String>,
) -> Result<UnifiedResponse, SchemaValidationError> {
    let mut payload = UnifiedResponse::base();
    payload.answer = reason;
    payload.follow_ups = follow_ups;
    finish(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(title: &str) -> DocSnippet {
        DocSnippet {
            title: title.into(),
            url: format!("https://docs.local/{title}"),
            quote: Some("quoted".into()),
            score: 0.9,
        }
    }

    #[test]
    fn rag_with_snippets_carries_citations() {
        let snippets: Vec<DocSnippet> = (0..12).map(|i| snippet(&format!("doc{i}"))).collect();
        let r = compose_rag(&snippets, "answer".into(), 0.4211).unwrap();
        assert_eq!(r.route, "RAG");
        assert_eq!(r.cards.len(), 1);
        assert_eq!(r.cards[0].data.as_array().unwrap().len(), 10);
        assert_eq!(r.provenance.docs.len(), 12);
        assert_eq!(r.confidence, 0.421);
    }

    #[test]
    fn rag_without_snippets_degrades_to_no_answer() {
        let r = compose_rag(&[], "ignored".into(), 0.9).unwrap();
        assert_eq!(r.route, "NO_ANSWER");
        assert!(!r.follow_ups.is_empty());
    }

    #[test]
    fn open_has_fixed_follow_ups() {
        let r = compose_open("hello".into()).unwrap();
        assert_eq!(r.route, "OPEN");
        assert_eq!(r.confidence, 0.6);
        assert_eq!(r.follow_ups.len(), 2);
    }

    #[test]
    fn no_answer_always_offers_a_next_step() {
        let r = compose_no_answer("nope".into(), vec!["try again".into()]).unwrap();
        assert_eq!(r.route, "NO_ANSWER");
        assert!(!r.answer.is_empty());
        assert!(!r.follow_ups.is_empty());
    }
}
