//! Hybrid route classification: document keywords + exemplar embeddings,
//! with an optional LLM tiebreaker when neither signal is decisive.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::Settings;
use crate::llm::{ChatMessage, LmClient};

use super::intents::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Route {
    Rag,
    Open,
    Bi,
    Mixed,
    NoAnswer,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Rag => "RAG",
            Route::Open => "OPEN",
            Route::Bi => "BI",
            Route::Mixed => "MIXED",
            Route::NoAnswer => "NO_ANSWER",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub route: Route,
    pub intent: Option<Intent>,
    pub confidence: f64,
    pub reason: String,
}

const DOC_KEYWORDS: &[&str] = &[
    "policy", "return", "returns", "markdown", "sop", "procedure", "guide",
    "documentation", "manual", "rule", "rules", "process",
];

const DOC_QNA_EXEMPLARS: &[&str] = &[
    "what is our return policy?",
    "how do I process a supplier refund?",
    "show me the warehouse receiving procedure",
    "what are the rules for markdowns?",
    "where is the documentation for stock counts?",
];

const OPEN_CHAT_EXEMPLARS: &[&str] = &[
    "how is the business doing?",
    "any advice on improving sales?",
    "what should I focus on this week?",
    "tell me something interesting about the shop",
    "who are you?",
];

const RAG_THRESHOLD: f64 = 0.25;
const OPEN_THRESHOLD: f64 = 0.20;
const OPEN_FALLBACK_CONFIDENCE: f64 = 0.3;

/// Exemplar embeddings cached by a hash of the exemplar set, so a changed
/// exemplar list invalidates the cache.
#[derive(Default)]
pub struct EmbeddingCache {
    entries: HashMap<u64, Vec<Vec<f32>>>,
}

fn exemplar_key(category: &str, phrases: &[&str]) -> u64 {
    let mut hasher = DefaultHasher::new();
    category.hash(&mut hasher);
    phrases.hash(&mut hasher);
    hasher.finish()
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x * y) as f64).sum()
}

fn rule_score(prompt_lower: &str, words: &[&str]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| prompt_lower.contains(*w)).count();
    hits as f64 / words.len() as f64
}

async fn embedding_scores(
    prompt: &str,
    llm: &LmClient,
    settings: &Settings,
    cache: &Mutex<EmbeddingCache>,
) -> HashMap<&'static str, f64> {
    let mut scores = HashMap::new();
    if !settings.hybrid_router_embeddings_enabled {
        return scores;
    }

    let mut prompt_emb = match llm.embed(&[prompt.to_string()]).await {
        Ok(mut v) if !v.is_empty() => v.remove(0),
        Ok(_) => return scores,
        Err(e) => {
            warn!(error = %e, "embedding scoring failed");
            return scores;
        }
    };
    normalize(&mut prompt_emb);

    for (category, phrases) in [("doc_qna", DOC_QNA_EXEMPLARS), ("open_chat", OPEN_CHAT_EXEMPLARS)]
    {
        let key = exemplar_key(category, phrases);
        let cached = { cache.lock().await.entries.get(&key).cloned() };
        let exemplar_embs = match cached {
            Some(embs) => embs,
            None => {
                let texts: Vec<String> = phrases.iter().map(|p| p.to_string()).collect();
                match llm.embed(&texts).await {
                    Ok(mut embs) => {
                        for e in embs.iter_mut() {
                            normalize(e);
                        }
                        cache.lock().await.entries.insert(key, embs.clone());
                        embs
                    }
                    Err(e) => {
                        warn!(category, error = %e, "exemplar embedding failed");
                        continue;
                    }
                }
            }
        };
        let best = exemplar_embs
            .iter()
            .map(|e| cosine(&prompt_emb, e))
            .fold(0.0_f64, f64::max);
        scores.insert(category, best);
    }
    scores
}

async fn llm_tiebreaker(
    prompt: &str,
    scores: &HashMap<&'static str, f64>,
    llm: &LmClient,
) -> RouteDecision {
    let mut context = format!("Query: {prompt}\n");
    if !scores.is_empty() {
        context.push_str(&format!("Similarity scores: {scores:?}\n"));
    }
    let system = "You are a strict router. Output only valid JSON.\n\
                  Pick route: \"RAG\" (documents/policies) or \"OPEN\".\n\
                  Return {\"route\":\"...\",\"reason\":\"...\"}.";
    let messages = [ChatMessage::system(system), ChatMessage::user(context)];

    match llm.chat_text(&messages, 0.1, 100, true).await {
        Ok(content) => match serde_json::from_str::<Value>(content.trim()) {
            Ok(data) => {
                let route = match data["route"].as_str() {
                    Some("RAG") => Route::Rag,
                    _ => Route::Open,
                };
                let reason = data["reason"].as_str().unwrap_or("llm_decision");
                RouteDecision {
                    route,
                    intent: None,
                    confidence: 0.65,
                    reason: format!("llm_{reason}"),
                }
            }
            Err(_) => RouteDecision {
                route: Route::Open,
                intent: None,
                confidence: OPEN_FALLBACK_CONFIDENCE,
                reason: "llm_parse_error".into(),
            },
        },
        Err(e) => {
            warn!(error = %e, "router tiebreaker failed");
            RouteDecision {
                route: Route::Open,
                intent: None,
                confidence: OPEN_FALLBACK_CONFIDENCE,
                reason: "llm_error".into(),
            }
        }
    }
}

/// Classify the message as RAG (documents) or OPEN (general assistant).
/// BI/MIXED are selected upstream only via an explicit, registered intent.
pub async fn route(
    prompt: &str,
    llm: &LmClient,
    settings: &Settings,
    cache: &Mutex<EmbeddingCache>,
) -> RouteDecision {
    let lower = prompt.to_lowercase();
    let doc_score = rule_score(&lower, DOC_KEYWORDS);
    let emb = embedding_scores(prompt, llm, settings, cache).await;

    let rag_confidence = 0.6 * doc_score + 0.4 * emb.get("doc_qna").copied().unwrap_or(0.0);
    let open_confidence = 0.4 * emb.get("open_chat").copied().unwrap_or(0.0);

    if rag_confidence >= RAG_THRESHOLD {
        return RouteDecision {
            route: Route::Rag,
            intent: None,
            confidence: rag_confidence,
            reason: "high_conf_rag".into(),
        };
    }
    if open_confidence >= OPEN_THRESHOLD {
        return RouteDecision {
            route: Route::Open,
            intent: None,
            confidence: open_confidence,
            reason: "high_conf_open".into(),
        };
    }
    if settings.hybrid_router_llm_tiebreaker_enabled {
        return llm_tiebreaker(prompt, &emb, llm).await;
    }
    RouteDecision {
        route: Route::Open,
        intent: None,
        confidence: OPEN_FALLBACK_CONFIDENCE,
        reason: "open_fallback".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn doc_keywords_route_to_rag() {
        let settings = crate::config::Settings::for_tests();
        let llm = crate::llm::LmClient::new(&settings);
        let cache = Mutex::new(EmbeddingCache::default());
        // 5 of 12 doc keywords -> doc_score 5/12, rag = 0.6 * 5/12 = 0.25
        let d = route(
            "what is the returns policy procedure rule documentation",
            &llm,
            &settings,
            &cache,
        )
        .await;
        assert_eq!(d.route, Route::Rag);
        assert!(d.confidence >= RAG_THRESHOLD);
    }

    #[tokio::test]
    async fn plain_chat_falls_back_to_open() {
        let settings = crate::config::Settings::for_tests();
        let llm = crate::llm::LmClient::new(&settings);
        let cache = Mutex::new(EmbeddingCache::default());
        let d = route("hello there", &llm, &settings, &cache).await;
        assert_eq!(d.route, Route::Open);
        assert_eq!(d.confidence, OPEN_FALLBACK_CONFIDENCE);
        assert_eq!(d.reason, "open_fallback");
    }

    #[test]
    fn cosine_on_normalized_vectors() {
        let mut a = vec![3.0_f32, 4.0];
        let mut b = vec![3.0_f32, 4.0];
        normalize(&mut a);
        normalize(&mut b);
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-6);
    }
}
