//! Intent resolution: rules first, LLM fallback when the rules are unsure.

use serde_json::{Map, Value};
use tracing::warn;

use crate::config::Settings;
use crate::llm::{ChatMessage, LmClient};

use super::intents::{ALL_INTENTS, Intent, IntentResolution, ResolutionSource};
use super::rules::resolve_intent_rules;

pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.55;

const SYSTEM_PROMPT: &str = "You are a strict intent mapper for an inventory & sales analytics \
system. Allowed intents: top_skus_by_margin, stockout_risk, week_in_review, reorder_suggestions, \
slow_movers, product_detail, quarterly_forecast, annual_breakdown. Output MUST be valid JSON with \
keys: intent (string or null), params (object), confidence (0-1 float), reasons (array). If the \
user asks something outside the allowed intents, set intent=null and give a short reason. Don't \
invent parameters. Map 'last week' to period=7d, 'last month' to period=30d. horizon_days must be \
one of 7, 14, 30.";

/// Resolve the prompt to an intent. Rules win at or above the confidence
/// threshold; below it the LLM result is adopted when it names a valid
/// intent with strictly higher confidence, or when the rules resolved
/// nothing at all.
pub async fn resolve_intent(prompt: &str, llm: &LmClient, settings: &Settings) -> IntentResolution {
    let rule_res = resolve_intent_rules(prompt);
    if !settings.chat_llm_fallback_enabled {
        return rule_res;
    }
    if rule_res.confidence >= LOW_CONFIDENCE_THRESHOLD {
        return rule_res;
    }
    let llm_res = resolve_intent_llm(prompt, llm).await;
    if (llm_res.intent.is_some() && llm_res.confidence > rule_res.confidence)
        || (rule_res.intent.is_none() && llm_res.intent.is_some())
    {
        return llm_res;
    }
    rule_res
}

/// Ask the model to map the prompt onto the closed intent set, demanding
/// strict JSON. Any intent outside the set is rejected as unresolved.
pub async fn resolve_intent_llm(prompt: &str, llm: &LmClient) -> IntentResolution {
    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
    let content = match llm.chat_text(&messages, 0.0, 400, true).await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "LLM intent resolution failed");
            return IntentResolution::unresolved(
                ResolutionSource::Llm,
                vec![format!("llm_error: {e}")],
            );
        }
    };

    let parsed: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            return IntentResolution::unresolved(
                ResolutionSource::Llm,
                vec![format!("llm_parse_error: {e}")],
            );
        }
    };

    let confidence = parsed["confidence"].as_f64().unwrap_or(0.0);
    let reasons: Vec<String> = parsed["reasons"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let Some(intent_str) = parsed["intent"].as_str() else {
        return IntentResolution {
            intent: None,
            params: Map::new(),
            confidence,
            source: ResolutionSource::Llm,
            reasons,
        };
    };

    let Some(intent) = Intent::parse(intent_str) else {
        return IntentResolution::unresolved(ResolutionSource::Llm, vec!["invalid intent".into()]);
    };
    debug_assert!(ALL_INTENTS.contains(&intent));

    let params = parsed["params"].as_object().cloned().unwrap_or_default();
    IntentResolution {
        intent: Some(intent),
        params,
        confidence,
        source: ResolutionSource::Llm,
        reasons,
    }
}

/// Grounded open-ended chat: answers a free-form question against the
/// business-context snapshot.
pub async fn general_chat(
    prompt: &str,
    business_context: &str,
    llm: &LmClient,
) -> anyhow::Result<String> {
    let system = format!(
        "You are an intelligent business assistant for an inventory management system.\n\
         You have full knowledge of the business data and should respond as someone who \
         understands the company intimately.\n\n\
         BUSINESS CONTEXT (snapshot):\n{business_context}\n\n\
         Instructions:\n\
         - Use the business context above to ground answers in actual numbers when referenced.\n\
         - If a user asks who or what you are, state you are an AI assistant running model '{}' \
           accessed locally via an OpenAI-compatible API.\n\
         - Be concise, insightful, and proactively surface one relevant metric when helpful.\n\
         - Offer specific analytic intents if they would answer the question better \
           (top_skus_by_margin, stockout_risk, week_in_review, reorder_suggestions).\n\
         - If data required isn't in context, be transparent and say what additional data is needed.\n\
         - Avoid hallucinating metrics not present; prefer ranges or 'unknown'.",
        llm.chat_model()
    );
    let messages = [ChatMessage::system(system), ChatMessage::user(prompt)];
    llm.chat_text(&messages, 0.7, 500, false).await
}
