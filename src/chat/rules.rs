//! Keyword-scored intent resolution.
//!
//! First line of the resolver: count keyword hits per intent, take the
//! best-scoring candidate, then run the ordered normalizers to lift
//! parameters (period, top-N, horizon, target year) out of the prompt.

use serde_json::{Map, Value, json};

use super::intents::{Intent, IntentResolution, ResolutionSource};

pub const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (
        Intent::TopSkusByMargin,
        &[
            "top", "margin", "sku", "skus", "profit", "profitable", "profitability",
            "best", "best selling", "best sale", "top selling", "highest", "most profitable",
            "top products", "best products", "top performers", "winners", "top revenue",
            "ranking", "rank", "compare", "which products", "what products", "leading",
            "money", "earnings", "income", "returns", "margin analysis",
        ],
    ),
    (
        Intent::StockoutRisk,
        &[
            "stockout", "stock out", "run out", "running out", "risk", "out of stock",
            "low inventory", "low stock", "shortage", "shortages", "depleted",
            "inventory risk", "stock risk", "availability", "available", "in stock",
            "supply", "replenish", "restock", "critical", "urgent", "emergency",
            "do we have", "how much left", "running low", "almost out",
        ],
    ),
    (
        Intent::WeekInReview,
        &[
            "week in review", "last week", "summary", "review", "weekly", "this week",
            "past week", "recent", "lately", "overview", "recap",
            "sales figures", "total sales", "revenue", "sales revenue", "sales performance",
            "sales summary", "how did we do", "performance", "results", "numbers",
            "business", "operations", "metrics", "analytics", "data", "report",
            "dashboard", "insights", "trends", "analysis", "stats", "statistics",
        ],
    ),
    (
        Intent::ReorderSuggestions,
        &[
            "reorder", "suggestion", "suggestions", "po draft", "purchase", "buy", "order",
            "replenish", "stock up", "procurement", "sourcing", "supplier",
            "what to order", "what to buy", "purchase orders", "shopping list",
            "recommendations", "should i buy", "need to order", "ordering",
            "planning", "forecast", "demand", "supply planning", "inventory planning",
        ],
    ),
    (
        Intent::SlowMovers,
        &[
            "slow", "slow moving", "not selling", "can't move", "cant move", "stuck",
            "dead stock", "dead inventory", "sitting", "stagnant", "dormant",
            "underperforming", "poor performance", "low turnover", "old inventory",
            "excess", "surplus", "overstocked", "clearance", "liquidate",
            "problem", "issues", "concerns", "worst", "bottom", "lagging",
        ],
    ),
    (
        Intent::ProductDetail,
        &[
            "detail", "details", "tell me about", "information", "info", "specifics",
            "units sold", "sales for", "inventory for", "stock for", "how much", "how many",
            "product", "item", "sku", "part", "model", "about this", "show me",
            "lookup", "find", "search", "status", "current", "level", "quantity",
        ],
    ),
    (
        Intent::QuarterlyForecast,
        &[
            "quarter", "quarterly", "forecast", "projection", "expected", "predict",
            "estimate", "q1", "q2", "q3", "q4", "year to date", "ytd",
            "annual", "yearly", "2025", "2024", "this year", "last year",
            "future", "upcoming", "next quarter", "next year", "projections",
            "budget", "planning", "outlook", "expectations", "goals", "targets",
        ],
    ),
];

/// Resolve an intent from keyword hits plus parameter normalizers.
pub fn resolve_intent_rules(prompt: &str) -> IntentResolution {
    let lower = prompt.to_lowercase();

    let mut scores: Vec<(Intent, usize)> = Vec::new();
    for (intent, keywords) in INTENT_KEYWORDS {
        let hits = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        if hits > 0 {
            scores.push((*intent, hits));
        }
    }
    if scores.is_empty() {
        return IntentResolution::unresolved(
            ResolutionSource::Rules,
            vec!["no keyword match".into()],
        );
    }
    scores.sort_by(|a, b| b.1.cmp(&a.1));
    let (mut best_intent, best_score) = scores[0];

    let params = normalize_params(&lower);

    // A concrete year together with annual wording means the user wants
    // the per-quarter breakdown of that year, not a forward projection.
    let has_year = params.contains_key("target_year");
    let has_annual_keywords = ["revenue", "annual", "yearly", "year"]
        .iter()
        .any(|kw| lower.contains(kw));
    if has_year && has_annual_keywords && best_intent == Intent::QuarterlyForecast {
        best_intent = Intent::AnnualBreakdown;
    }

    IntentResolution {
        intent: Some(best_intent),
        params,
        confidence: (0.4 + 0.2 * best_score as f64).min(1.0),
        source: ResolutionSource::Rules,
        reasons: vec!["keyword match".into()],
    }
}

/// Ordered parameter normalizers over the lowercased prompt.
fn normalize_params(lower: &str) -> Map<String, Value> {
    let mut params = Map::new();
    if lower.contains("last week") || lower.contains("past week") {
        params.insert("period".into(), json!("7d"));
    }
    if lower.contains("last month") || lower.contains("past 30 days") {
        params.insert("period".into(), json!("30d"));
    }
    if lower.contains("today") {
        params.insert("period".into(), json!("1d"));
    }
    if let Some(n) = find_top_n(lower) {
        params.insert("n".into(), json!(n));
    }
    if let Some(h) = find_horizon_days(lower) {
        params.insert("horizon_days".into(), json!(h));
    }
    if let Some(year) = find_year(lower) {
        params.insert("target_year".into(), json!(year));
    }
    params
}

/// "top 10" / "top10" → 10 (one or two digits).
fn find_top_n(lower: &str) -> Option<i64> {
    let bytes = lower.as_bytes();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("top") {
        let mut i = from + pos + 3;
        if i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        let digits_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() && i - digits_start < 2 {
            i += 1;
        }
        if i > digits_start {
            if let Ok(n) = lower[digits_start..i].parse() {
                return Some(n);
            }
        }
        from += pos + 3;
    }
    None
}

/// "7 day" / "14 day" / "30 day" → horizon days.
fn find_horizon_days(lower: &str) -> Option<i64> {
    for (num, text) in [(7i64, "7"), (14, "14"), (30, "30")] {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(text) {
            let start = from + pos;
            let end = start + text.len();
            // must be a standalone number, not part of a longer one
            let standalone = (start == 0
                || !lower.as_bytes()[start - 1].is_ascii_digit())
                && lower.as_bytes().get(end).is_none_or(|b| !b.is_ascii_digit());
            if standalone {
                let rest = &lower[end..];
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                if rest.starts_with("day") {
                    return Some(num);
                }
            }
            from = end;
        }
    }
    None
}

/// Four-digit year 2000-2099.
pub fn find_year(lower: &str) -> Option<i32> {
    let bytes = lower.as_bytes();
    for i in 0..bytes.len().saturating_sub(3) {
        if bytes[i] == b'2'
            && bytes[i + 1] == b'0'
            && bytes[i + 2].is_ascii_digit()
            && bytes[i + 3].is_ascii_digit()
        {
            let standalone = (i == 0 || !bytes[i - 1].is_ascii_digit())
                && bytes.get(i + 4).is_none_or(|b| !b.is_ascii_digit());
            if standalone {
                return lower[i..i + 4].parse().ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_margin_prompt_resolves() {
        let res = resolve_intent_rules("top skus by margin last week");
        assert_eq!(res.intent, Some(Intent::TopSkusByMargin));
        assert_eq!(res.params["period"], json!("7d"));
        assert!(res.confidence >= 0.55);
        assert_eq!(res.reasons, vec!["keyword match"]);
    }

    #[test]
    fn gibberish_is_unresolved_at_zero() {
        let res = resolve_intent_rules("xyzzy plugh");
        assert_eq!(res.intent, None);
        assert_eq!(res.confidence, 0.0);
    }

    #[test]
    fn top_n_and_horizon_normalizers() {
        let res = resolve_intent_rules("top 5 stockout risk in 14 days");
        assert_eq!(res.params["n"], json!(5));
        assert_eq!(res.params["horizon_days"], json!(14));
    }

    #[test]
    fn year_with_annual_wording_rewrites_forecast() {
        let res = resolve_intent_rules("what was our annual revenue in 2024?");
        assert_eq!(res.intent, Some(Intent::AnnualBreakdown));
        assert_eq!(res.params["target_year"], json!(2024));
    }

    #[test]
    fn confidence_caps_at_one() {
        let res = resolve_intent_rules(
            "top margin profit best selling highest most profitable winners ranking",
        );
        assert!(res.confidence <= 1.0);
    }

    #[test]
    fn horizon_requires_standalone_number() {
        assert_eq!(find_horizon_days("next 140 days"), None);
        assert_eq!(find_horizon_days("a 14 day horizon"), Some(14));
        assert_eq!(find_horizon_days("30days please"), Some(30));
    }
}
