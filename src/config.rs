use std::env;
use std::time::Duration;

use chrono_tz::Tz;

/// Immutable runtime configuration, read from the environment exactly once
/// at startup. Handlers receive this through `AppState` and never consult
/// the environment themselves.
#[derive(Debug, Clone)]
pub struct Settings {
    // ── API ─────────────────────────────────────────────
    pub api_prefix: String,
    pub allowed_origins: Vec<String>,
    /// Optional SQLite path override; defaults to `<data_dir>/stocksense.db`.
    pub database_url: Option<String>,

    // ── Auth ────────────────────────────────────────────
    pub jwt_secret: String,
    pub access_minutes: i64,
    pub refresh_days: i64,

    // ── Chat feature flags ──────────────────────────────
    pub chat_enabled: bool,
    pub chat_llm_fallback_enabled: bool,
    pub hybrid_chat_enabled: bool,
    pub hybrid_router_embeddings_enabled: bool,
    pub hybrid_router_llm_tiebreaker_enabled: bool,

    // ── LLM endpoint (OpenAI-compatible local server) ───
    pub llm_base_url: String,
    pub llm_chat_model: String,
    pub llm_embed_model: String,
    pub llm_timeout: Duration,
    pub llm_api_key: Option<String>,

    // ── Retrieval ───────────────────────────────────────
    pub rag_top_k: usize,
    pub rag_max_context_chars: usize,

    // ── Time ────────────────────────────────────────────
    pub app_tz: Tz,

    // ── Alerts ──────────────────────────────────────────
    pub alert_cron_token: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub alert_email_from: Option<String>,
    pub alert_email_to: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub alert_signing_secret: Option<String>,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag(name: &str, default: bool) -> bool {
    match var(name) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let allowed_origins = var("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://127.0.0.1:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let app_tz: Tz = var("APP_TZ")
            .and_then(|v| v.parse().ok())
            .unwrap_or(chrono_tz::Asia::Singapore);

        let timeout_secs: u64 = var("LMSTUDIO_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        Self {
            api_prefix: "/api/v1".into(),
            allowed_origins,
            database_url: var("DATABASE_URL"),

            jwt_secret: var("JWT_SECRET")
                .or_else(|| var("SECRET_KEY"))
                .unwrap_or_else(|| "dev-secret-key-change-me".into()),
            access_minutes: var("ACCESS_MINUTES").and_then(|v| v.parse().ok()).unwrap_or(15),
            refresh_days: var("REFRESH_DAYS").and_then(|v| v.parse().ok()).unwrap_or(7),

            chat_enabled: flag("CHAT_ENABLED", true),
            chat_llm_fallback_enabled: flag("CHAT_LLM_FALLBACK_ENABLED", true),
            hybrid_chat_enabled: flag("HYBRID_CHAT_ENABLED", true),
            hybrid_router_embeddings_enabled: flag("HYBRID_ROUTER_EMBEDDINGS_ENABLED", false),
            hybrid_router_llm_tiebreaker_enabled: flag("HYBRID_ROUTER_LLM_TIEBREAKER_ENABLED", false),

            llm_base_url: var("LMSTUDIO_BASE_URL")
                .unwrap_or_else(|| "http://localhost:1234/v1".into()),
            llm_chat_model: var("LMSTUDIO_CHAT_MODEL")
                .unwrap_or_else(|| "local-chat-model".into()),
            llm_embed_model: var("LMSTUDIO_EMBED_MODEL")
                .unwrap_or_else(|| "local-embed-model".into()),
            llm_timeout: Duration::from_secs(timeout_secs.clamp(10, 400)),
            llm_api_key: var("OPENAI_API_KEY"),

            rag_top_k: var("RAG_TOP_K").and_then(|v| v.parse().ok()).unwrap_or(6),
            rag_max_context_chars: var("RAG_MAX_CONTEXT_CHARS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(6000),

            app_tz,

            alert_cron_token: var("ALERT_CRON_TOKEN").unwrap_or_else(|| "change-me".into()),
            smtp_host: var("SMTP_HOST"),
            smtp_port: var("SMTP_PORT").and_then(|v| v.parse().ok()).unwrap_or(587),
            smtp_user: var("SMTP_USER"),
            smtp_pass: var("SMTP_PASS"),
            alert_email_from: var("ALERT_EMAIL_FROM"),
            alert_email_to: var("ALERT_EMAIL_TO"),
            alert_webhook_url: var("ALERT_WEBHOOK_URL"),
            alert_signing_secret: var("ALERT_SIGNING_SECRET"),
        }
    }

    /// Defaults suitable for tests: no LLM, no channels, permissive flags.
    pub fn for_tests() -> Self {
        Self {
            api_prefix: "/api/v1".into(),
            allowed_origins: vec![],
            database_url: None,
            jwt_secret: "test-secret".into(),
            access_minutes: 15,
            refresh_days: 7,
            chat_enabled: true,
            chat_llm_fallback_enabled: false,
            hybrid_chat_enabled: true,
            hybrid_router_embeddings_enabled: false,
            hybrid_router_llm_tiebreaker_enabled: false,
            llm_base_url: "http://127.0.0.1:9/v1".into(),
            llm_chat_model: "test-chat".into(),
            llm_embed_model: "test-embed".into(),
            llm_timeout: Duration::from_secs(10),
            llm_api_key: None,
            rag_top_k: 6,
            rag_max_context_chars: 6000,
            app_tz: chrono_tz::Asia::Singapore,
            alert_cron_token: "test-cron-token".into(),
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            alert_email_from: None,
            alert_email_to: None,
            alert_webhook_url: None,
            alert_signing_secret: None,
        }
    }
}
