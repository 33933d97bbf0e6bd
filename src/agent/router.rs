//! Classifies an utterance as `SQL` or `CHAT`. LLM-JSON first; on failure or
//! parse error, falls back to a domain-keyword regex.

use std::sync::LazyLock;

use regex::Regex;

use crate::llm::{self, LlmClient};

static DOMAIN_KEYWORDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(task|asset|user|facility|select|insert|update|create|add|edit|modify|show|list|count|get|find)\b",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Sql,
    Chat,
}

impl Route {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_uppercase().as_str() {
            "SQL" => Some(Route::Sql),
            "CHAT" => Some(Route::Chat),
            _ => None,
        }
    }
}

pub struct RouterService<'a> {
    llm: Option<&'a LlmClient>,
}

impl<'a> RouterService<'a> {
    pub fn new(llm: Option<&'a LlmClient>) -> Self {
        Self { llm }
    }

    /// Domain-keyword fallback used when the LLM is unavailable or its
    /// response doesn't parse as `{"route": "SQL"|"CHAT"}`.
    pub fn fallback(query: &str) -> Route {
        if DOMAIN_KEYWORDS_RE.is_match(query.trim()) {
            Route::Sql
        } else {
            Route::Chat
        }
    }

    pub async fn route(&self, query: &str) -> Route {
        let Some(llm) = self.llm else {
            return Self::fallback(query);
        };

        let prompt = format!(
            "Classify user message as SQL or CHAT.\n\
             Return only JSON: {{\"route\":\"SQL|CHAT\"}}\n\
             User: {query}"
        );

        let result = llm::complete_with_retry(
            llm,
            &prompt,
            2,
            0.3,
            |content| content.contains('{'),
            "v2_router",
        )
        .await;

        match result {
            Ok((content, _usage)) => llm::extract_json_object(&content)
                .and_then(|v| v.get("route").and_then(|r| r.as_str()).map(str::to_string))
                .and_then(|label| Route::from_label(&label))
                .unwrap_or_else(|| Self::fallback(query)),
            Err(_) => Self::fallback(query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_routes_domain_keywords_to_sql() {
        assert_eq!(RouterService::fallback("show task count"), Route::Sql);
        assert_eq!(RouterService::fallback("create a new asset"), Route::Sql);
        assert_eq!(RouterService::fallback("list facilities"), Route::Sql);
    }

    #[test]
    fn fallback_routes_everything_else_to_chat() {
        assert_eq!(RouterService::fallback("translate hello to french"), Route::Chat);
        assert_eq!(RouterService::fallback(""), Route::Chat);
    }

    #[tokio::test]
    async fn route_uses_fallback_when_no_llm_configured() {
        let router = RouterService::new(None);
        assert_eq!(router.route("show task count").await, Route::Sql);
        assert_eq!(router.route("what's the weather").await, Route::Chat);
    }
}
