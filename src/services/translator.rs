use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, error};

use super::{check_status, ServiceError, HTTP_TIMEOUT};

const TRANSLATE_URL: &str = "https://translation.googleapis.com/language/translate/v2";

// Orden importa: menciones y emojis antes que los números que contienen
static PRESERVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"<@!?\d+>",
        r"|<a?:\w+:\d+>",
        r"|<#\d+>",
        r"|\$[A-Z]+",
        r"|-?\d+(?:\.\d+)?%",
        r"|-?\d+(?:\.\d+)?",
    ))
    .unwrap()
});

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__P(\d+)__").unwrap());

/// Texto con los elementos intraducibles sustituidos por marcadores
#[derive(Debug, PartialEq)]
struct Protected {
    text: String,
    originals: Vec<String>,
}

impl Protected {
    fn new(text: &str) -> Self {
        let mut originals = Vec::new();
        let text = PRESERVE
            .replace_all(text, |caps: &regex::Captures| {
                originals.push(caps[0].to_string());
                format!("__P{}__", originals.len() - 1)
            })
            .into_owned();
        Self { text, originals }
    }

    fn restore(&self, translated: &str) -> String {
        PLACEHOLDER
            .replace_all(translated, |caps: &regex::Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.originals.get(i))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'static str,
    target: &'static str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

/// Traductor español → inglés sobre Google Translate v2
pub struct Translator {
    client: reqwest::Client,
    api_key: String,
}

impl Translator {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client, api_key })
    }

    /// Traduce preservando símbolos bursátiles, cifras, menciones y emojis
    pub async fn translate(&self, text: &str) -> Result<String, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::EmptyText);
        }

        let protected = Protected::new(text);
        debug!("🌐 Traduciendo ({} elementos preservados)", protected.originals.len());

        let response = self
            .client
            .post(TRANSLATE_URL)
            .query(&[("key", &self.api_key)])
            .json(&TranslateRequest {
                q: &protected.text,
                source: "es",
                target: "en",
                format: "text",
            })
            .send()
            .await?;
        let response = match check_status(response).await {
            Ok(response) => response,
            Err(e) => {
                error!("❌ Translate API: {}", e);
                return Err(e);
            }
        };

        let body: TranslateResponse = response.json().await?;
        let translated = body
            .data
            .translations
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::InvalidResponse("sin traducciones".to_string()))?;

        Ok(protected.restore(&translated.translated_text))
    }
}
