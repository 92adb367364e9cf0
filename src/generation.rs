//! Answer generation clients.
//!
//! An [`AnswerGenerator`] turns a question plus an assembled context into a
//! natural-language answer. Implementations:
//! - **[`DisabledGenerator`]**: reports unavailable; `vrag ask --context-only`
//!   and the search endpoints keep working without a model.
//! - **[`OllamaGenerator`]**: local Ollama, `POST /api/generate`.
//! - **[`GroqGenerator`]**: Groq's OpenAI-compatible chat completions API.
//!
//! Both prompts are built here. The system prompt carries today's date so the
//! model can tell scheduled fixtures from played ones.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// `false` only for the disabled placeholder.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Cheap reachability probe; never errors.
    async fn is_available(&self) -> bool;

    async fn generate(
        &self,
        question: &str,
        context: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String>;
}

/// Today's date as dd/mm/yyyy.
pub fn today() -> String {
    chrono::Local::now().format("%d/%m/%Y").to_string()
}

pub fn system_prompt(today: &str) -> String {
    format!(
        "You are a volleyball statistics assistant for RM Volley, a local club \
with several teams split by age division.

TODAY: {today}

Past and future:
- A match whose status is \"to be played\" is in the future and has NOT been played yet.
- A match with a final result (e.g. 3-1) has already been played.
- Never invent results for future matches.
- For \"last match\" or \"how did it go\" questions use only matches that have a result.
- For \"next match\" questions use only matches still to be played.

Teams are different and must never be mixed:
- \"RM VOLLEY PIACENZA\" is the senior women's team (Serie D).
- \"RMVOLLEY#18\" is Under 18 women, \"RMVOLLEY#16\" Under 16 women.
- \"RMVOLLEY#14\" (also #13, #15) are the Under 14 women's teams.
- \"RMVOLLEY#2\" is the Second Division women's team.
Always check that the team in the context is the team the user asked about.

Rules:
- Answer only from the provided context. Never make up data.
- Be specific with numbers, dates, team names and scores.
- If the context has nothing about the requested team, say so plainly.
- You cannot predict who will win a future match. If asked, say that you can \
only provide past statistics and upcoming fixtures.
- Answer in the language of the question, concisely."
    )
}

pub fn user_prompt(question: &str, context: &str) -> String {
    format!(
        "Context from the database:
{context}

User question: {question}

Standings:
- If the context contains a table, keep its exact order. Position 1 is first place.
- Do not reorder teams by name. RM Volley may not be first; report the real position.

Matches:
1. For \"next match\" answer with the FIRST match listed: it is the nearest one.
2. For \"last match\" answer with the FIRST match with a result: it is the most recent.
3. Do not confuse RM VOLLEY PIACENZA (Serie D) with RMVOLLEY#18 (Under 18).

Answer by copying the data faithfully from the context:"
    )
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl AnswerGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn generate(&self, _: &str, _: &str, _: f32, _: u32) -> Result<String> {
        bail!("Answer generation is disabled. Set [generation] provider in config.")
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "llama3.2:3b".to_string());
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(
        &self,
        question: &str,
        context: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": user_prompt(question, context),
            "system": system_prompt(&today()),
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_output_tokens,
            }
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(json
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

// ============ Groq ============

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";

pub struct GroqGenerator {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GroqGenerator {
    /// # Errors
    ///
    /// Returns an error if `GROQ_API_KEY` is not in the environment.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("GROQ_API_KEY")
            .map_err(|_| anyhow!("GROQ_API_KEY environment variable not set"))?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "llama-3.3-70b-versatile".to_string());
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| GROQ_API_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl AnswerGenerator for GroqGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/models", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(
        &self,
        question: &str,
        context: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt(&today())},
                {"role": "user", "content": user_prompt(question, context)},
            ],
            "temperature": temperature,
            "max_tokens": max_output_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Groq request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            match status.as_u16() {
                401 => bail!("Invalid Groq API key"),
                429 => bail!("Groq rate limit exceeded. Please wait and try again."),
                _ => bail!("Groq API error {}: {}", status, text),
            }
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_completion(&json)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid chat completion response: missing choices[0].message.content"))
}

/// | Config Value | Generator |
/// |-------------|-----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"ollama"` | [`OllamaGenerator`] |
/// | `"groq"` | [`GroqGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "groq" => Ok(Arc::new(GroqGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_prompt_carries_date() {
        let prompt = system_prompt("17/10/2026");
        assert!(prompt.contains("TODAY: 17/10/2026"));
        assert!(prompt.contains("to be played"));
    }

    #[test]
    fn test_user_prompt_embeds_context_before_question() {
        let prompt = user_prompt("who leads?", "[Standing 1] table");
        let ctx = prompt.find("[Standing 1] table").unwrap();
        let q = prompt.find("who leads?").unwrap();
        assert!(ctx < q);
    }

    #[test]
    fn test_today_format() {
        let t = today();
        assert_eq!(t.len(), 10);
        assert_eq!(&t[2..3], "/");
        assert_eq!(&t[5..6], "/");
    }

    #[test]
    fn test_parse_chat_completion() {
        let ok = json!({"choices": [{"message": {"content": "3-1 win"}}]});
        assert_eq!(parse_chat_completion(&ok).unwrap(), "3-1 win");
        assert!(parse_chat_completion(&json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_generator() {
        let g = create_generator(&GenerationConfig::default()).unwrap();
        assert!(!g.is_enabled());
        assert!(!g.is_available().await);
        assert!(g.generate("q", "c", 0.5, 10).await.is_err());
    }
}
