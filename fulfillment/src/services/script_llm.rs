// fulfillment/src/services/script_llm.rs

//! Script generation: prompt templating and the chat-completions client.

use crate::config::LlmConfig;
use crate::errors::ProviderError;
use crate::models::{BehaviorCategory, ChildGender, ChildProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

const PROVIDER: &str = "language model";

/// Spoken words per minute the avatar voice averages.
pub const WORDS_PER_MINUTE: u32 = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPrompt {
  pub system: String,
  pub user: String,
  pub word_target: u32,
}

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
  /// Returns the trimmed script text.
  async fn generate_script(&self, prompt: &ScriptPrompt) -> Result<String, ProviderError>;
}

pub fn word_target(target_duration_secs: u32) -> u32 {
  (target_duration_secs * WORDS_PER_MINUTE / 60).max(1)
}

fn tone_for(behavior: BehaviorCategory) -> &'static str {
  match behavior {
    BehaviorCategory::Nice => "warm and proud, celebrating a wonderful year",
    BehaviorCategory::MostlyNice => "warm and cheerful, with a gentle nudge to keep up the good work",
    BehaviorCategory::Improving => "encouraging, praising the progress made and believing in even better days ahead",
    BehaviorCategory::Mischievous => {
      "playful and kind, with a light-hearted reminder that Santa knows about the mischief and still believes in them"
    }
  }
}

fn pronoun(gender: ChildGender) -> &'static str {
  match gender {
    ChildGender::Boy => "he",
    ChildGender::Girl => "she",
    ChildGender::Unspecified => "they",
  }
}

pub fn build_prompt(child: &ChildProfile, target_duration_secs: u32) -> ScriptPrompt {
  let word_target = word_target(target_duration_secs);
  let system = "You are Santa Claus recording a short personal video message for a child. \
                Write only the words Santa speaks: no stage directions, no emojis, no headings."
    .to_string();

  let mut user = format!(
    "Write a Santa video message of about {} words (roughly {} seconds spoken).\n\
     Greet the child by name: {}. {} is {} years old.\n\
     Tone: {}.\n",
    word_target,
    target_duration_secs,
    child.name.trim(),
    capitalize(pronoun(child.gender)),
    child.age,
    tone_for(child.behavior),
  );
  if !child.achievements.trim().is_empty() {
    user.push_str(&format!("Mention these achievements: {}\n", child.achievements.trim()));
  }
  if !child.preferences.trim().is_empty() {
    user.push_str(&format!("Reference these favourite things: {}\n", child.preferences.trim()));
  }
  user.push_str("End with a warm Christmas wish.");

  ScriptPrompt {
    system,
    user,
    word_target,
  }
}

fn capitalize(word: &str) -> String {
  let mut chars = word.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  temperature: f32,
  max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
  content: Option<String>,
}

/// OpenAI-compatible `POST {api_base}/chat/completions` client.
pub struct OpenAiScriptClient {
  http: reqwest::Client,
  config: LlmConfig,
}

impl OpenAiScriptClient {
  pub fn new(http: reqwest::Client, config: LlmConfig) -> Self {
    Self { http, config }
  }
}

#[async_trait]
impl ScriptGenerator for OpenAiScriptClient {
  #[instrument(name = "script_llm::generate_script", skip_all, fields(model = %self.config.model, word_target = prompt.word_target), err(Display))]
  async fn generate_script(&self, prompt: &ScriptPrompt) -> Result<String, ProviderError> {
    let body = ChatRequest {
      model: &self.config.model,
      messages: vec![
        ChatMessage {
          role: "system",
          content: &prompt.system,
        },
        ChatMessage {
          role: "user",
          content: &prompt.user,
        },
      ],
      temperature: 0.8,
      max_tokens: prompt.word_target * 3,
    };

    let response = self
      .http
      .post(format!("{}/chat/completions", self.config.api_base.trim_end_matches('/')))
      .bearer_auth(&self.config.api_key)
      .json(&body)
      .send()
      .await
      .map_err(ProviderError::transport(PROVIDER))?;

    let status = response.status();
    if !status.is_success() {
      let detail = response.text().await.unwrap_or_default();
      return Err(ProviderError::Rejected {
        provider: PROVIDER,
        detail: format!("HTTP {}: {}", status, detail),
      });
    }

    let parsed: ChatResponse = response.json().await.map_err(|e| ProviderError::InvalidResponse {
      provider: PROVIDER,
      detail: e.to_string(),
    })?;
    let script = parsed
      .choices
      .into_iter()
      .next()
      .and_then(|choice| choice.message.content)
      .map(|content| content.trim().to_string())
      .unwrap_or_default();

    if script.is_empty() {
      return Err(ProviderError::EmptyScript);
    }
    debug!(words = script.split_whitespace().count(), "Script received.");
    info!("Script generated.");
    Ok(script)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn child(behavior: BehaviorCategory) -> ChildProfile {
    ChildProfile {
      name: " Emma ".to_string(),
      age: 7,
      gender: ChildGender::Girl,
      achievements: "learned to ride a bike".to_string(),
      preferences: "unicorns and hot chocolate".to_string(),
      behavior,
    }
  }

  #[test]
  fn word_target_scales_with_duration() {
    assert_eq!(word_target(60), 150);
    assert_eq!(word_target(30), 75);
    assert_eq!(word_target(90), 225);
  }

  #[test]
  fn prompt_greets_child_and_mentions_details() {
    let prompt = build_prompt(&child(BehaviorCategory::Nice), 60);
    assert_eq!(prompt.word_target, 150);
    assert!(prompt.user.contains("by name: Emma."));
    assert!(prompt.user.contains("She is 7 years old"));
    assert!(prompt.user.contains("learned to ride a bike"));
    assert!(prompt.user.contains("unicorns and hot chocolate"));
    assert!(prompt.user.contains("about 150 words"));
  }

  #[test]
  fn tone_follows_behavior_category() {
    let nice = build_prompt(&child(BehaviorCategory::Nice), 60);
    let cheeky = build_prompt(&child(BehaviorCategory::Mischievous), 60);
    assert!(nice.user.contains("celebrating a wonderful year"));
    assert!(cheeky.user.contains("knows about the mischief"));
  }

  #[test]
  fn empty_details_are_left_out() {
    let mut profile = child(BehaviorCategory::Improving);
    profile.achievements = "  ".to_string();
    profile.preferences.clear();
    let prompt = build_prompt(&profile, 60);
    assert!(!prompt.user.contains("achievements"));
    assert!(!prompt.user.contains("favourite things"));
  }
}
