use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    batching::TokenBudget,
    control::RATE_LIMIT_DELAY,
    error::ConfigError,
    prompts::{DEFAULT_CONTEXT, DEFAULT_STYLE, FieldMap, Languages, PromptSettings},
    translators::{SafetySetting, unblocked_safety_settings},
};

const GEMINI_FLASH_THINKING_LIMIT: i64 = 24_576;
const GEMINI_PRO_THINKING_LIMIT: i64 = 32_768;

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub translation: TranslationConfig,
    pub tokens: TokenConfig,
    pub project: ProjectConfig,
}

#[derive(Deserialize, Debug)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Send the Gemini thinking budget extension.
    #[serde(default = "default_true")]
    pub thinking_config: bool,
    /// Gemini safety thresholds; `safety_settings = []` sends none.
    #[serde(default = "unblocked_safety_settings")]
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Deserialize, Debug)]
pub struct TranslationConfig {
    pub source_language: String,
    pub source_header: String,
    pub target_language: String,
    pub target_header: String,
    #[serde(default)]
    pub dictionary_file: Option<PathBuf>,
}

#[derive(Deserialize, Debug)]
pub struct TokenConfig {
    pub output_tokens: i64,
    pub token_factor: f64,
    pub thinking_tokens: i64,
}

#[derive(Deserialize, Debug)]
pub struct ProjectConfig {
    pub input_file: PathBuf,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
}

fn default_request_timeout_secs() -> u64 {
    30 * 60
}

fn default_rate_limit_delay_ms() -> u64 {
    RATE_LIMIT_DELAY.as_millis() as u64
}

fn default_true() -> bool {
    true
}

/// Everything one run needs, checked and fixed before the run starts.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub input_file: PathBuf,
    pub prompt: PromptSettings,
    pub budget: TokenBudget,
    pub rate_limit: Duration,
    /// When false, no backup is taken and the table is never written.
    pub write_back: bool,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.request_timeout_secs)
    }

    /// Checks every setting and reports all problems at once. Relative paths are
    /// taken from `base_dir`.
    pub fn to_settings(&self, base_dir: &Path) -> Result<RunSettings, ConfigError> {
        let mut errors = Vec::new();

        let input_file = base_dir.join(&self.project.input_file);
        if !input_file.is_file() {
            errors.push(format!(
                "Error: Please select a valid CSV file ('{}' not found).",
                input_file.display()
            ));
        }

        if self.llm.api_key.trim().is_empty() {
            errors.push("Error: Please specify an API key.".to_string());
        }
        if self.llm.model.trim().is_empty() {
            errors.push("Error: Please specify a model name.".to_string());
        }

        let budget = self.validate_tokens(&mut errors);

        let t = &self.translation;
        for (value, what) in [
            (&t.source_language, "source language"),
            (&t.source_header, "source header"),
            (&t.target_language, "target language"),
            (&t.target_header, "target header"),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("Error: Please specify a {}.", what));
            }
        }
        if t.source_header.trim().eq_ignore_ascii_case(t.target_header.trim()) {
            errors.push("Error: Source and target header must be different.".to_string());
        }

        let dictionary = match &t.dictionary_file {
            Some(path) => {
                let path = base_dir.join(path);
                match fs::read_to_string(&path) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        errors.push(format!(
                            "Error: Cannot read dictionary file '{}': {}",
                            path.display(),
                            e
                        ));
                        None
                    }
                }
            }
            None => None,
        };

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }
        let Some(budget) = budget else {
            return Err(ConfigError::Invalid(vec![
                "Error: Invalid token settings.".to_string(),
            ]));
        };

        Ok(RunSettings {
            input_file,
            prompt: PromptSettings {
                languages: Languages {
                    source: t.source_language.trim().to_string(),
                    target: t.target_language.trim().to_string(),
                },
                fields: FieldMap::new(t.source_header.trim(), t.target_header.trim()),
                context: self
                    .project
                    .context
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONTEXT.to_string()),
                style: self
                    .project
                    .style
                    .clone()
                    .unwrap_or_else(|| DEFAULT_STYLE.to_string()),
                dictionary,
            },
            budget,
            rate_limit: Duration::from_millis(self.project.rate_limit_delay_ms),
            write_back: true,
        })
    }

    fn validate_tokens(&self, errors: &mut Vec<String>) -> Option<TokenBudget> {
        let TokenConfig {
            output_tokens,
            token_factor,
            thinking_tokens,
        } = self.tokens;
        let before = errors.len();

        let output = u32::try_from(output_tokens).ok().filter(|n| *n > 0);
        if output.is_none() {
            errors.push("Error: Please specify a positive integer output token size.".to_string());
        }

        if !(token_factor.is_finite() && token_factor > 0.0) {
            errors.push("Error: Please specify a positive token factor.".to_string());
        }

        let model = self.llm.model.trim().to_lowercase();
        if thinking_tokens < 0 {
            errors.push(
                "Error: Please specify a non-negative integer thinking token size.".to_string(),
            );
        } else if thinking_tokens >= output_tokens {
            errors.push(
                "Error: The output token size must be greater than the thinking token size."
                    .to_string(),
            );
        } else if thinking_tokens > GEMINI_FLASH_THINKING_LIMIT
            && model.starts_with("gemini-2.5-flash")
        {
            errors.push(format!(
                "Error: Gemini 2.5 Flash is limited to {} thinking tokens!",
                GEMINI_FLASH_THINKING_LIMIT
            ));
        } else if thinking_tokens > GEMINI_PRO_THINKING_LIMIT && model == "gemini-2.5-pro" {
            errors.push(format!(
                "Error: Gemini 2.5 Pro is limited to {} thinking tokens!",
                GEMINI_PRO_THINKING_LIMIT
            ));
        }

        if errors.len() != before {
            return None;
        }

        Some(TokenBudget {
            output_tokens: output?,
            token_factor,
            thinking_tokens: u32::try_from(thinking_tokens).ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[llm]
api_base = "https://generativelanguage.googleapis.com/v1beta/openai/"
api_key = "secret"
model = "gemini-2.5-flash"

[translation]
source_language = "German"
source_header = "DE"
target_language = "English"
target_header = "EN"

[tokens]
output_tokens = 65536
token_factor = 0.4
thinking_tokens = 1024

[project]
input_file = "dialogues.csv"
"#;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dialogues.csv"), "NR\tDE\tEN\n").unwrap();
        dir
    }

    fn invalid(config: &AppConfig, dir: &Path) -> Vec<String> {
        match config.to_settings(dir) {
            Err(ConfigError::Invalid(errors)) => errors,
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn valid_config_produces_settings() {
        let dir = workspace();
        let config = AppConfig::parse(VALID).unwrap();

        let settings = config.to_settings(dir.path()).unwrap();

        assert_eq!(settings.input_file, dir.path().join("dialogues.csv"));
        assert_eq!(settings.prompt.fields, FieldMap::new("DE", "EN"));
        assert_eq!(settings.budget.available(), 65536 - 1024);
        assert_eq!(settings.rate_limit, Duration::from_millis(1000));
        assert_eq!(settings.prompt.context, DEFAULT_CONTEXT);
        assert!(settings.prompt.dictionary.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(1800));
        assert!(config.llm.thinking_config);
        assert_eq!(config.llm.safety_settings, unblocked_safety_settings());
    }

    #[test]
    fn safety_settings_can_be_overridden_or_cleared() {
        let custom = VALID.replace(
            "model = \"gemini-2.5-flash\"\n",
            "model = \"gemini-2.5-flash\"\n\n[[llm.safety_settings]]\ncategory = \"HARM_CATEGORY_HARASSMENT\"\nthreshold = \"BLOCK_ONLY_HIGH\"\n",
        );
        let config = AppConfig::parse(&custom).unwrap();
        assert_eq!(
            config.llm.safety_settings,
            vec![SafetySetting {
                category: "HARM_CATEGORY_HARASSMENT".into(),
                threshold: "BLOCK_ONLY_HIGH".into(),
            }]
        );

        let cleared = VALID.replace(
            "model = \"gemini-2.5-flash\"\n",
            "model = \"gemini-2.5-flash\"\nsafety_settings = []\n",
        );
        let config = AppConfig::parse(&cleared).unwrap();
        assert!(config.llm.safety_settings.is_empty());
    }

    #[test]
    fn dictionary_is_read_relative_to_base_dir() {
        let dir = workspace();
        fs::write(dir.path().join("glossary.txt"), "Buddler = digger").unwrap();
        let mut config = AppConfig::parse(VALID).unwrap();
        config.translation.dictionary_file = Some("glossary.txt".into());

        let settings = config.to_settings(dir.path()).unwrap();

        assert_eq!(
            settings.prompt.dictionary.as_deref(),
            Some("Buddler = digger")
        );
    }

    #[test]
    fn collects_every_problem() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::parse(VALID).unwrap();
        config.llm.api_key = " ".into();
        config.tokens.token_factor = 0.0;
        config.translation.target_header = "de".into();
        config.translation.dictionary_file = Some("missing.txt".into());

        let errors = invalid(&config, dir.path());

        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors[0].contains("valid CSV file"));
        assert!(errors.iter().any(|e| e.contains("API key")));
        assert!(errors.iter().any(|e| e.contains("token factor")));
        assert!(errors.iter().any(|e| e.contains("must be different")));
        assert!(errors.iter().any(|e| e.contains("dictionary")));
    }

    #[test]
    fn thinking_tokens_must_stay_below_output_tokens() {
        let dir = workspace();
        let mut config = AppConfig::parse(VALID).unwrap();
        config.tokens.output_tokens = 1000;
        config.tokens.thinking_tokens = 1000;

        let errors = invalid(&config, dir.path());
        assert!(errors[0].contains("greater than the thinking token size"));

        config.tokens.thinking_tokens = -1;
        let errors = invalid(&config, dir.path());
        assert!(errors[0].contains("non-negative"));
    }

    #[test]
    fn output_tokens_must_be_positive() {
        let dir = workspace();
        let mut config = AppConfig::parse(VALID).unwrap();
        config.tokens.output_tokens = 0;
        config.tokens.thinking_tokens = 0;

        let errors = invalid(&config, dir.path());
        assert!(errors.iter().any(|e| e.contains("positive integer output")));
    }

    #[test]
    fn gemini_thinking_limits() {
        let dir = workspace();
        let mut config = AppConfig::parse(VALID).unwrap();
        config.tokens.thinking_tokens = 30_000;

        let errors = invalid(&config, dir.path());
        assert!(errors[0].contains("Flash is limited to 24576"));

        config.llm.model = "gemini-2.5-pro".into();
        assert!(config.to_settings(dir.path()).is_ok());

        config.tokens.thinking_tokens = 40_000;
        let errors = invalid(&config, dir.path());
        assert!(errors[0].contains("Pro is limited to 32768"));
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let err = AppConfig::parse("[llm]\napi_base = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
