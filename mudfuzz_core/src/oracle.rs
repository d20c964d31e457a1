use crate::config::{ConfigError, MudfuzzConfig};
use regex::Regex;

/// Examines decoded server text for login prompts and failure signatures.
///
/// All three patterns are compiled once, at startup; a malformed pattern is a
/// [`ConfigError::InvalidPattern`] naming the offending field.
#[derive(Debug, Clone)]
pub struct TextOracle {
    user_prompt: Regex,
    password_prompt: Regex,
    error_pattern: Regex,
}

fn compile(field: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern { field, source })
}

impl TextOracle {
    pub fn new(
        user_prompt: &str,
        password_prompt: &str,
        error_pattern: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            user_prompt: compile("user-prompt", user_prompt)?,
            password_prompt: compile("password-prompt", password_prompt)?,
            error_pattern: compile("error-pattern", error_pattern)?,
        })
    }

    pub fn from_config(config: &MudfuzzConfig) -> Result<Self, ConfigError> {
        Self::new(
            &config.login.user_prompt,
            &config.login.password_prompt,
            &config.detection.error_pattern,
        )
    }

    /// Unanchored search, so a signature anywhere in the text counts.
    pub fn detects_error(&self, text: &str) -> bool {
        self.error_pattern.is_match(text)
    }

    pub fn matches_user_prompt(&self, text: &str) -> bool {
        self.user_prompt.is_match(text)
    }

    pub fn matches_password_prompt(&self, text: &str) -> bool {
        self.password_prompt.is_match(text)
    }
}
