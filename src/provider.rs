use std::str::FromStr;

use crate::chat_client::ChatError;

/// Chat-completion endpoints the assistant can relay to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Groq's OpenAI-compatible API. Also accepted under the older `grok` alias.
    Groq,
    /// Any OpenAI-compatible endpoint serving an open-weights model.
    Oss,
}

/// Where a provider's settings come from. Each list is in priority order; the
/// first variable holding a non-empty value wins.
#[derive(Debug)]
pub struct ProviderSpec {
    pub api_key_vars: &'static [&'static str],
    pub base_url_vars: &'static [&'static str],
    pub model_vars: &'static [&'static str],
    pub default_base_url: &'static str,
    pub default_model: &'static str,
    pub missing_key_message: &'static str,
}

const GROQ: ProviderSpec = ProviderSpec {
    api_key_vars: &["GROQ_API_KEY", "GROK_API_KEY"],
    base_url_vars: &["GROQ_BASE_URL", "GROK_BASE_URL"],
    model_vars: &["GROQ_MODEL", "GROK_MODEL"],
    default_base_url: "https://api.groq.com/openai/v1",
    default_model: "llama-3.1-70b-versatile",
    missing_key_message: "GROQ_API_KEY is not set",
};

const OSS: ProviderSpec = ProviderSpec {
    api_key_vars: &["OSS_API_KEY", "OPENAI_API_KEY"],
    base_url_vars: &["OSS_BASE_URL"],
    model_vars: &["OSS_MODEL"],
    default_base_url: "https://api.openai.com/v1",
    default_model: "gpt-oss-120b",
    missing_key_message: "OSS_API_KEY (or OPENAI_API_KEY) is not set",
};

/// Fully resolved connection settings for one request.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl FromStr for Provider {
    type Err = ChatError;

    fn from_str(alias: &str) -> Result<Self, Self::Err> {
        match alias {
            "groq" | "grok" => Ok(Provider::Groq),
            "oss" => Ok(Provider::Oss),
            other => Err(ChatError::Config(format!("Unknown provider: {other}"))),
        }
    }
}

fn first_set(vars: &[&str], lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    vars.iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.is_empty())
}

impl Provider {
    pub fn spec(self) -> &'static ProviderSpec {
        match self {
            Provider::Groq => &GROQ,
            Provider::Oss => &OSS,
        }
    }

    pub fn resolve(
        self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<ProviderSettings, ChatError> {
        let spec = self.spec();
        let api_key = first_set(spec.api_key_vars, lookup)
            .ok_or_else(|| ChatError::Config(spec.missing_key_message.to_string()))?;
        let base_url = first_set(spec.base_url_vars, lookup)
            .unwrap_or_else(|| spec.default_base_url.to_string());
        let model =
            first_set(spec.model_vars, lookup).unwrap_or_else(|| spec.default_model.to_string());

        Ok(ProviderSettings {
            api_key,
            base_url,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn aliases() {
        assert_eq!("groq".parse::<Provider>().unwrap(), Provider::Groq);
        assert_eq!("grok".parse::<Provider>().unwrap(), Provider::Groq);
        assert_eq!("oss".parse::<Provider>().unwrap(), Provider::Oss);

        let err = "unknown".parse::<Provider>().unwrap_err();
        assert!(matches!(err, ChatError::Config(ref m) if m == "Unknown provider: unknown"));
    }

    #[test]
    fn groq_defaults() {
        let settings = Provider::Groq
            .resolve(&env(&[("GROQ_API_KEY", "gsk-1")]))
            .unwrap();
        assert_eq!(settings.api_key, "gsk-1");
        assert_eq!(settings.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(settings.model, "llama-3.1-70b-versatile");
    }

    #[test]
    fn legacy_alias_vars_and_empty_values() {
        let settings = Provider::Groq
            .resolve(&env(&[
                ("GROQ_API_KEY", ""),
                ("GROK_API_KEY", "legacy"),
                ("GROK_BASE_URL", "http://localhost:9000/v1"),
                ("GROQ_MODEL", "llama-3.3-70b"),
                ("GROK_MODEL", "ignored"),
            ]))
            .unwrap();
        assert_eq!(settings.api_key, "legacy");
        assert_eq!(settings.base_url, "http://localhost:9000/v1");
        assert_eq!(settings.model, "llama-3.3-70b");
    }

    #[test]
    fn oss_falls_back_to_openai_key() {
        let settings = Provider::Oss
            .resolve(&env(&[("OPENAI_API_KEY", "sk-2"), ("OSS_MODEL", "qwen")]))
            .unwrap();
        assert_eq!(settings.api_key, "sk-2");
        assert_eq!(settings.base_url, "https://api.openai.com/v1");
        assert_eq!(settings.model, "qwen");
    }

    #[test]
    fn missing_credentials_name_the_variable() {
        let err = Provider::Groq.resolve(&env(&[])).unwrap_err();
        assert!(matches!(err, ChatError::Config(ref m) if m == "GROQ_API_KEY is not set"));

        let err = Provider::Oss.resolve(&env(&[])).unwrap_err();
        assert!(
            matches!(err, ChatError::Config(ref m) if m == "OSS_API_KEY (or OPENAI_API_KEY) is not set")
        );
    }

    #[test]
    fn debug_hides_api_key() {
        let settings = Provider::Oss.resolve(&env(&[("OSS_API_KEY", "secret")])).unwrap();
        assert!(!format!("{settings:?}").contains("secret"));
    }
}
