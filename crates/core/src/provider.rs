#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Missing API key for {provider_name}")]
    MissingApiKey { provider_name: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Nvidia,
    Openai,
    Gemini,
    Grok,
}

pub struct ProviderConfig {
    pub api_url: &'static str,
    pub model: &'static str,
    pub env_var: &'static str,
    /// Images accepted in a single chat request.
    pub max_images_per_request: usize,
}

impl Provider {
    pub fn config(&self) -> ProviderConfig {
        match self {
            Provider::Nvidia => ProviderConfig {
                api_url: "https://integrate.api.nvidia.com/v1/chat/completions",
                model: "nvidia/nemotron-nano-12b-v2-vl",
                env_var: "NVIDIA_API_KEY",
                max_images_per_request: 5,
            },
            Provider::Openai => ProviderConfig {
                api_url: "https://api.openai.com/v1/chat/completions",
                model: "gpt-4.1-mini",
                env_var: "OPENAI_API_KEY",
                max_images_per_request: 10,
            },
            Provider::Gemini => ProviderConfig {
                api_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
                model: "gemini-2.5-flash",
                env_var: "GEMINI_API_KEY",
                max_images_per_request: 10,
            },
            Provider::Grok => ProviderConfig {
                api_url: "https://api.x.ai/v1/chat/completions",
                model: "grok-4-fast",
                env_var: "XAI_API_KEY",
                max_images_per_request: 10,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Nvidia => "NVIDIA",
            Provider::Openai => "OpenAI",
            Provider::Gemini => "Gemini",
            Provider::Grok => "Grok",
        }
    }

    /// Short lowercase name used in cache file names.
    pub fn slug(&self) -> &'static str {
        match self {
            Provider::Nvidia => "nvidia",
            Provider::Openai => "openai",
            Provider::Gemini => "gemini",
            Provider::Grok => "grok",
        }
    }

    /// Validate that the API key is set for this provider
    pub fn validate_api_key(&self) -> Result<String, ProviderError> {
        let config = self.config();
        std::env::var(config.env_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey {
                provider_name: self.name().to_string(),
            })
    }
}
