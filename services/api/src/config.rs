use secrecy::SecretString;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use url::Url;
use voicerag_core::{MaxOutputTokens, ModelFamily, SessionPolicy, VadProfile};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to read {0}: {1}")]
    Unreadable(PathBuf, std::io::Error),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub model_family: ModelFamily,
    pub endpoint: Url,
    pub deployment: String,
    pub api_version: String,
    /// Static upstream key. When absent, a bearer token is minted instead.
    pub api_key: Option<SecretString>,
    pub tenant_id: Option<String>,
    pub voice_choice: Option<String>,
    pub transcription_model: String,
    pub vad: VadProfile,
    pub temperature: Option<f64>,
    pub max_tokens: Option<MaxOutputTokens>,
    pub disable_audio: Option<bool>,
    pub custom_language: Option<String>,
    pub prompts_path: PathBuf,
    pub tools_path: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub token_refresh: Duration,
    pub log_level: Level,
}

const DEFAULT_API_VERSION: &str = "2024-10-01-preview";

/// Reads a variable, treating an empty value as unset.
fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    var(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parsed<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
        })
        .transpose()
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Variable names for the endpoint, key, API version and voice depend on
    /// `VOICE_MODEL_TYPE`, matching the two supported upstream families.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parsed::<SocketAddr>("BIND_ADDRESS")?
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8765)));

        let model_family =
            parsed::<ModelFamily>("VOICE_MODEL_TYPE")?.unwrap_or(ModelFamily::AoaiRealtime);
        let (endpoint_var, key_var, version_var, voice_var) = match model_family {
            ModelFamily::AoaiRealtime => (
                "AZURE_OPENAI_ENDPOINT",
                "AZURE_OPENAI_API_KEY",
                "AZURE_OPENAI_API_VERSION",
                "AZURE_OPENAI_REALTIME_VOICE_CHOICE",
            ),
            ModelFamily::VoiceAgent => (
                "AZURE_VOICEAGENT_ENDPOINT",
                "AZURE_VOICEAGENT_API_KEY",
                "AZURE_VOICEAGENT_API_VERSION",
                "AZURE_VOICEAGENT_VOICE_CHOICE",
            ),
        };

        let endpoint = Url::parse(&required(endpoint_var)?)
            .map_err(|e| ConfigError::InvalidValue(endpoint_var.to_string(), e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::InvalidValue(
                endpoint_var.to_string(),
                format!("unsupported scheme '{}'", endpoint.scheme()),
            ));
        }

        let deployment = required("AZURE_OPENAI_REALTIME_DEPLOYMENT")?;
        let api_version = var(version_var).unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
        let api_key = var(key_var).map(SecretString::from);

        let transcription_model =
            var("INPUT_AUDIO_TRANSCRIPTION").unwrap_or_else(|| "whisper-1".to_string());
        let vad = parsed::<VadProfile>("VAD_TYPE")?.unwrap_or_else(VadProfile::server);

        let token_refresh = Duration::from_secs(
            parsed::<u64>("TOKEN_REFRESH_SECS")?
                .filter(|secs| *secs > 0)
                .unwrap_or(1800),
        );

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            model_family,
            endpoint,
            deployment,
            api_version,
            api_key,
            tenant_id: var("AZURE_TENANT_ID"),
            voice_choice: var(voice_var),
            transcription_model,
            vad,
            temperature: parsed("REALTIME_TEMPERATURE")?,
            max_tokens: parsed("REALTIME_MAX_TOKENS")?,
            disable_audio: parsed("REALTIME_DISABLE_AUDIO")?,
            custom_language: var("CUSTOM_LANGUAGE"),
            prompts_path: var("PROMPTS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./prompts")),
            tools_path: var("TOOLS_PATH").map(PathBuf::from),
            static_dir: var("STATIC_DIR").map(PathBuf::from),
            token_refresh,
            log_level,
        })
    }

    /// Builds the server-enforced session policy around the given prompt.
    pub fn session_policy(&self, instructions: String) -> SessionPolicy {
        let mut policy = SessionPolicy::new(self.model_family, self.vad.clone())
            .with_instructions(instructions)
            .with_transcription_model(self.transcription_model.clone());
        policy.temperature = self.temperature;
        policy.max_output_tokens = self.max_tokens;
        policy.disable_audio = self.disable_audio;
        policy.voice = self.voice_choice.clone();
        policy
    }
}

const ASSISTANT_INTRO: &str = "You are a helpful assistant.";

/// Loads `system_prompt.md` from the prompts directory, optionally asking the
/// assistant to answer in a specific language.
pub fn load_system_prompt(
    prompts_path: &Path,
    custom_language: Option<&str>,
) -> Result<String, ConfigError> {
    let path = prompts_path.join("system_prompt.md");
    let prompt = std::fs::read_to_string(&path).map_err(|e| ConfigError::Unreadable(path, e))?;
    let prompt = prompt.trim().to_string();
    Ok(match custom_language {
        Some(language) => prompt.replacen(
            ASSISTANT_INTRO,
            &format!("You are a helpful assistant that speaks in {language}."),
            1,
        ),
        None => prompt,
    })
}
