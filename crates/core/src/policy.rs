//! Server-enforced session configuration.
//!
//! Whatever the client asks for in `session.update`, the fields set here win.
//! A [`SessionPolicy`] is built once at startup and shared read-only by every
//! relay session.

use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Upstream backend family. It decides the realtime path and how the voice
/// selector is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Azure OpenAI realtime: voice is a plain string.
    AoaiRealtime,
    /// Voice agent realtime: voice is a `{name, type}` object.
    VoiceAgent,
}

impl ModelFamily {
    pub fn upstream_path(self) -> &'static str {
        match self {
            Self::AoaiRealtime => "/openai/realtime",
            Self::VoiceAgent => "/voice-agent/realtime",
        }
    }

    pub fn voice_value(self, voice: &str) -> Value {
        match self {
            Self::AoaiRealtime => Value::String(voice.to_string()),
            Self::VoiceAgent => json!({ "name": voice, "type": "azure-standard" }),
        }
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aoai_realtime" => Ok(Self::AoaiRealtime),
            "voice_agent_realtime" => Ok(Self::VoiceAgent),
            other => Err(format!(
                "'{other}' is not one of 'aoai_realtime', 'voice_agent_realtime'"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Eagerness {
    Low,
    Medium,
    High,
    Auto,
}

/// Turn-detection configuration sent as `session.turn_detection`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VadProfile {
    ServerVad {
        threshold: f64,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
        create_response: bool,
    },
    SemanticVad {
        eagerness: Eagerness,
        create_response: bool,
    },
}

impl VadProfile {
    pub fn server() -> Self {
        Self::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        }
    }

    pub fn semantic() -> Self {
        Self::SemanticVad {
            eagerness: Eagerness::Auto,
            create_response: true,
        }
    }
}

impl FromStr for VadProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server_vad" => Ok(Self::server()),
            "semantic_vad" => Ok(Self::semantic()),
            other => Err(format!(
                "'{other}' is not one of 'server_vad', 'semantic_vad'"
            )),
        }
    }
}

/// `max_response_output_tokens`: a positive cap or `"inf"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOutputTokens {
    Limited(NonZeroU32),
    Infinite,
}

impl Serialize for MaxOutputTokens {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limited(n) => serializer.serialize_u32(n.get()),
            Self::Infinite => serializer.serialize_str("inf"),
        }
    }
}

impl FromStr for MaxOutputTokens {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("inf") {
            return Ok(Self::Infinite);
        }
        s.parse::<NonZeroU32>()
            .map(Self::Limited)
            .map_err(|e| format!("'{s}' is neither a positive token count nor 'inf': {e}"))
    }
}

impl fmt::Display for MaxOutputTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{n}"),
            Self::Infinite => f.write_str("inf"),
        }
    }
}

/// Server-side overrides applied to every session.
///
/// Unset optional fields leave the client's value alone. The VAD profile and
/// model family are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub instructions: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<MaxOutputTokens>,
    pub disable_audio: Option<bool>,
    pub voice: Option<String>,
    pub transcription_model: Option<String>,
    pub turn_detection: VadProfile,
    pub family: ModelFamily,
}

impl SessionPolicy {
    pub fn new(family: ModelFamily, turn_detection: VadProfile) -> Self {
        Self {
            instructions: None,
            temperature: None,
            max_output_tokens: None,
            disable_audio: None,
            voice: None,
            transcription_model: None,
            turn_detection,
            family,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max: MaxOutputTokens) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    pub fn with_disable_audio(mut self, disable: bool) -> Self {
        self.disable_audio = Some(disable);
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_transcription_model(mut self, model: impl Into<String>) -> Self {
        self.transcription_model = Some(model.into());
        self
    }

    /// Voice selector in the shape the configured family expects.
    pub fn voice_value(&self) -> Option<Value> {
        self.voice.as_deref().map(|v| self.family.voice_value(v))
    }

    pub fn transcription_value(&self) -> Option<Value> {
        self.transcription_model
            .as_deref()
            .map(|model| json!({ "model": model }))
    }
}
