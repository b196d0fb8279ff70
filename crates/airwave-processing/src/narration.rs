//! AI narration collaborator.
//!
//! The narration service is opaque: one endpoint writes intro text, another
//! turns text into speech. Text generation failures fall back to a canned
//! line; speech failures are errors the job layer retries.

use airwave_core::models::MediaKind;
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

const MAX_INTRO_CHARS: usize = 400;

#[derive(Debug, thiserror::Error)]
pub enum NarrationError {
    #[error("Narration request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Narration service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid narration response: {0}")]
    InvalidResponse(String),
}

/// Host voice, picked by time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    Energetic,
    Chill,
    Professional,
    Quirky,
}

impl Personality {
    /// The two personalities on air at a given local hour.
    pub fn candidates_for_hour(hour: u32) -> [Personality; 2] {
        match hour {
            6..=9 => [Personality::Energetic, Personality::Professional],
            10..=15 => [Personality::Professional, Personality::Chill],
            16..=19 => [Personality::Energetic, Personality::Quirky],
            _ => [Personality::Chill, Personality::Quirky],
        }
    }

    pub fn for_hour<R: Rng + ?Sized>(hour: u32, rng: &mut R) -> Personality {
        let [first, second] = Self::candidates_for_hour(hour);
        if rng.random_bool(0.5) {
            first
        } else {
            second
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Personality::Energetic => "energetic",
            Personality::Chill => "chill",
            Personality::Professional => "professional",
            Personality::Quirky => "quirky",
        }
    }

    pub fn voice(&self) -> &'static str {
        match self {
            Personality::Energetic => "bright",
            Personality::Chill => "warm",
            Personality::Professional => "clear",
            Personality::Quirky => "playful",
        }
    }

    pub fn speed(&self) -> f32 {
        match self {
            Personality::Energetic => 1.1,
            Personality::Chill => 0.9,
            Personality::Professional => 1.0,
            Personality::Quirky => 1.05,
        }
    }

    fn temperature(&self) -> f32 {
        match self {
            Personality::Professional => 0.6,
            Personality::Chill => 0.7,
            Personality::Energetic => 0.8,
            Personality::Quirky => 0.95,
        }
    }

    fn style(&self) -> &'static str {
        match self {
            Personality::Energetic => "an upbeat, high-energy radio host",
            Personality::Chill => "a relaxed late-night radio host with a calm voice",
            Personality::Professional => "a polished, articulate radio presenter",
            Personality::Quirky => "a playful radio host who likes a light joke",
        }
    }

    fn transition_style(&self) -> &'static str {
        match self {
            Personality::Energetic => "pumped up and excited",
            Personality::Chill => "smooth and relaxed",
            Personality::Professional => "professional and informative",
            Personality::Quirky => "witty and unexpected",
        }
    }

    /// Canned segue used when text generation is unavailable.
    pub fn fallback_transition(&self, request: &TransitionRequest) -> String {
        match self {
            Personality::Energetic => format!(
                "That was incredible! Now let's keep the energy going with {}!",
                request.next_title
            ),
            Personality::Chill => format!("Nice. Coming up, we have {} for you to enjoy.", request.next_title),
            Personality::Professional => format!(
                "Next in our lineup is {} by {}.",
                request.next_title,
                request.next_creator.as_deref().unwrap_or("our community")
            ),
            Personality::Quirky => format!(
                "Plot twist! Here comes {}. The machines never sleep!",
                request.next_title
            ),
        }
    }

    /// Canned intro used when text generation is unavailable.
    pub fn fallback_text(&self, request: &IntroRequest) -> String {
        let by = request
            .creator
            .as_deref()
            .map(|c| format!(" by {}", c))
            .unwrap_or_default();
        match self {
            Personality::Energetic => format!("Turn it up! Here comes {}{}!", request.title, by),
            Personality::Chill => format!("Settle in. This is {}{}.", request.title, by),
            Personality::Professional => format!("Up next on Airwave: {}{}.", request.title, by),
            Personality::Quirky => format!("Plot twist, it's {}{}. Enjoy!", request.title, by),
        }
    }
}

impl Display for Personality {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// What the host gets to know about the upcoming item.
#[derive(Debug, Clone)]
pub struct IntroRequest {
    pub title: String,
    pub creator: Option<String>,
    pub kind: MediaKind,
    pub description: Option<String>,
}

impl IntroRequest {
    pub fn prompt(&self, personality: Personality) -> String {
        let mut prompt = format!(
            "You are {}. Write a one or two sentence spoken introduction for the next {} on air, titled \"{}\"",
            personality.style(),
            match self.kind {
                MediaKind::Audio => "track",
                MediaKind::Video => "video",
            },
            self.title
        );
        if let Some(creator) = &self.creator {
            prompt.push_str(&format!(", submitted by {}", creator));
        }
        prompt.push('.');
        if let Some(description) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            prompt.push_str(&format!(" About it: {}", description.trim()));
        }
        prompt.push_str(" Reply with the introduction only.");
        prompt
    }
}

/// The two items a segue sits between.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub previous_title: String,
    pub next_title: String,
    pub next_creator: Option<String>,
}

impl TransitionRequest {
    pub fn prompt(&self, personality: Personality) -> String {
        format!(
            "You are {}. Write a brief spoken segue, ten to fifteen seconds long. \
             Just finished: \"{}\". Coming up next: \"{}\" by {}. Keep it {}. \
             Do not use quotation marks.",
            personality.style(),
            self.previous_title,
            self.next_title,
            self.next_creator.as_deref().unwrap_or("an anonymous creator"),
            personality.transition_style()
        )
    }
}

#[async_trait]
pub trait NarrationClient: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, NarrationError>;

    /// Synthesize speech; returns encoded audio bytes.
    async fn synthesize(&self, text: &str, voice: &str, speed: f32) -> Result<Bytes, NarrationError>;

    /// Succeeds when the service answers its health endpoint.
    async fn health_check(&self) -> Result<(), NarrationError>;
}

#[derive(Serialize)]
struct TextRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
    speed: f32,
}

#[derive(Deserialize)]
struct SpeechResponse {
    audio_data: String,
}

/// HTTP client for the narration service.
pub struct HttpNarrationClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpNarrationClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for narration service")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + Sync, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NarrationError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http_client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NarrationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| NarrationError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl NarrationClient for HttpNarrationClient {
    async fn generate_text(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, NarrationError> {
        let response: TextResponse = self
            .post(
                "/generate_text",
                &TextRequest {
                    prompt,
                    max_tokens,
                    temperature,
                },
            )
            .await?;
        Ok(response.text)
    }

    async fn synthesize(&self, text: &str, voice: &str, speed: f32) -> Result<Bytes, NarrationError> {
        let response: SpeechResponse = self
            .post("/generate_tts", &SpeechRequest { text, voice, speed })
            .await?;
        let audio = base64::engine::general_purpose::STANDARD
            .decode(response.audio_data.trim())
            .map_err(|e| NarrationError::InvalidResponse(format!("audio_data is not base64: {}", e)))?;
        if audio.is_empty() {
            return Err(NarrationError::InvalidResponse("empty audio".to_string()));
        }
        Ok(Bytes::from(audio))
    }

    async fn health_check(&self) -> Result<(), NarrationError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NarrationError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// A finished intro: spoken text plus synthesized audio.
#[derive(Debug, Clone)]
pub struct IntroAudio {
    pub text: String,
    pub audio: Bytes,
    pub personality: Personality,
    /// True when the canned line replaced generated text.
    pub used_fallback: bool,
}

fn clean_generated(text: &str) -> Option<String> {
    let text = text.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if text.is_empty() {
        return None;
    }
    let mut text = text.to_string();
    if text.chars().count() > MAX_INTRO_CHARS {
        text = text.chars().take(MAX_INTRO_CHARS).collect();
    }
    Some(text)
}

/// Write and voice an intro for one item.
pub async fn compose_intro(
    client: &dyn NarrationClient,
    request: &IntroRequest,
    personality: Personality,
) -> Result<IntroAudio, NarrationError> {
    let prompt = request.prompt(personality);
    let generated = match client
        .generate_text(&prompt, 120, personality.temperature())
        .await
    {
        Ok(text) => clean_generated(&text),
        Err(err) => {
            tracing::warn!(error = %err, personality = %personality, "Intro text generation failed, using template");
            None
        }
    };

    let used_fallback = generated.is_none();
    let text = generated.unwrap_or_else(|| personality.fallback_text(request));
    let audio = client
        .synthesize(&text, personality.voice(), personality.speed())
        .await?;

    Ok(IntroAudio {
        text,
        audio,
        personality,
        used_fallback,
    })
}

/// A spoken segue between two queued items. Text only; it is read live.
#[derive(Debug, Clone, Serialize)]
pub struct DjTransition {
    pub text: String,
    pub personality: Personality,
    pub used_fallback: bool,
}

/// Write a segue. Never fails: any generation problem yields the canned line.
pub async fn compose_transition(
    client: &dyn NarrationClient,
    request: &TransitionRequest,
    personality: Personality,
) -> DjTransition {
    let generated = match client
        .generate_text(&request.prompt(personality), 100, 0.8)
        .await
    {
        Ok(text) => clean_generated(&text),
        Err(err) => {
            tracing::warn!(error = %err, personality = %personality, "Transition text generation failed, using template");
            None
        }
    };

    DjTransition {
        used_fallback: generated.is_none(),
        text: generated.unwrap_or_else(|| personality.fallback_transition(request)),
        personality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rand::{rngs::StdRng, SeedableRng};

    fn request() -> IntroRequest {
        IntroRequest {
            title: "Night Drive".to_string(),
            creator: Some("dj".to_string()),
            kind: MediaKind::Audio,
            description: Some("Synthwave for the commute".to_string()),
        }
    }

    #[test]
    fn test_personality_follows_the_clock() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let morning = Personality::for_hour(7, &mut rng);
            assert!(matches!(morning, Personality::Energetic | Personality::Professional));
            let night = Personality::for_hour(23, &mut rng);
            assert!(matches!(night, Personality::Chill | Personality::Quirky));
        }
        assert_eq!(
            Personality::candidates_for_hour(16),
            [Personality::Energetic, Personality::Quirky]
        );
    }

    #[test]
    fn test_prompt_mentions_item() {
        let prompt = request().prompt(Personality::Chill);
        assert!(prompt.contains("Night Drive"));
        assert!(prompt.contains("submitted by dj"));
        assert!(prompt.contains("Synthwave"));
    }

    #[tokio::test]
    async fn test_http_client_generates_intro() {
        let mut server = mockito::Server::new_async().await;
        let text = server
            .mock("POST", "/generate_text")
            .match_body(Matcher::PartialJson(serde_json::json!({"max_tokens": 120})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"text": "\"Buckle up for Night Drive!\""}"#)
            .create_async()
            .await;
        let tts = server
            .mock("POST", "/generate_tts")
            .match_body(Matcher::PartialJson(serde_json::json!({"voice": "clear"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"audio_data": "SUQzAwAAAAA="}"#)
            .create_async()
            .await;

        let client = HttpNarrationClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let intro = compose_intro(&client, &request(), Personality::Professional)
            .await
            .unwrap();

        assert_eq!(intro.text, "Buckle up for Night Drive!");
        assert!(!intro.used_fallback);
        assert!(intro.audio.starts_with(b"ID3"));
        text.assert_async().await;
        tts.assert_async().await;
    }

    #[tokio::test]
    async fn test_text_failure_falls_back_to_template() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate_text")
            .with_status(503)
            .with_body("model loading")
            .create_async()
            .await;
        server
            .mock("POST", "/generate_tts")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"audio_data": "SUQzAwAAAAA="}"#)
            .create_async()
            .await;

        let client = HttpNarrationClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let intro = compose_intro(&client, &request(), Personality::Energetic)
            .await
            .unwrap();

        assert!(intro.used_fallback);
        assert_eq!(intro.text, "Turn it up! Here comes Night Drive by dj!");
    }

    #[tokio::test]
    async fn test_speech_failure_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate_text")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"text": "Hello"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/generate_tts")
            .with_status(500)
            .with_body("tts backend down")
            .create_async()
            .await;

        let client = HttpNarrationClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let result = compose_intro(&client, &request(), Personality::Chill).await;
        assert!(matches!(result, Err(NarrationError::Status { status: 500, .. })));
    }

    fn segue() -> TransitionRequest {
        TransitionRequest {
            previous_title: "Night Drive".to_string(),
            next_title: "Dawn Chorus".to_string(),
            next_creator: Some("kay".to_string()),
        }
    }

    #[tokio::test]
    async fn test_transition_uses_generated_text() {
        let mut server = mockito::Server::new_async().await;
        let text = server
            .mock("POST", "/generate_text")
            .match_body(Matcher::PartialJson(serde_json::json!({"max_tokens": 100})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"text": " From the night into the dawn. "}"#)
            .create_async()
            .await;

        let client = HttpNarrationClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let transition = compose_transition(&client, &segue(), Personality::Chill).await;

        assert_eq!(transition.text, "From the night into the dawn.");
        assert!(!transition.used_fallback);
        assert_eq!(transition.personality, Personality::Chill);
        text.assert_async().await;
    }

    #[tokio::test]
    async fn test_transition_falls_back_when_service_is_down() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate_text")
            .with_status(502)
            .create_async()
            .await;

        let client = HttpNarrationClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let transition = compose_transition(&client, &segue(), Personality::Professional).await;

        assert!(transition.used_fallback);
        assert_eq!(transition.text, "Next in our lineup is Dawn Chorus by kay.");
    }

    #[test]
    fn test_transition_prompt_names_both_items() {
        let prompt = segue().prompt(Personality::Quirky);
        assert!(prompt.contains("Just finished: \"Night Drive\""));
        assert!(prompt.contains("\"Dawn Chorus\" by kay"));
        assert!(prompt.contains("witty and unexpected"));
    }

    #[tokio::test]
    async fn test_health_check_reports_status() {
        let mut server = mockito::Server::new_async().await;
        let health = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;
        let client = HttpNarrationClient::new(server.url(), Duration::from_secs(5)).unwrap();
        assert!(client.health_check().await.is_ok());
        health.assert_async().await;

        let mut down = mockito::Server::new_async().await;
        down.mock("GET", "/health")
            .with_status(503)
            .with_body("warming up")
            .create_async()
            .await;
        let client = HttpNarrationClient::new(down.url(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.health_check().await,
            Err(NarrationError::Status { status: 503, .. })
        ));
    }
}
