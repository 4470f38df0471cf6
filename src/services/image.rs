use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use url::Url;

#[async_trait]
pub trait ImageClient: Send + Sync + Debug {
    /// Renders one panel and returns the encoded image bytes (PNG).
    async fn txt2img(&self, prompt: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_base_url")]
    pub base_url: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f32,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,
    #[serde(default = "default_checkpoint")]
    pub checkpoint: Option<String>,
    // None draws a fresh seed for every panel
    #[serde(default)]
    pub seed: Option<i64>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_url: default_image_base_url(),
            steps: default_steps(),
            sampler: default_sampler(),
            cfg_scale: default_cfg_scale(),
            width: default_size(),
            height: default_size(),
            negative_prompt: default_negative_prompt(),
            checkpoint: default_checkpoint(),
            seed: None,
        }
    }
}

fn default_image_base_url() -> String {
    "http://localhost:7860".to_string()
}
fn default_steps() -> u32 {
    30
}
fn default_sampler() -> String {
    "Euler a".to_string()
}
fn default_cfg_scale() -> f32 {
    7.0
}
fn default_size() -> u32 {
    512
}
fn default_negative_prompt() -> String {
    "Incorrect colors, extra limbs, blurry, distorted details, unrealistic anatomy, low resolution, \
     washed-out colors, overexposed, unnatural lighting, ugly, dull."
        .to_string()
}
fn default_checkpoint() -> Option<String> {
    Some("dreamshaper_8.safetensors".to_string())
}

pub fn create_image_client(config: &ImageConfig) -> Result<Box<dyn ImageClient>> {
    info!("Initializing image client at {}", config.base_url);
    Ok(Box::new(StableDiffusionClient::new(config.clone())?))
}

// --- AUTOMATIC1111 txt2img ---
#[derive(Debug)]
pub struct StableDiffusionClient {
    endpoint: String,
    config: ImageConfig,
    client: reqwest::Client,
}

impl StableDiffusionClient {
    pub fn new(config: ImageConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid image endpoint URL: {}", config.base_url))?;
        let endpoint = base
            .join("sdapi/v1/txt2img")
            .context("Failed to build txt2img endpoint")?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            config,
            client: reqwest::Client::new(),
        })
    }

    fn request_for<'a>(&'a self, prompt: &'a str) -> Txt2ImgRequest<'a> {
        let seed = self.config.seed.unwrap_or_else(|| i64::from(rand::random::<u32>()));
        debug!("txt2img seed {}", seed);
        Txt2ImgRequest {
            prompt,
            negative_prompt: &self.config.negative_prompt,
            steps: self.config.steps,
            sampler_index: &self.config.sampler,
            cfg_scale: self.config.cfg_scale,
            width: self.config.width,
            height: self.config.height,
            seed,
            override_settings: self
                .config
                .checkpoint
                .as_deref()
                .map(|sd_model_checkpoint| OverrideSettings { sd_model_checkpoint }),
        }
    }
}

#[derive(Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    steps: u32,
    sampler_index: &'a str,
    cfg_scale: f32,
    width: u32,
    height: u32,
    seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    override_settings: Option<OverrideSettings<'a>>,
}

#[derive(Serialize)]
struct OverrideSettings<'a> {
    sd_model_checkpoint: &'a str,
}

#[derive(Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

fn decode_first_image(response: Txt2ImgResponse) -> Result<Vec<u8>> {
    let encoded = response
        .images
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("txt2img returned no images"))?;
    // Some builds prefix a data URL header
    let payload = encoded.rsplit(',').next().unwrap_or(&encoded);
    BASE64
        .decode(payload.trim())
        .context("txt2img returned an image that is not valid base64")
}

#[async_trait]
impl ImageClient for StableDiffusionClient {
    async fn txt2img(&self, prompt: &str) -> Result<Vec<u8>> {
        let request_body = self.request_for(prompt);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("txt2img error ({}): {}", status, error_text));
        }

        let result: Txt2ImgResponse = resp.json().await?;
        let bytes = decode_first_image(result)?;
        debug!("txt2img returned {} bytes", bytes.len());
        Ok(bytes)
    }
}
