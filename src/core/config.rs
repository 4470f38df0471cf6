use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_pages")]
    pub default_pages: usize,

    #[serde(default)]
    pub unattended: bool,

    pub llm: LlmConfig,

    #[serde(default)]
    pub image: ImageConfig,
}

fn default_output() -> String {
    "output".to_string()
}
fn default_max_pages() -> usize {
    10
}
fn default_pages() -> usize {
    10
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            anyhow::bail!("max_pages must be at least 1");
        }
        if self.default_pages == 0 || self.default_pages > self.max_pages {
            anyhow::bail!(
                "default_pages must be between 1 and max_pages ({}), got {}",
                self.max_pages,
                self.default_pages
            );
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)
            .with_context(|| format!("Failed to create {}", self.output_folder))?;
        Ok(())
    }
}
