use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";
pub const DEFAULT_STORAGE_URL: &str = "https://rest.alpha.fal.ai";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_COMPLETION_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGES_DIR: &str = "images";
pub const DEFAULT_URL_PREFIX: &str = "/images";

pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are an expert at writing Stable Diffusion prompts. \
You build prompts from keywords, usually in the style of tag databases such as Danbooru. \
A prompt describes the image with common words ordered by importance and separated by commas. \
Avoid \"-\" and \".\", spaces and natural language are fine. Do not repeat words. \
To emphasise a keyword wrap it in parentheses to raise its weight: \"(flowers)\" weighs 'flowers' 1.1x, \
\"(((flowers)))\" weighs it 1.331x and \"(flowers:1.5)\" weighs it 1.5x. Only weight important tags. \
A prompt has three parts: prefix (quality tags, style words, effectors) + subject (the main focus of the image) + scene (background, environment). \
The prefix drives image quality: tags like \"masterpiece\", \"best quality\", \"4k\" raise detail, style words like \"illustration\" define the style, \
effectors like \"best lighting\", \"lens flare\", \"depth of field\" shape light and depth. \
The subject is the main focus such as a character or a place; describe it in detail and raise its weight. \
For characters describe face, hair, body, clothing and pose. \
The scene describes the environment; without it the background is flat and the subject looks oversized. \
Environment words such as \"grassland\", \"sunshine\", \"river\" enrich the scene. \
Your task: I send you an image scene, you reply with a detailed image description in English as the Positive Prompt and nothing else. \
Example: I send \"a WWII-era nurse\". You reply only: \
A WWII-era nurse in a German uniform, holding a wine bottle and stethoscope, sitting at a table in white attire, with a table in the background, \
masterpiece, best quality, 4k, illustration style, best lighting, depth of field, detailed character, detailed environment.";

#[derive(Debug, Clone)]
pub struct FalConfig {
    pub keys: Vec<String>,
    pub queue_url: Option<String>,
    pub storage_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub prompt_template: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub images_dir: Option<PathBuf>,
    pub url_prefix: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub fal: FalConfig,
    pub completion: CompletionConfig,
    pub storage: StorageConfig,
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn trim_base(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Splits a comma separated key list, dropping blank entries.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for FalConfig {
    fn default() -> Self {
        FalConfig {
            keys: Vec::new(),
            queue_url: None,
            storage_url: None,
            poll_interval_ms: None,
        }
    }
}

impl FalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let keys = env::var("FAL_KEY")
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();
        let queue_url = non_empty_env("FAL_QUEUE_URL");
        let storage_url = non_empty_env("FAL_STORAGE_URL");
        let poll_interval_ms = non_empty_env("FAL_POLL_INTERVAL_MS").and_then(|s| s.parse().ok());

        FalConfig {
            keys,
            queue_url,
            storage_url,
            poll_interval_ms,
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_queue_url(mut self, url: impl Into<String>) -> Self {
        self.queue_url = Some(url.into());
        self
    }

    pub fn with_storage_url(mut self, url: impl Into<String>) -> Self {
        self.storage_url = Some(url.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn queue_url(&self) -> String {
        trim_base(
            self.queue_url
                .clone()
                .unwrap_or_else(|| DEFAULT_QUEUE_URL.to_string()),
        )
    }

    pub fn storage_url(&self) -> String {
        trim_base(
            self.storage_url
                .clone()
                .unwrap_or_else(|| DEFAULT_STORAGE_URL.to_string()),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        CompletionConfig {
            api_url: None,
            api_key: None,
            model: None,
            prompt_template: None,
        }
    }
}

impl CompletionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        CompletionConfig {
            api_url: non_empty_env("OPENAI_API_URL"),
            api_key: non_empty_env("OPENAI_API_KEY"),
            model: non_empty_env("OPENAI_MODEL"),
            prompt_template: non_empty_env("PROMPT_TEMPLATE"),
        }
    }

    pub fn with_credentials(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn api_url(&self) -> String {
        trim_base(
            self.api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_COMPLETION_URL.to_string()),
        )
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_COMPLETION_MODEL)
    }

    pub fn prompt_template(&self) -> &str {
        self.prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            images_dir: None,
            url_prefix: None,
        }
    }
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        StorageConfig {
            images_dir: non_empty_env("IMAGES_DIR").map(PathBuf::from),
            url_prefix: non_empty_env("IMAGES_URL_PREFIX"),
        }
    }

    pub fn with_images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.images_dir = Some(dir.into());
        self
    }

    pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(prefix.into());
        self
    }

    pub fn images_dir(&self) -> PathBuf {
        self.images_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGES_DIR))
    }

    pub fn url_prefix(&self) -> String {
        trim_base(
            self.url_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_URL_PREFIX.to_string()),
        )
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Config {
            fal: FalConfig::from_env(),
            completion: CompletionConfig::from_env(),
            storage: StorageConfig::from_env(),
        }
    }

    pub fn with_fal(mut self, config: FalConfig) -> Self {
        self.fal = config;
        self
    }

    pub fn with_completion(mut self, config: CompletionConfig) -> Self {
        self.completion = config;
        self
    }

    pub fn with_storage(mut self, config: StorageConfig) -> Self {
        self.storage = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_list_trims_and_drops_blanks() {
        assert_eq!(parse_key_list(" a , b,,c ,"), vec!["a", "b", "c"]);
        assert!(parse_key_list(" , ").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.fal.queue_url(), DEFAULT_QUEUE_URL);
        assert_eq!(config.fal.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.completion.model(), "gpt-4o-mini");
        assert_eq!(config.storage.url_prefix(), "/images");
        assert_eq!(config.storage.images_dir(), PathBuf::from("images"));
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let fal = FalConfig::new().with_queue_url("http://127.0.0.1:9000/");
        assert_eq!(fal.queue_url(), "http://127.0.0.1:9000");

        let completion = CompletionConfig::new().with_api_url("http://localhost/v1/");
        assert_eq!(completion.api_url(), "http://localhost/v1");
    }
}
