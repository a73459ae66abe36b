use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

// ── Database ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout: Duration,
}

impl PostgresConfig {
    /// Connection parameters, passed as values so nothing needs quoting.
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.database)
            .connect_timeout(self.connect_timeout);
        config
    }
}

// ── External models ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub max_retries: u32,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Gemini,
    Ollama,
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub ollama_url: String,
    pub ollama_model: String,
}

// ── Ingest ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub whisper_model: PathBuf,
    /// `None` means whisper auto-detects the language.
    pub language: Option<String>,
    pub scene_threshold: f64,
    pub min_scene_duration: f64,
    pub frame_interval: f64,
    pub object_detection: bool,
    pub output_dir: PathBuf,
    pub videos_dir: PathBuf,
}

// ── API ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
    pub similarity_threshold: f64,
    pub retrieval_limit: usize,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database: PostgresConfig,
    pub gemini: GeminiConfig,
    pub embedding: EmbeddingConfig,
    pub processing: ProcessingConfig,
    pub server: ServerConfig,
}

/// Load a `.env` file from the working directory or its parents into the
/// process environment. Variables already set win over the file.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let language = text("TRANSCRIBE_LANGUAGE", "en");
        let language = (!language.eq_ignore_ascii_case("auto")).then_some(language);

        let provider_raw = text("EMBEDDING_PROVIDER", "gemini");
        let provider = provider_raw
            .parse::<EmbeddingProvider>()
            .map_err(|_| ConfigError::Invalid {
                key: "EMBEDDING_PROVIDER",
                value: provider_raw.clone(),
            })?;

        let cors_origins = text(
            "CORS_ORIGINS",
            "http://localhost:3000,http://localhost:8000",
        )
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

        Ok(Self {
            database: PostgresConfig {
                host: text("POSTGRES_HOST", "localhost"),
                port: parse(&lookup, "POSTGRES_PORT", 5432)?,
                user: text("POSTGRES_USER", "postgres"),
                password: text("POSTGRES_PASSWORD", "postgres"),
                database: text("POSTGRES_DB", "video_highlights"),
                connect_timeout: Duration::from_secs(parse(
                    &lookup,
                    "POSTGRES_CONNECT_TIMEOUT",
                    10,
                )?),
            },
            gemini: GeminiConfig {
                api_key: lookup("GOOGLE_API_KEY").unwrap_or_default(),
                base_url: text(
                    "GEMINI_BASE_URL",
                    "https://generativelanguage.googleapis.com/v1beta",
                ),
                model: text("GEMINI_MODEL", "gemini-2.0-flash"),
                embedding_model: text("GEMINI_EMBEDDING_MODEL", "text-embedding-004"),
                max_retries: parse(&lookup, "LLM_MAX_RETRIES", 3)?,
                max_concurrency: parse::<usize, _>(&lookup, "LLM_MAX_CONCURRENCY", 4)?.max(1),
            },
            embedding: EmbeddingConfig {
                provider,
                ollama_url: text("OLLAMA_EMBED_URL", "http://localhost:11434/api/embed"),
                ollama_model: text("OLLAMA_EMBED_MODEL", "nomic-embed-text"),
            },
            processing: ProcessingConfig {
                whisper_model: PathBuf::from(text("WHISPER_MODEL", "models/ggml-base.bin")),
                language,
                scene_threshold: parse(&lookup, "SCENE_THRESHOLD", 10.0)?,
                min_scene_duration: parse(&lookup, "MIN_SCENE_DURATION", 1.0)?,
                frame_interval: parse(&lookup, "FRAME_INTERVAL", 1.0)?,
                object_detection: parse_bool(&lookup, "OBJECT_DETECTION", true)?,
                output_dir: PathBuf::from(text("OUTPUT_DIR", "processed_media")),
                videos_dir: PathBuf::from(text("VIDEOS_DIR", "videos")),
            },
            server: ServerConfig {
                bind_addr: text("BIND_ADDR", "0.0.0.0:8000"),
                cors_origins,
                similarity_threshold: parse(&lookup, "SIMILARITY_THRESHOLD", 0.3)?,
                retrieval_limit: parse(&lookup, "RETRIEVAL_LIMIT", 5)?,
            },
        })
    }
}

fn parse<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_local_stack() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.database.host, "localhost");
        assert_eq!(s.database.port, 5432);
        assert_eq!(s.database.database, "video_highlights");
        assert_eq!(s.embedding.provider, EmbeddingProvider::Gemini);
        assert_eq!(s.processing.language.as_deref(), Some("en"));
        assert!(s.processing.object_detection);
        assert_eq!(s.server.similarity_threshold, 0.3);
        assert_eq!(s.server.retrieval_limit, 5);
        assert_eq!(
            s.server.cors_origins,
            vec!["http://localhost:3000", "http://localhost:8000"]
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            ("POSTGRES_PORT", "6543"),
            ("EMBEDDING_PROVIDER", "Ollama"),
            ("TRANSCRIBE_LANGUAGE", "auto"),
            ("OBJECT_DETECTION", "off"),
            ("LLM_MAX_CONCURRENCY", "0"),
            ("CORS_ORIGINS", " https://a.example , ,https://b.example"),
        ])
        .unwrap();
        assert_eq!(s.database.port, 6543);
        assert_eq!(s.embedding.provider, EmbeddingProvider::Ollama);
        assert_eq!(s.processing.language, None);
        assert!(!s.processing.object_detection);
        assert_eq!(s.gemini.max_concurrency, 1);
        assert_eq!(
            s.server.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = settings(&[("SIMILARITY_THRESHOLD", "high")]).unwrap_err();
        assert!(err.to_string().contains("SIMILARITY_THRESHOLD"));

        let err = settings(&[("EMBEDDING_PROVIDER", "openai")]).unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_PROVIDER"));
    }

    #[test]
    fn dotenv_file_entries_feed_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# local stack\nPOSTGRES_PORT=6000\nGOOGLE_API_KEY=\"abc123\"\nSCENE_THRESHOLD=12.5\n",
        )
        .unwrap();

        let map: HashMap<String, String> = dotenvy::from_path_iter(&path)
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        let s = Settings::from_lookup(|key| map.get(key).cloned()).unwrap();
        assert_eq!(s.database.port, 6000);
        assert_eq!(s.gemini.api_key, "abc123");
        assert_eq!(s.processing.scene_threshold, 12.5);
    }

    #[test]
    fn pg_config_keeps_passwords_verbatim() {
        let s = settings(&[("POSTGRES_PASSWORD", "it's a secret")]).unwrap();
        let config = s.database.pg_config();
        assert_eq!(config.get_password(), Some(&b"it's a secret"[..]));
        assert_eq!(config.get_user(), Some("postgres"));
        assert_eq!(config.get_dbname(), Some("video_highlights"));
        assert_eq!(config.get_ports(), &[5432]);
        assert_eq!(
            config.get_hosts(),
            &[tokio_postgres::config::Host::Tcp("localhost".into())]
        );
        assert_eq!(config.get_connect_timeout(), Some(&Duration::from_secs(10)));
    }
}
