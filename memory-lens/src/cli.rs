use clap::{ArgAction, Args, Parser, Subcommand};
use memory_lens::{CaptionConfig, EngineConfig, IndexConfig, IngestConfig, SearchConfig, DEFAULT_INDEX, DEFAULT_PROMPT};
use std::path::PathBuf;

/// Describe a folder of images, index the descriptions and search them.
#[derive(Debug, Parser)]
#[command(name = "memory-lens", version)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Caption every image under the image root that has no description yet
    Ingest(IngestArgs),
    /// Load described records into the search index
    Index(IndexArgs),
    /// Fuzzy search over indexed descriptions; reads queries from stdin when none is given
    Search(SearchArgs),
    /// Show record counts and failed images
    Status(StoreArgs),
    /// Make failed images eligible for captioning again
    Requeue(RequeueArgs),
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Description store file
    #[arg(long, env = "STORE_PATH", default_value = "responses.json")]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct EngineArgs {
    #[arg(long, env = "ES_HOST", default_value = "https://localhost:9200")]
    pub es_host: String,

    #[arg(long, env = "ES_USERNAME")]
    pub es_username: Option<String>,

    #[arg(long, env = "ES_PASSWORD", hide_env_values = true)]
    pub es_password: Option<String>,

    /// Verify the engine's TLS certificate
    #[arg(long, env = "ES_VERIFY_CERTS", default_value_t = true, action = ArgAction::Set)]
    pub verify_certs: bool,

    #[arg(long, env = "INDEX_NAME", default_value = DEFAULT_INDEX)]
    pub index: String,

    #[arg(long, default_value_t = 30)]
    pub engine_timeout_secs: u64,
}

impl EngineArgs {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            host: self.es_host.clone(),
            username: self.es_username.clone(),
            password: self.es_password.clone(),
            verify_certs: self.verify_certs,
            timeout_seconds: self.engine_timeout_secs,
        }
    }
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Root folder scanned recursively for images
    #[arg(long, env = "IMAGE_ROOT", default_value = "images")]
    pub images: PathBuf,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub api_base: String,

    #[arg(long, env = "CAPTION_MODEL", default_value = "gpt-4o")]
    pub model: String,

    #[arg(long, env = "CAPTION_PROMPT", default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    #[arg(long, default_value_t = 500)]
    pub max_tokens: u32,

    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Parallel caption requests
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Save the store every N images (0: only at the end)
    #[arg(long, default_value_t = 25)]
    pub checkpoint_every: usize,

    /// Stop retrying an image after this many failed runs (0: never stop)
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// In-run retries for timeouts, connection errors, 429 and 5xx
    #[arg(long, default_value_t = 2)]
    pub retries: u32,
}

impl IngestArgs {
    pub fn caption_config(&self, api_key: String) -> CaptionConfig {
        CaptionConfig {
            api_key,
            base_url: self.api_base.clone(),
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            max_tokens: self.max_tokens,
            timeout_seconds: self.timeout_secs,
            ..Default::default()
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            image_root: self.images.clone(),
            store_path: self.store.store.clone(),
            concurrency: self.concurrency,
            checkpoint_every: self.checkpoint_every,
            max_attempts: self.max_attempts,
            retries: self.retries,
            ..Default::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Documents per bulk request
    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,

    /// Let the engine assign ids instead of deriving them from the image path
    #[arg(long)]
    pub engine_ids: bool,

    /// Exit with an error when any document fails to index
    #[arg(long)]
    pub strict: bool,
}

impl IndexArgs {
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            index_name: self.engine.index.clone(),
            batch_size: self.batch_size,
            stable_ids: !self.engine_ids,
        }
    }
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Maximum number of hits
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Query text; several words are joined with spaces
    pub query: Vec<String>,
}

impl SearchArgs {
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            index_name: self.engine.index.clone(),
            limit: self.limit,
            ..Default::default()
        }
    }

    pub fn query_text(&self) -> Option<String> {
        if self.query.is_empty() {
            None
        } else {
            Some(self.query.join(" "))
        }
    }
}

#[derive(Debug, Args)]
pub struct RequeueArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Image paths to requeue; all failed images when omitted
    pub paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn search_words_are_joined() {
        let cli = Cli::try_parse_from(["memory-lens", "search", "child", "ball", "--limit", "3"]).unwrap();
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query_text().as_deref(), Some("child ball"));
                assert_eq!(args.search_config().limit, 3);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn certificate_verification_can_be_turned_off() {
        let cli = Cli::try_parse_from(["memory-lens", "index", "--verify-certs", "false", "--strict"]).unwrap();
        match cli.command {
            Command::Index(args) => {
                assert!(!args.engine.engine_config().verify_certs);
                assert!(args.strict);
                assert!(args.index_config().stable_ids);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
