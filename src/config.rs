use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::PickError;

/// When the validation command runs during a pick.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationTrigger {
    /// Never run validation.
    #[default]
    None,
    /// Validate after each pick, with the paths that pick changed.
    EachFile,
    /// Validate with every path changed since the pipeline started.
    All,
}

/// Per-pick options, mirrored one-to-one by the CLI flags.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PickOptions {
    /// Skip the LLM stage entirely when false.
    pub llm_enabled: bool,
    /// Ordered `(old_prefix, new_prefix)` pairs; first match wins.
    pub path_rewrites: Vec<(String, String)>,
    /// Validation program plus fixed arguments; changed paths are appended.
    pub validation_command: Option<Vec<String>>,
    pub run_validation_after: ValidationTrigger,
    /// Append a `Signed-off-by:` trailer to reconstructed commits.
    pub signoff: bool,
    /// Record a `(cherry picked from commit <id>)` line.
    pub record_origin: bool,
    /// Bound on recursive dependency picks; 0 disables them.
    pub dependency_depth: u32,
    /// Parent selection for merge commits, as in `git cherry-pick -m`.
    pub mainline_parent: Option<u32>,
    /// Timeout for each git/patch subprocess call.
    pub subprocess_timeout_secs: u64,
    /// Timeout for one validation command invocation.
    pub validation_timeout_secs: u64,
}

impl Default for PickOptions {
    fn default() -> Self {
        Self {
            llm_enabled: true,
            path_rewrites: Vec::new(),
            validation_command: None,
            run_validation_after: ValidationTrigger::None,
            signoff: false,
            record_origin: false,
            dependency_depth: 0,
            mainline_parent: None,
            subprocess_timeout_secs: 120,
            validation_timeout_secs: 1_800,
        }
    }
}

impl PickOptions {
    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.subprocess_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }
}

/// LLM transport and cache settings. Opaque to the pipeline; consumed by the
/// client in `llm`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub region: String,
    /// Explicit endpoint URL; when absent one is derived from `region`.
    pub endpoint: Option<String>,
    pub cache_path: PathBuf,
    /// Transport attempts before `LlmUnavailable` (first try included).
    pub max_attempts: u32,
    /// Base of the exponential backoff between attempts.
    pub backoff_base_ms: u64,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
            region: "us-west-2".to_string(),
            endpoint: None,
            cache_path: PathBuf::from("llm_pick_cache.jsonl"),
            max_attempts: 3,
            backoff_base_ms: 500,
            request_timeout_secs: 120,
            max_tokens: 4_096,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for the external patch tool.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PatchConfig {
    /// Program name of the fuzzy patch applicator.
    pub program: String,
    /// Fuzz levels tried strictest to loosest. Must be finite, non-empty,
    /// and strictly ascending.
    pub fuzz_ladder: Vec<u32>,
    /// Leading path components stripped by the tool (`-pN`).
    pub strip: u32,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            program: "patch".to_string(),
            // GNU patch's useful maximum with the default 3-line context is 2.
            fuzz_ladder: vec![0, 1, 2],
            strip: 1,
        }
    }
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), PickError> {
        if self.fuzz_ladder.is_empty() {
            return Err(PickError::InvalidConfig("fuzz ladder is empty".to_string()));
        }
        if !self.fuzz_ladder.windows(2).all(|w| w[0] < w[1]) {
            return Err(PickError::InvalidConfig(
                "fuzz ladder must be strictly ascending".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for enclosing-section extraction.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SectionConfig {
    /// Prefixes that mark a top-level section start after indentation.
    pub start_patterns: Vec<String>,
    /// Lines taken on each side of the target when no section is found.
    pub fallback_window: usize,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            start_patterns: [
                "fn ", "pub ", "def ", "class ", "struct ", "enum ", "impl ", "trait ",
                "function ", "func ", "static ", "const ", "int ", "void ", "char ", "long ",
                "unsigned ", "double ", "float ", "bool ",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            fallback_window: 20,
        }
    }
}
