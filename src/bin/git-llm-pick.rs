//! Command-line front end for the pick pipeline.

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use git_llm_pick::{
    LlmConfig, PatchConfig, PickOptions, Pipeline, SectionConfig, ValidationTrigger,
    utils::CancelFlag,
};

#[derive(Parser, Debug)]
#[command(
    name = "git-llm-pick",
    version,
    about = "Cherry-pick commits with a fuzzy-patch fallback and LLM-assisted hunk repair"
)]
struct Cli {
    /// Commits to pick, in order; the first failure stops the run.
    #[arg(required = true, value_name = "COMMIT")]
    commits: Vec<String>,

    /// Repository working tree to operate on.
    #[arg(long, value_name = "DIR", default_value = ".")]
    repo: PathBuf,

    /// Disable the LLM repair stage.
    #[arg(long)]
    no_llm: bool,

    /// Model identifier handed to the LLM transport.
    #[arg(long, value_name = "MODEL")]
    llm_model: Option<String>,

    /// Region the LLM endpoint is derived from.
    #[arg(long, value_name = "REGION")]
    llm_region: Option<String>,

    /// Explicit LLM endpoint URL, overriding the region-derived one.
    #[arg(long, value_name = "URL")]
    llm_endpoint: Option<String>,

    /// LLM response cache file.
    #[arg(long, value_name = "FILE")]
    llm_cache: Option<PathBuf>,

    /// Rewrite paths with prefix OLD to prefix NEW before applying;
    /// repeatable, first match wins.
    #[arg(long = "path-rewrite", value_name = "OLD=NEW", value_parser = parse_rewrite)]
    path_rewrites: Vec<(String, String)>,

    /// Validation command (whitespace-split); changed paths are appended.
    #[arg(long, value_name = "CMD")]
    validate: Option<String>,

    /// When to run the validation command.
    #[arg(long, value_enum, value_name = "WHEN")]
    validate_after: Option<ValidateAfter>,

    /// Append a Signed-off-by trailer.
    #[arg(short = 's', long)]
    signoff: bool,

    /// Record a `(cherry picked from commit <id>)` line.
    #[arg(short = 'x', long)]
    record_origin: bool,

    /// Bound on preparatory dependency picks; 0 disables them.
    #[arg(long, value_name = "N", default_value_t = 0)]
    dependency_depth: u32,

    /// Parent number to diff against for merge commits.
    #[arg(short = 'm', long, value_name = "N")]
    mainline: Option<u32>,

    /// Per-subprocess timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ValidateAfter {
    None,
    EachFile,
    All,
}

impl From<ValidateAfter> for ValidationTrigger {
    fn from(value: ValidateAfter) -> Self {
        match value {
            ValidateAfter::None => ValidationTrigger::None,
            ValidateAfter::EachFile => ValidationTrigger::EachFile,
            ValidateAfter::All => ValidationTrigger::All,
        }
    }
}

fn parse_rewrite(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(old, new)| (old.to_string(), new.to_string()))
        .ok_or_else(|| format!("`{raw}` is not of the form OLD=NEW"))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let validation_command = cli
        .validate
        .as_ref()
        .map(|raw| raw.split_whitespace().map(str::to_string).collect());
    let run_validation_after = match (cli.validate_after, &validation_command) {
        (Some(when), _) => when.into(),
        // A validation command with no explicit trigger gates every pick.
        (None, Some(_)) => ValidationTrigger::EachFile,
        (None, None) => ValidationTrigger::None,
    };

    let mut options = PickOptions {
        llm_enabled: !cli.no_llm,
        path_rewrites: cli.path_rewrites.clone(),
        validation_command,
        run_validation_after,
        signoff: cli.signoff,
        record_origin: cli.record_origin,
        dependency_depth: cli.dependency_depth,
        mainline_parent: cli.mainline,
        ..PickOptions::default()
    };
    if let Some(secs) = cli.timeout_secs {
        options.subprocess_timeout_secs = secs;
    }

    let mut llm_config = LlmConfig::default();
    if let Some(model) = cli.llm_model {
        llm_config.model = model;
    }
    if let Some(region) = cli.llm_region {
        llm_config.region = region;
    }
    llm_config.endpoint = cli.llm_endpoint;
    if let Some(cache) = cli.llm_cache {
        llm_config.cache_path = cache;
    }

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            tracing::warn!("cannot install interrupt handler: {e}");
        }
    }

    let mut pipeline = match Pipeline::new(
        &cli.repo,
        options,
        llm_config,
        PatchConfig::default(),
        SectionConfig::default(),
        cancel,
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    for commit in &cli.commits {
        match pipeline.pick(commit) {
            Ok(outcome) => {
                println!(
                    "{} {} via {} ({})",
                    "picked".green().bold(),
                    commit,
                    outcome.succeeded_via.as_str(),
                    &outcome.commit[..12.min(outcome.commit.len())]
                );
                for dep in &outcome.dependencies_picked {
                    println!("  {} dependency {dep}", "with".dimmed());
                }
                if outcome.rejects_resolved > 0 {
                    println!(
                        "  {} {} rejected hunk(s) repaired",
                        "llm:".dimmed(),
                        outcome.rejects_resolved
                    );
                }
            }
            Err(e) => {
                eprintln!("{} {commit}: {e}", "failed".red().bold());
                return ExitCode::from(e.exit_code() as u8);
            }
        }
    }

    ExitCode::SUCCESS
}
