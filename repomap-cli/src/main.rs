//! repomap CLI - relevance-ranked repository maps for LLM prompts

use clap::Parser;
use colored::Colorize;
use repomap_core::{Config, MapInputs, RefreshMode, RepoMap, RepoMapError, TiktokenCounter};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "repomap")]
#[command(about = "Relevance-ranked repository maps for LLM prompts", long_about = None)]
struct Cli {
    /// Override repo root detection
    #[arg(long)]
    root: Option<PathBuf>,

    /// Token budget for the rendered map (default from config)
    #[arg(long)]
    map_tokens: Option<usize>,

    /// Refresh mode: auto, always, files or manual (default from config)
    #[arg(long)]
    refresh: Option<String>,

    /// Re-extract tags for every file
    #[arg(long)]
    force_refresh: bool,

    /// File already in the chat (repeatable)
    #[arg(long = "chat")]
    chat_files: Vec<PathBuf>,

    /// Extra file to rank beyond the repository listing (repeatable)
    #[arg(long = "include")]
    include_files: Vec<PathBuf>,

    /// Mentioned repository path (repeatable)
    #[arg(long = "mention-file")]
    mentioned_files: Vec<PathBuf>,

    /// Mentioned identifier (repeatable)
    #[arg(long = "mention-ident")]
    mentioned_identifiers: Vec<String>,

    /// Free-text context to mine for file and identifier mentions (repeatable)
    #[arg(long)]
    context: Vec<String>,

    /// File whose contents are added to the context (repeatable)
    #[arg(long)]
    context_file: Vec<PathBuf>,

    /// Print ranked tags instead of the rendered map
    #[arg(long)]
    ranked: bool,

    /// Maximum number of ranked tags (with --ranked)
    #[arg(long, requires = "ranked")]
    limit: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Config file (default: <root>/.repomap/config.toml)
    #[arg(long, env = "REPOMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli) {
        if cli.json {
            let error_json = serde_json::json!({ "error": e.to_string() });
            eprintln!("{}", error_json);
        } else {
            eprintln!("{}: {}", "Error".red(), e);
        }
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over `--verbose` when set
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn run(cli: &Cli) -> repomap_core::Result<()> {
    let repo_root = detect_repo_root(cli.root.clone())?;
    let refresh = cli
        .refresh
        .as_deref()
        .map(str::parse::<RefreshMode>)
        .transpose()?;

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&repo_root)?,
    };
    let budget = cli.map_tokens.unwrap_or(config.map.map_tokens);

    let context = gather_context(&cli.context, &cli.context_file)?;

    TiktokenCounter::warm();
    let map = RepoMap::builder(&repo_root).config(config).build()?;
    let request = map.prepare(&MapInputs {
        chat_files: cli.chat_files.clone(),
        include_files: cli.include_files.clone(),
        context,
        mentioned_files: cli.mentioned_files.clone(),
        mentioned_identifiers: cli.mentioned_identifiers.clone(),
        refresh,
        force_refresh: cli.force_refresh,
    })?;

    if cli.ranked {
        let ranked = map.generate_ranked_tags(&request, cli.limit)?;
        print_diagnostics(&ranked.diagnostics);
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&ranked)?);
        } else {
            for tag in &ranked.tags {
                println!(
                    "{:.6}  {}:{}  {}",
                    tag.score,
                    tag.rel_path.blue(),
                    tag.line,
                    tag.name.bold()
                );
            }
            if ranked.tags.len() < ranked.total {
                eprintln!(
                    "{}: showing {} of {} tags",
                    "Limit".yellow(),
                    ranked.tags.len(),
                    ranked.total
                );
            }
        }
        return Ok(());
    }

    let rendered = map.generate_map(&request, budget)?;
    print_diagnostics(&rendered.diagnostics);
    if rendered.budget_too_small {
        eprintln!(
            "{}: budget too small ({} tokens); showing the top entry ({} tokens)",
            "Warning".yellow(),
            budget,
            rendered.tokens
        );
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        print!("{}", rendered.text);
    }
    Ok(())
}

/// Inline context first, then file contents, joined by newlines
fn gather_context(inline: &[String], files: &[PathBuf]) -> repomap_core::Result<Option<String>> {
    let mut parts = inline.to_vec();
    for path in files {
        parts.push(std::fs::read_to_string(path)?);
    }
    Ok((!parts.is_empty()).then(|| parts.join("\n")))
}

fn print_diagnostics(diagnostics: &[repomap_core::Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("{}: {}", "Skipped".yellow(), diagnostic);
    }
}

fn detect_repo_root(override_path: Option<PathBuf>) -> repomap_core::Result<PathBuf> {
    if let Some(path) = override_path {
        if !path.is_dir() {
            return Err(RepoMapError::InvalidRequest(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        return Ok(path);
    }

    // Walk up from current directory looking for .repomap or .git
    let mut current = std::env::current_dir()?;
    loop {
        if current.join(".repomap").exists() || current.join(".git").exists() {
            return Ok(current);
        }
        if !current.pop() {
            // No parent, use current directory
            return Ok(std::env::current_dir()?);
        }
    }
}
