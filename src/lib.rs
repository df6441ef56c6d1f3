pub mod config;
pub mod corpus;
pub mod model;
pub mod search;

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use config::RetrieverConfig;
use model::types::Query;
use search::cache::CorpusEmbeddingCache;
use search::embedder::EmbeddingProvider;
use search::exact::DenseExactSearch;
use search::fingerprint::fingerprint;
use search::hash_embedder::HashEmbedder;
use search::ranker::ScoreFunction;
use search::session::SearchSession;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "retriever",
    version,
    about = "Exact dense retrieval over a document corpus with cached corpus embeddings"
)]
pub struct Cli {
    /// Config file (defaults to <config_dir>/retriever.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the corpus embedding cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rank corpus documents against one or more queries
    Search {
        /// Corpus file (.json, .jsonl or .ndjson)
        #[arg(long)]
        corpus: PathBuf,

        /// Query text; repeat for several queries (ids q1, q2, ...)
        #[arg(long = "query", short = 'q', required = true)]
        queries: Vec<String>,

        /// Results per query (defaults to config top_k)
        #[arg(long)]
        top_k: Option<usize>,

        /// cos_sim or dot (defaults to config score_function)
        #[arg(long)]
        score_function: Option<ScoreFunction>,

        /// Return hits in descending score order
        #[arg(long)]
        sorted: bool,

        /// Fraction of the corpus to load, from the start of the file
        #[arg(long, default_value_t = 1.0)]
        ratio: f64,

        /// Print the result set as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive query loop over a corpus
    Repl {
        #[arg(long)]
        corpus: PathBuf,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        score_function: Option<ScoreFunction>,

        #[arg(long, default_value_t = 1.0)]
        ratio: f64,
    },
    /// Print the content fingerprint of a corpus
    Fingerprint {
        #[arg(long)]
        corpus: PathBuf,

        #[arg(long, default_value_t = 1.0)]
        ratio: f64,
    },
    /// Inspect the corpus embedding cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// List cached corpus fingerprints for the active embedder
    List {
        #[arg(long)]
        json: bool,
    },
}

pub fn run_with(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "retriever", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
        Commands::Fingerprint { corpus, ratio } => {
            let loaded = corpus::load_corpus(&corpus, ratio)?;
            println!("{}", fingerprint(&loaded.corpus));
            Ok(())
        }
        Commands::Cache { action } => {
            let config = load_config(cli.config.as_deref(), cli.cache_dir)?;
            match action {
                CacheCommand::List { json } => run_cache_list(&config, json),
            }
        }
        Commands::Search {
            corpus,
            queries,
            top_k,
            score_function,
            sorted,
            ratio,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), cli.cache_dir)?;
            let session = open_session(&config, &corpus, ratio)?;
            let top_k = top_k.unwrap_or(config.top_k);
            let score_function = score_function.unwrap_or(config.score_function);
            run_search(&session, &queries, top_k, score_function, sorted, json)
        }
        Commands::Repl {
            corpus,
            top_k,
            score_function,
            ratio,
        } => {
            let config = load_config(cli.config.as_deref(), cli.cache_dir)?;
            let session = open_session(&config, &corpus, ratio)?;
            let top_k = top_k.unwrap_or(config.top_k);
            let score_function = score_function.unwrap_or(config.score_function);
            let stdin = std::io::stdin();
            run_repl(
                &session,
                top_k,
                score_function,
                stdin.lock(),
                &mut std::io::stdout(),
            )
        }
    }
}

fn load_config(path: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<RetrieverConfig> {
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
            RetrieverConfig::load_from(path)?
        }
        None => RetrieverConfig::load()?,
    };
    if let Some(dir) = cache_dir {
        config.cache_dir = Some(dir);
    }
    debug!(?config, "resolved configuration");
    Ok(config)
}

fn provider_for(config: &RetrieverConfig) -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashEmbedder::new(config.embedder_dimension))
}

fn open_session(config: &RetrieverConfig, corpus_path: &Path, ratio: f64) -> Result<SearchSession> {
    let loaded = corpus::load_corpus(corpus_path, ratio)
        .with_context(|| format!("loading corpus {}", corpus_path.display()))?;
    let show_progress = config.show_progress && std::io::stderr().is_terminal();
    let searcher =
        DenseExactSearch::from_config(provider_for(config), config)?.with_progress(show_progress);
    Ok(SearchSession::new(searcher, loaded.corpus))
}

fn run_search(
    session: &SearchSession,
    texts: &[String],
    top_k: usize,
    score_function: ScoreFunction,
    sorted: bool,
    json: bool,
) -> Result<()> {
    let queries: Vec<Query> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| Query::new(format!("q{}", i + 1), text.as_str()))
        .collect();
    let results = session.search(&queries, top_k, score_function, sorted)?;

    if json {
        let query_map: serde_json::Map<String, serde_json::Value> = queries
            .iter()
            .map(|q| (q.id.clone(), json!(q.text)))
            .collect();
        let payload = json!({
            "fingerprint": session.fingerprint(),
            "score_function": score_function.as_str(),
            "top_k": top_k,
            "queries": query_map,
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for query in &queries {
        println!(
            "{} {} ({}, top {top_k})",
            query.id.bold(),
            query.text,
            score_function.description()
        );
        let hits = results.get(&query.id).map(Vec::as_slice).unwrap_or_default();
        if hits.is_empty() {
            println!("  {}", "no results".dimmed());
        }
        for (rank, hit) in hits.iter().enumerate() {
            let title = session.show(&hit.id).map(|d| d.title.as_str()).unwrap_or("");
            println!(
                "  {:>2}. {:<12} {:>8.4}  {}",
                rank + 1,
                hit.id.cyan(),
                hit.score,
                title
            );
        }
    }
    Ok(())
}

const REPL_HELP: &str = "commands:
  query:<text>   retrieve the best matching documents
  show:<id>      print a document
  help           show this help
  exit           leave";

const REPL_PREVIEW_LINES: usize = 5;

/// Line-oriented query loop. Search errors are reported and the loop continues.
pub fn run_repl<R: BufRead, W: Write>(
    session: &SearchSession,
    top_k: usize,
    score_function: ScoreFunction,
    input: R,
    out: &mut W,
) -> Result<()> {
    writeln!(
        out,
        "{} documents loaded ({}). Type 'help' for commands.",
        session.len(),
        session.fingerprint().short()
    )?;
    for line in input.lines() {
        let line = line.context("reading input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        if line == "help" {
            writeln!(out, "{REPL_HELP}")?;
        } else if let Some(text) = line.strip_prefix("query:") {
            match session.retrieve(text.trim(), top_k, score_function) {
                Ok(docs) if docs.is_empty() => writeln!(out, "{}", "no results".dimmed())?,
                Ok(docs) => {
                    for doc in docs {
                        writeln!(out, "{} [{:.4}] {}", doc.id.cyan(), doc.score, doc.title.bold())?;
                        for text_line in doc.text.lines().take(REPL_PREVIEW_LINES) {
                            writeln!(out, "    {text_line}")?;
                        }
                    }
                }
                Err(e) => writeln!(out, "{} {e}", "error:".red())?,
            }
        } else if let Some(id) = line.strip_prefix("show:") {
            let id = id.trim();
            match session.show(id) {
                Some(doc) => writeln!(out, "{}\n{}", doc.title.bold(), doc.text)?,
                None => writeln!(out, "{} no document with id {id}", "error:".red())?,
            }
        } else {
            writeln!(out, "unknown command; type 'help'")?;
        }
    }
    Ok(())
}

fn run_cache_list(config: &RetrieverConfig, json: bool) -> Result<()> {
    let provider = provider_for(config);
    let cache = CorpusEmbeddingCache::new(
        config.cache_root()?,
        provider.provider_id(),
        config.quantization,
    );
    let entries = cache.list()?;
    if json {
        let payload = json!({
            "dir": cache.dir(),
            "embedder": provider.provider_id(),
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("no cached corpora in {}", cache.dir().display());
    }
    for entry in entries {
        println!("{}  {:>10} bytes", entry.fingerprint, entry.size_bytes);
    }
    Ok(())
}
