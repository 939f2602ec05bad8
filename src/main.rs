//! Fleetquery CLI
//!
//! Command-line interface for the fleet query engine:
//! - Run, explain and parse questions
//! - Browse fields, sensors and templates
//! - Interactive shell

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fleetquery::config::{generate_default_config, Config, SourceKind};
use fleetquery::engine::{EngineOptions, QueryEngine, QueryOptions};
use fleetquery::query::{self, OutputFormat, ResultSet};
use fleetquery::source::{load_records, sample_records};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fleetquery")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ask questions about your machine fleet")]
#[command(long_about = "Fleetquery answers constrained English questions about managed machines.\nExample: fleetquery query 'Get Computer Name from group \"laptops\"'")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    /// JSON or CSV file of machine records
    #[arg(short, long, global = true)]
    pub data: Option<PathBuf>,

    /// Query a generated fleet of this many machines
    #[arg(long, global = true, conflicts_with = "data")]
    pub generate: Option<usize>,

    /// Seed for the generated fleet
    #[arg(long, global = true)]
    pub seed: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a question
    Query {
        question: String,
        /// Cache owner
        #[arg(long)]
        owner: Option<String>,
        /// Skip the result cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Show the execution plan of a question
    Explain { question: String },

    /// Print the parsed query as JSON
    Parse { question: String },

    /// Print the tokens of a question
    Tokens { question: String },

    /// List queryable fields
    Fields,

    /// List the sensor catalog
    Sensors {
        /// Only this category (Core, Performance, Governance, Metadata)
        #[arg(long)]
        category: Option<String>,
    },

    /// List query templates
    Templates,

    /// Run a query template
    Template {
        /// Template id
        id: String,
        /// Parameters in key=value format
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
    },

    /// Interactive shell
    Repl,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fleetquery={}", config.logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so query output stays pipeable
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    if let Some(path) = &cli.data {
        config.source.kind = SourceKind::from_path(path)
            .with_context(|| format!("Unsupported data file (expected .json or .csv): {:?}", path))?;
        config.source.path = Some(path.clone());
    }
    if let Some(count) = cli.generate {
        config.source.kind = SourceKind::Generated;
        config.source.count = count;
    }
    if cli.seed.is_some() {
        config.source.seed = cli.seed;
    }
    Ok(config)
}

async fn build_engine(config: &Config, format: OutputFormat) -> QueryEngine {
    let records = match load_records(&config.source).await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, source = %config.source.kind, "Falling back to sample records");
            sample_records()
        }
    };

    QueryEngine::builder()
        .records(records)
        .options(EngineOptions::from_config(config, format))
        .build()
}

fn render(result: &ResultSet, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Table => result.to_table(),
        OutputFormat::Csv => match (&result.csv, result.ok) {
            (Some(csv), _) => csv.clone(),
            (None, true) => result.to_csv(),
            (None, false) => result.to_table(),
        },
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
    })
}

fn print_result(result: &ResultSet, format: OutputFormat) -> anyhow::Result<()> {
    println!("{}", render(result, format)?);
    if format == OutputFormat::Table {
        for warning in &result.warnings {
            eprintln!("warning: {}", warning.message);
        }
    }
    Ok(())
}

fn parse_params(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => Ok((key.trim().to_string(), value.to_string())),
            None => bail!("Invalid parameter (expected key=value): {}", pair),
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_tracing(&config);
    tracing::debug!("Fleetquery v{}", env!("CARGO_PKG_VERSION"));

    let format = cli.format;

    match cli.command {
        Commands::Parse { question } => {
            let ast = query::parse(&question)?;
            println!("{}", serde_json::to_string_pretty(&ast)?);
        }

        Commands::Tokens { question } => {
            for token in query::tokenize(&question)? {
                println!(
                    "{:<4} {:<16} {:?}",
                    token.position,
                    format!("{:?}", token.token_type),
                    token.value
                );
            }
        }

        Commands::Fields => {
            for name in query::fields::all_field_names() {
                println!("{}", name);
            }
        }

        Commands::Sensors { category } => {
            let sensors: Vec<_> = match &category {
                Some(c) => query::fields::sensors_by_category(c),
                None => query::fields::SENSORS_CATALOG.iter().collect(),
            };
            println!("{:<20} {:<12} {:<8} {}", "Name", "Category", "Type", "Description");
            println!("{}", "-".repeat(80));
            for s in sensors {
                println!(
                    "{:<20} {:<12} {:<8} {}",
                    s.name,
                    s.category,
                    format!("{:?}", s.field_type),
                    s.description
                );
            }
        }

        // Written before the config was loaded
        Commands::Config { .. } => {}

        command => {
            let engine = build_engine(&config, format).await;
            run_engine_command(&engine, command, format).await?;
        }
    }

    Ok(())
}

async fn run_engine_command(
    engine: &QueryEngine,
    command: Commands,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        Commands::Query {
            question,
            owner,
            no_cache,
        } => {
            let options = QueryOptions {
                use_cache: !no_cache,
                owner,
                format: Some(format),
            };
            let result = engine.query(&question, &options).await;
            print_result(&result, format)?;
            if !result.ok {
                std::process::exit(1);
            }
        }

        Commands::Explain { question } => {
            let result = engine.explain(&question).await?;
            print_result(&result, format)?;
        }

        Commands::Templates => {
            println!("{:<20} {:<12} {:<4} {}", "ID", "Category", "Lvl", "Name");
            println!("{}", "-".repeat(60));
            for t in engine.list_templates() {
                println!("{:<20} {:<12} {:<4} {}", t.id, t.category, t.difficulty, t.name);
            }
        }

        Commands::Template { id, params } => {
            let params = parse_params(&params)?;
            let options = QueryOptions {
                format: Some(format),
                ..Default::default()
            };
            let result = engine.run_template(&id, &params, &options).await?;
            print_result(&result, format)?;
            if !result.ok {
                std::process::exit(1);
            }
        }

        Commands::Repl => repl(engine, format).await?,

        _ => {}
    }
    Ok(())
}

const REPL_HELP: &str = "\
Enter a question, or one of:
  .explain <question>   show the execution plan
  .save <name> = <question>
  .run <name>           run a saved query
  .saved                list saved queries
  .stats                cache statistics
  .clear                clear caches
  .quit                 exit";

async fn repl(engine: &QueryEngine, format: OutputFormat) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let options = QueryOptions {
        format: Some(format),
        ..Default::default()
    };

    println!("Fleetquery v{} ({} machines)", env!("CARGO_PKG_VERSION"), engine.data().await.len());
    println!("Type .help for commands");

    loop {
        stdout.write_all(b"fleetquery> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => continue,
            (".quit" | ".exit", _) => break,
            (".help", _) => println!("{}", REPL_HELP),
            (".stats", _) => {
                println!("{}", serde_json::to_string_pretty(&engine.cache_statistics())?)
            }
            (".clear", _) => {
                engine.clear_cache();
                println!("Caches cleared");
            }
            (".saved", _) => {
                for saved in engine.list_saved_queries() {
                    println!("{:<20} {:>4} runs  {}", saved.name, saved.execution_count, saved.question);
                }
            }
            (".save", rest) => match rest.split_once('=') {
                Some((name, question)) => {
                    let saved = engine.save_query(name.trim(), question.trim(), None);
                    println!("Saved '{}'", saved.name);
                }
                None => eprintln!("Usage: .save <name> = <question>"),
            },
            (".run", name) => match engine.run_saved_query(name.trim(), &options).await {
                Ok(result) => print_result(&result, format)?,
                Err(e) => eprintln!("{}", e),
            },
            (".explain", question) => match engine.explain(question).await {
                Ok(result) => print_result(&result, format)?,
                Err(e) => eprintln!("{}", e),
            },
            _ => {
                let result = engine.query(line, &options).await;
                print_result(&result, format)?;
            }
        }
    }

    let stats = engine.cache_statistics();
    println!(
        "Cache: {} parsed, {} results, {:.1}% hit rate",
        stats.parsed.size,
        stats.results.size,
        stats.total_hit_rate * 100.0
    );
    Ok(())
}
