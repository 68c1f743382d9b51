use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use linescout::search::all_strategies;
use linescout::{bench, DatasetStore, Server, ServerConfig};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the search server
    Serve {
        /// Path to a config file (YAML or INI)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset file (overrides the config file)
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// TCP port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Re-read the dataset from disk on every query
        #[arg(long)]
        reread_on_query: bool,

        /// Search strategy (set|linear|binary|parallel)
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// Send one query to a running server and print the reply
    Query {
        /// The line to look up
        query: String,

        /// Server host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Server port
        #[arg(short, long, default_value = "5555")]
        port: u16,

        /// Connect over TLS, trusting this CA bundle
        #[arg(long)]
        tls_ca: Option<PathBuf>,
    },

    /// Benchmark every search strategy against a dataset
    Bench {
        /// Dataset file to load
        #[arg(short, long)]
        dataset: PathBuf,

        /// Query to time (repeatable; defaults to a built-in mixed set)
        #[arg(short, long)]
        query: Vec<String>,

        /// Passes over the query set per strategy
        #[arg(short, long, default_value = "100")]
        iterations: usize,

        /// Emit the report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            config,
            dataset,
            port,
            reread_on_query,
            strategy,
        } => run_serve(config, dataset, port, reread_on_query, strategy),
        Commands::Query {
            query,
            host,
            port,
            tls_ca,
        } => run_query(&query, &host, port, tls_ca),
        Commands::Bench {
            dataset,
            query,
            iterations,
            json,
        } => run_bench(&dataset, query, iterations, json),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        process::exit(1);
    }
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_serve(
    config_path: Option<PathBuf>,
    dataset: Option<PathBuf>,
    port: Option<u16>,
    reread_on_query: bool,
    strategy: Option<String>,
) -> Result<()> {
    let mut config = match (config_path.as_deref(), &dataset) {
        (Some(path), _) => ServerConfig::load_from(Some(path))
            .with_context(|| format!("loading config from {}", path.display()))?,
        (None, Some(dataset)) => ServerConfig::new(dataset),
        (None, None) => ServerConfig::load().context(
            "no --config or --dataset given and no config file found in the default locations",
        )?,
    };

    // CLI flags take precedence over config file values.
    if let Some(dataset) = dataset {
        config.dataset_path = dataset;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if reread_on_query {
        config.reread_on_query = true;
    }
    if let Some(strategy) = strategy {
        config.strategy = strategy;
    }

    init_logging(&config.log_level);

    let server = Server::bind(config)?;
    info!("Bound {}", server.local_addr()?);
    server.run()?;
    Ok(())
}

fn run_query(query: &str, host: &str, port: u16, tls_ca: Option<PathBuf>) -> Result<()> {
    init_logging("warn");

    let stream = TcpStream::connect((host, port))
        .with_context(|| format!("connecting to {}:{}", host, port))?;

    let started = Instant::now();
    let reply = match tls_ca {
        Some(ca) => {
            let tls_config = linescout::tls::build_client_config(&ca)?;
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                .with_context(|| format!("invalid TLS server name {:?}", host))?;
            let conn = rustls::ClientConnection::new(tls_config, server_name)?;
            let mut tls_stream = rustls::StreamOwned::new(conn, stream);
            exchange(&mut tls_stream, query)?
        }
        None => {
            let mut stream = stream;
            exchange(&mut stream, query)?
        }
    };
    let elapsed = started.elapsed();

    let line = reply.trim_end();
    let painted = if line == "STRING EXISTS" {
        line.green().bold()
    } else if line.starts_with("ERROR") {
        line.red().bold()
    } else {
        line.yellow()
    };
    println!("{}", painted);
    println!("{} {:.2}ms", "time:".dimmed(), elapsed.as_secs_f64() * 1000.0);
    Ok(())
}

/// Sends one terminated query and reads the single reply line.
fn exchange<S: Read + Write>(stream: &mut S, query: &str) -> Result<String> {
    stream.write_all(query.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.is_empty() {
        anyhow::bail!("server closed the connection without a reply");
    }
    Ok(line)
}

fn run_bench(dataset: &PathBuf, queries: Vec<String>, iterations: usize, json: bool) -> Result<()> {
    init_logging("warn");

    let store = DatasetStore::open(dataset, false)?;
    let snapshot = store.snapshot()?;

    let queries = if queries.is_empty() {
        default_queries(&snapshot)
    } else {
        queries
    };

    let strategies = all_strategies();
    let reports = bench::run_benchmark(&snapshot, &queries, &strategies, iterations);

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!(
            "{} lines, {} queries, {} iterations",
            snapshot.len(),
            queries.len(),
            iterations
        );
        println!(
            "{:<10} {:>10} {:>14} {:>10} {:>10}",
            "strategy".bold(),
            "samples".bold(),
            "mean (us)".bold(),
            "min".bold(),
            "max".bold()
        );
        for report in &reports {
            println!(
                "{:<10} {:>10} {:>14.2} {:>10} {:>10}",
                report.strategy,
                report.queries * report.iterations,
                report.mean_micros,
                report.min_micros,
                report.max_micros
            );
        }
    }
    Ok(())
}

/// A mixed hit/miss query set derived from the dataset itself: first and
/// last lines (best/worst case for the linear scan) plus a guaranteed
/// miss.
fn default_queries(snapshot: &linescout::DatasetSnapshot) -> Vec<String> {
    let mut queries = Vec::new();
    if let Some(first) = snapshot.lines().first() {
        queries.push(first.clone());
    }
    if let Some(last) = snapshot.lines().last() {
        queries.push(last.clone());
    }
    queries.push("nonexistent_string".to_string());
    queries
}
