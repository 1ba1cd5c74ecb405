//! `polixc`: parses a Polix policy file and prints the parsed AST, the
//! normalized constraint set, or evaluates it against a JSON document —
//! mirroring `tlfsc`'s standalone schema-compiler binary.

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use polix_core::{normalize, unify, Scope};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[clap(name = "polixc", about = "Parse, normalize and evaluate Polix policies")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Parse a policy file and print its AST.
    Parse {
        #[clap(short, long)]
        input: PathBuf,
    },
    /// Parse a policy file and print its normalized constraint set, or
    /// report that it is not normalizable.
    Normalize {
        #[clap(short, long)]
        input: PathBuf,
    },
    /// Parse a policy file and evaluate it against a JSON document.
    Evaluate {
        #[clap(short, long)]
        input: PathBuf,
        #[clap(short, long)]
        doc: PathBuf,
    },
    /// Compile the given policy files into a fresh cache and report its
    /// hit/miss/size statistics (diagnostic only; the CLI does not persist a
    /// cache across invocations). Each file is compiled twice so its second
    /// compile is reported as a hit.
    CacheStats {
        #[clap(short, long)]
        input: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Parse { input } => run_parse(&input),
        Command::Normalize { input } => run_normalize(&input),
        Command::Evaluate { input, doc } => run_evaluate(&input, &doc),
        Command::CacheStats { input } => run_cache_stats(&input),
    }
}

fn read_policy(input: &PathBuf) -> Result<polix_ast::AstNode> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("reading policy file {}", input.display()))?;
    polix_parser::parse(&source).with_context(|| format!("parsing {}", input.display()))
}

fn run_parse(input: &PathBuf) -> Result<()> {
    let ast = read_policy(input)?;
    println!("{ast:#?}");
    Ok(())
}

fn run_normalize(input: &PathBuf) -> Result<()> {
    let ast = read_policy(input)?;
    match normalize::normalize(&ast)? {
        Some(set) => println!("{set}"),
        None => println!("not normalizable (contains or/quantifier/let/policy-reference)"),
    }
    Ok(())
}

fn run_evaluate(input: &PathBuf, doc: &PathBuf) -> Result<()> {
    let ast = read_policy(input)?;
    let doc_source = std::fs::read_to_string(doc)
        .with_context(|| format!("reading document file {}", doc.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&doc_source).with_context(|| format!("parsing {}", doc.display()))?;
    let value = polix_ast::Value::from(json);
    let scope = Scope::new(&value);
    let residual = unify::unify(&ast, &scope)?;
    println!("{:?}: {residual}", residual.kind());
    Ok(())
}

fn run_cache_stats(inputs: &[PathBuf]) -> Result<()> {
    let cache = polix_core::PolicyCache::default();
    for input in inputs {
        let ast = read_policy(input)?;
        cache.get_or_compile(&ast, None)?;
        cache.get_or_compile(&ast, None)?;
    }
    let stats = cache.stats();
    println!("size: {}", stats.size);
    println!("hits: {}", stats.hits);
    println!("misses: {}", stats.misses);
    println!("hit rate: {:.2}", stats.hit_rate());
    Ok(())
}
