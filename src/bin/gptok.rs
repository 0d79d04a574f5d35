use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use gptok::corpus::{load_corpus, load_text_corpus};
use gptok::serialization::{load_model, save_model};
use gptok::{
    build_from_external_vocab, AllowedSpecial, IngestConfig, RankTable, SplitPattern, TokenId,
    Tokenizer, TokenizerConfig, Trainer, TrainerArtifacts, TrainerConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::ThreadPoolBuilder;
use serde_json::json;

const DEFAULT_OUTPUT: &str = "model.json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Byte-level BPE tokenizer toolkit", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a new model from text files
    Train(TrainArgs),
    /// Rebuild a model from a tiktoken rank file
    Recover(RecoverArgs),
    /// Encode text with a saved model
    Encode(EncodeArgs),
    /// Decode token ids with a saved model
    Decode(DecodeArgs),
    /// Inspect model metadata
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Files or directories to ingest
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output path for the model file
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Target vocabulary size (including the 256 byte tokens)
    #[arg(long, value_name = "SIZE", default_value_t = 512)]
    vocab_size: usize,

    /// Minimum frequency for merges
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    min_frequency: usize,

    /// Maximum merge iterations
    #[arg(long, value_name = "COUNT")]
    max_merge_iterations: Option<usize>,

    /// Split pattern: gpt2, gpt4, or a custom regex
    #[arg(long, value_name = "PATTERN", default_value = "gpt4")]
    split: SplitPattern,

    /// Train on raw file bytes without pre-tokenization
    #[arg(long)]
    raw: bool,

    /// Special token literal, assigned the next free id (repeat flag)
    #[arg(long = "special-token", value_name = "TOKEN")]
    special_tokens: Vec<String>,

    /// Also write the vocabulary as a tiktoken rank file
    #[arg(long, value_name = "PATH")]
    export_ranks: Option<PathBuf>,

    /// Disable per-iteration logging/progress
    #[arg(long)]
    no_progress: bool,

    /// Emit pretty JSON
    #[arg(long)]
    pretty: bool,

    /// Limit Rayon worker threads
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Disable recursive directory traversal
    #[arg(long)]
    no_recursive: bool,

    /// Follow symlinks during traversal
    #[arg(long)]
    follow_symlinks: bool,
}

#[derive(Args, Debug)]
struct RecoverArgs {
    /// tiktoken rank file (`base64(token) rank` per line)
    ranks: PathBuf,

    /// Output path for the model file
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Split pattern: gpt2, gpt4, or a custom regex
    #[arg(long, value_name = "PATTERN", default_value = "gpt4")]
    split: SplitPattern,

    /// Special token as LITERAL=ID (repeat flag)
    #[arg(long = "special-token", value_name = "LITERAL=ID")]
    special_tokens: Vec<String>,

    /// Emit pretty JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Model file to load
    #[arg(short = 'm', long, value_name = "PATH")]
    model: PathBuf,

    /// Text to encode; reads --input or stdin when omitted
    text: Option<String>,

    /// Read the text from a file
    #[arg(long, value_name = "PATH", conflicts_with = "text")]
    input: Option<PathBuf>,

    /// Special token policy: all, none, none_raise, or a comma-separated list
    #[arg(long, value_name = "POLICY", default_value = "all")]
    allowed_special: String,

    /// Emit a JSON object instead of space-separated ids
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Model file to load
    #[arg(short = 'm', long, value_name = "PATH")]
    model: PathBuf,

    /// Token ids to decode
    tokens: Vec<TokenId>,

    /// Read whitespace or comma separated ids from a file
    #[arg(long, value_name = "PATH", conflicts_with = "tokens")]
    input: Option<PathBuf>,

    /// Write decoded bytes to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Model file to inspect
    #[arg(short = 'm', long, value_name = "PATH")]
    model: PathBuf,

    /// Emit JSON output
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Recover(args) => run_recover(args),
        Commands::Encode(args) => run_encode(args),
        Commands::Decode(args) => run_decode(args),
        Commands::Info(args) => run_info(args),
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use log::LevelFilter;

    let level = if quiet > 0 {
        match quiet {
            1 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        }
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}

fn run_train(args: TrainArgs) -> Result<()> {
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("unable to configure Rayon thread pool")?;
    }

    let trainer_cfg = TrainerConfig::builder()
        .target_vocab_size(args.vocab_size)
        .min_frequency(args.min_frequency)
        .max_merge_iterations(args.max_merge_iterations)
        .show_progress(!args.no_progress)
        .build()?;
    let ingest_cfg = IngestConfig {
        recursive: !args.no_recursive,
        follow_symlinks: args.follow_symlinks,
    };

    let spinner = if args.no_progress {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner} training merges... {elapsed}")?
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        Some(pb)
    };

    let trainer = Trainer::new(trainer_cfg);
    let start = Instant::now();
    let (artifacts, corpus_bytes) = if args.raw {
        let sequences =
            load_corpus(&args.inputs, &ingest_cfg).context("failed to load training corpus")?;
        let corpus_bytes: usize = sequences.iter().map(Vec::len).sum();
        info!("loaded {} files totalling {corpus_bytes} bytes", sequences.len());
        (trainer.train_from_sequences(&sequences)?, corpus_bytes)
    } else {
        let texts = load_text_corpus(&args.inputs, &ingest_cfg)
            .context("failed to load training corpus")?;
        let corpus_bytes: usize = texts.iter().map(String::len).sum();
        info!("loaded {} files totalling {corpus_bytes} bytes", texts.len());
        (trainer.train_texts(&texts, &args.split)?, corpus_bytes)
    };
    if let Some(pb) = spinner {
        pb.finish_with_message("training complete");
    }
    let elapsed = start.elapsed();

    let first_special = artifacts.model.vocab().max_id() + 1;
    let special_tokens: BTreeMap<String, TokenId> = args
        .special_tokens
        .iter()
        .zip(first_special..)
        .map(|(literal, id)| (literal.clone(), id))
        .collect();
    let tokenizer_cfg = TokenizerConfig::builder()
        .split_pattern(args.split.clone())
        .special_tokens(special_tokens)
        .build()?;
    // Validates the special tokens against the trained vocabulary before saving.
    Tokenizer::new(artifacts.model.clone(), tokenizer_cfg.clone())?;

    save_model(&artifacts.model, &tokenizer_cfg, &args.output, args.pretty)
        .with_context(|| format!("failed to save model to {}", args.output.display()))?;
    if let Some(path) = &args.export_ranks {
        let table = RankTable::from_model(&artifacts.model);
        fs::write(path, table.to_tiktoken())
            .with_context(|| format!("failed to write rank file {}", path.display()))?;
    }

    report_training(&artifacts, corpus_bytes, elapsed, &args.output);
    Ok(())
}

fn report_training(artifacts: &TrainerArtifacts, corpus_bytes: usize, elapsed: Duration, output: &Path) {
    let merges = artifacts.model.merges().len();
    let vocab_size = artifacts.model.vocab_size();
    info!(
        "training complete: merges={merges} vocab={vocab_size} duration={elapsed:.2?} stop={:?}",
        artifacts.metrics.stop_reason
    );
    println!(
        "wrote model with vocab {} ({} merges) to {}",
        vocab_size,
        merges,
        output.display()
    );
    println!(
        "   corpus {} bytes | duration {:.2?} | compression {:.2}x",
        corpus_bytes,
        elapsed,
        artifacts.metrics.compression_ratio()
    );
}

fn run_recover(args: RecoverArgs) -> Result<()> {
    let table = RankTable::from_tiktoken_file(&args.ranks)
        .with_context(|| format!("failed to read rank file {}", args.ranks.display()))?;
    let model = build_from_external_vocab(&table)
        .with_context(|| format!("failed to recover merges from {}", args.ranks.display()))?;
    let mut special_tokens = BTreeMap::new();
    for entry in &args.special_tokens {
        let (literal, id) = parse_special_assignment(entry)?;
        special_tokens.insert(literal, id);
    }
    let config = TokenizerConfig::builder()
        .split_pattern(args.split.clone())
        .special_tokens(special_tokens)
        .compatibility_mode(true)
        .build()?;
    Tokenizer::new(model.clone(), config.clone())?;
    save_model(&model, &config, &args.output, args.pretty)
        .with_context(|| format!("failed to save model to {}", args.output.display()))?;
    println!(
        "recovered {} merges from {} ranks into {}",
        model.merges().len(),
        table.len(),
        args.output.display()
    );
    Ok(())
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    let tokenizer = load_tokenizer(&args.model)?;
    let text = match (&args.text, &args.input) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
        }
        (None, None) => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };
    let allowed = parse_allowed_special(&args.allowed_special)?;
    let tokens = tokenizer.encode(&text, &allowed)?;

    if args.json {
        let record = json!({ "tokens": tokens, "count": tokens.len() });
        println!("{}", serde_json::to_string(&record)?);
    } else {
        let rendered: Vec<String> = tokens.iter().map(ToString::to_string).collect();
        println!("{}", rendered.join(" "));
    }
    Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let tokenizer = load_tokenizer(&args.model)?;
    let tokens = if let Some(input_path) = &args.input {
        let contents = fs::read_to_string(input_path)
            .with_context(|| format!("failed to read {}", input_path.display()))?;
        parse_token_list(&contents)?
    } else {
        args.tokens
    };

    let text = tokenizer.decode(&tokens)?;
    if let Some(path) = &args.output {
        fs::write(path, text.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {} bytes to {}", text.len(), path.display());
    } else {
        io::stdout().write_all(text.as_bytes())?;
    }
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let (model, config) = load_model(&args.model)
        .with_context(|| format!("failed to load model from {}", args.model.display()))?;
    let summary = json!({
        "path": args.model.display().to_string(),
        "vocab_size": model.vocab_size(),
        "merges": model.merges().len(),
        "split_pattern": config.split_pattern.to_string(),
        "byte_remap": model.byte_remap().is_some(),
        "compatibility_mode": config.compatibility_mode,
        "special_tokens": config.special_tokens,
    });

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("model: {}", args.model.display());
        println!("vocab size: {}", model.vocab_size());
        println!("merges: {}", model.merges().len());
        println!("split pattern: {}", config.split_pattern);
        println!("compatibility mode: {}", config.compatibility_mode);
        for (literal, id) in &config.special_tokens {
            println!("special token: {literal} = {id}");
        }
    }
    Ok(())
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let (model, config) =
        load_model(path).with_context(|| format!("failed to load model from {}", path.display()))?;
    Ok(Tokenizer::new(model, config)?)
}

fn parse_allowed_special(value: &str) -> Result<AllowedSpecial> {
    match value {
        "all" | "none" | "none_raise" => Ok(value.parse::<AllowedSpecial>()?),
        list => {
            let literals: Vec<&str> = list.split(',').filter(|s| !s.is_empty()).collect();
            if literals.is_empty() {
                bail!("--allowed-special needs a policy or at least one literal");
            }
            Ok(AllowedSpecial::exactly(literals))
        }
    }
}

fn parse_special_assignment(entry: &str) -> Result<(String, TokenId)> {
    let (literal, id) = entry
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("special token {entry:?} must look like LITERAL=ID"))?;
    let id = id
        .trim()
        .parse::<TokenId>()
        .with_context(|| format!("invalid id in special token {entry:?}"))?;
    Ok((literal.to_string(), id))
}

fn parse_token_list(contents: &str) -> Result<Vec<TokenId>> {
    contents
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            piece
                .parse::<TokenId>()
                .with_context(|| format!("invalid token id {piece:?}"))
        })
        .collect()
}
