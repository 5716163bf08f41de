// src/main.rs - Assamese → English training run
use anyhow::{bail, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use tch::{nn, Device};

use asm_en_nmt::beam_search::{translate, BeamConfig};
use asm_en_nmt::config::Hyperparams;
use asm_en_nmt::data_loader::{build_examples, corpus_stats, DataLoader};
use asm_en_nmt::metrics::sentence_bleu;
use asm_en_nmt::model::{select_device, Seq2Seq};
use asm_en_nmt::tokenizer::{tokenize, DualVocab, PAD_ID};
use asm_en_nmt::training::Trainer;

#[derive(Parser, Debug)]
#[command(name = "asm-en-nmt", about = "Train an Assamese → English attention translator")]
struct Args {
    /// Tab-separated parallel corpus (source<TAB>target, no header)
    #[arg(long, default_value = "data/as-en.tsv")]
    data: PathBuf,

    /// Hyperparameter file (.toml or .json)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    beam_width: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Where to keep the best checkpoint
    #[arg(long, default_value = "best_model.ot")]
    save: PathBuf,

    /// Validation sentences to translate after training
    #[arg(long, default_value_t = 5)]
    samples: usize,

    /// Stay on the CPU even if CUDA is available
    #[arg(long)]
    cpu: bool,
}

fn load_params(args: &Args) -> Result<Hyperparams> {
    let mut params = match &args.config {
        Some(path) => Hyperparams::from_path(path)?,
        None => Hyperparams::default(),
    };
    if let Some(epochs) = args.epochs {
        params.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        params.batch_size = batch_size;
    }
    if let Some(beam_width) = args.beam_width {
        params.beam_width = beam_width;
    }
    if let Some(seed) = args.seed {
        params.seed = seed;
    }
    params.validate()?;
    Ok(params)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let params = load_params(&args)?;

    println!("========================================");
    println!("  Neural Machine Translation with Attention");
    println!("  Task: Assamese → English");
    println!("========================================\n");

    let device = select_device(args.cpu);
    match device {
        Device::Cuda(_) => println!("✓ CUDA device detected"),
        _ => println!("✓ Using CPU"),
    }
    println!("✓ CPU cores: {}\n", num_cpus::get());

    println!("Loading translation data from {}...", args.data.display());
    let data_loader = DataLoader::from_tsv(&args.data)?;
    if data_loader.num_samples() == 0 {
        bail!("No usable sentence pairs in {}", args.data.display());
    }

    let stats = corpus_stats(data_loader.get_all_data());
    println!("✓ Loaded {} sentence pairs ({} lines skipped)", stats.pairs, data_loader.skipped_lines());
    println!("✓ Unique source sentences: {}", data_loader.source_unique_count());
    println!("✓ Unique target sentences: {}", data_loader.target_unique_count());
    println!("✓ Avg source length: {:.1} tokens", stats.avg_src_len);
    println!("✓ Avg target length: {:.1} tokens", stats.avg_tgt_len);
    println!("✓ Pairs shorter than 2 tokens: {}\n", stats.short_pairs);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let (train_pairs, val_pairs) = data_loader.train_val_split(params.val_ratio, &mut rng);
    println!("✓ Training pairs: {}", train_pairs.len());
    println!("✓ Validation pairs: {}\n", val_pairs.len());

    println!("Building vocabularies (min_freq = {})...", params.min_freq);
    let vocabs = DualVocab::fit(&train_pairs, params.min_freq)?;
    let src_vocab_size = vocabs.source_vocab_size() as i64;
    let tgt_vocab_size = vocabs.target_vocab_size() as i64;
    println!("✓ Source vocabulary size: {}", src_vocab_size);
    println!("✓ Target vocabulary size: {}\n", tgt_vocab_size);

    let train_examples = build_examples(&train_pairs, &vocabs, params.max_len);
    let val_examples = build_examples(&val_pairs, &vocabs, params.max_len);

    println!("Initializing encoder-decoder...");
    tch::manual_seed(params.seed as i64);
    let mut vs = nn::VarStore::new(device);
    vs.set_kind(tch::Kind::Float);
    let model = Seq2Seq::from_params(&vs.root(), &params, src_vocab_size, tgt_vocab_size, PAD_ID);
    println!("✓ Model out_vocab_dim: {}", model.out_vocab_dim());

    let total_params: i64 = vs
        .trainable_variables()
        .iter()
        .map(|t| t.size().iter().product::<i64>())
        .sum();
    println!("✓ Model initialized with {} trainable parameters\n", total_params);

    let mut trainer = Trainer::new(model, vs, params.clone(), device)?.with_checkpoint(&args.save);

    println!("Starting training...");
    println!("{}\n", "=".repeat(50));
    let history = trainer.train(&train_examples, &val_examples, &vocabs)?;

    println!("\n{}", "=".repeat(50));
    println!("Epoch | Train Loss | Val BLEU | LR");
    for s in &history {
        println!("{:5} | {:10.3} | {:8.2} | {:.6}", s.epoch, s.train_loss, s.val_bleu * 100.0, s.lr);
    }
    println!("{}", "=".repeat(50));
    println!("✓ Best checkpoint: {}", args.save.display());

    println!("\nTesting translation on validation samples...");
    println!("{}\n", "=".repeat(50));
    sample_translations(&trainer, &val_pairs, &vocabs, &BeamConfig::from_params(&params), device, args.samples, &mut rng)?;

    Ok(())
}

fn sample_translations(
    trainer: &Trainer,
    val_pairs: &[(String, String)],
    vocabs: &DualVocab,
    cfg: &BeamConfig,
    device: Device,
    n: usize,
    rng: &mut StdRng,
) -> Result<()> {
    let samples: Vec<_> = val_pairs.choose_multiple(rng, n).collect();
    if samples.is_empty() {
        return Ok(());
    }

    let mut total_bleu = 0.0;
    for (i, (source, reference)) in samples.iter().enumerate() {
        let hypothesis = translate(trainer.model(), vocabs, &tokenize(source), cfg, device)?;
        let bleu = sentence_bleu(&tokenize(reference), &hypothesis.iter().map(String::as_str).collect::<Vec<_>>());

        println!("--- Sample {} ---", i + 1);
        println!("Source:    {}", source);
        println!("Reference: {}", reference);
        println!("Generated: {}", hypothesis.join(" "));
        println!("BLEU:      {:.4}", bleu);
        println!("{}", "-".repeat(50));

        total_bleu += bleu;
    }

    println!("\nAverage sentence BLEU: {:.4}", total_bleu / samples.len() as f64);
    Ok(())
}
