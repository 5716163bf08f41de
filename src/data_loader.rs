// src/data_loader.rs
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::tokenizer::{tokenize, DualVocab, PAD_ID};

/// Parallel corpus loaded from a headerless `source<TAB>target` file.
pub struct DataLoader {
    data: Vec<(String, String)>, // (assamese, english)
    skipped: usize,
}

/// Length statistics over a set of pairs (whitespace tokens).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CorpusStats {
    pub pairs: usize,
    pub avg_src_len: f64,
    pub avg_tgt_len: f64,
    /// Pairs where either side has fewer than 2 tokens.
    pub short_pairs: usize,
}

impl DataLoader {
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open dataset {}", path.display()))?;
        Ok(Self::from_reader(file))
    }

    /// Malformed lines (wrong field count, unreadable, empty side) are skipped, not fatal.
    pub fn from_reader<R: Read>(reader: R) -> Self {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut data = Vec::new();
        let mut skipped = 0usize;

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("Skipping unreadable line: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            if record.len() != 2 {
                skipped += 1;
                continue;
            }

            let source = record[0].trim();
            let target = record[1].trim();
            if source.is_empty() || target.is_empty() {
                skipped += 1;
                continue;
            }

            data.push((source.to_string(), target.to_string()));
        }

        if skipped > 0 {
            log::warn!("Skipped {} malformed line(s)", skipped);
        }

        Self { data, skipped }
    }

    pub fn num_samples(&self) -> usize {
        self.data.len()
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    pub fn get_all_data(&self) -> &[(String, String)] {
        &self.data
    }

    pub fn source_unique_count(&self) -> usize {
        self.data.iter().map(|(s, _)| s).collect::<HashSet<_>>().len()
    }

    pub fn target_unique_count(&self) -> usize {
        self.data.iter().map(|(_, t)| t).collect::<HashSet<_>>().len()
    }

    /// Shuffle with `rng`, then hold out `val_ratio` of the pairs for validation.
    pub fn train_val_split<R: Rng>(
        &self,
        val_ratio: f64,
        rng: &mut R,
    ) -> (Vec<(String, String)>, Vec<(String, String)>) {
        let mut data = self.data.clone();
        data.shuffle(rng);

        let n_val = (data.len() as f64 * val_ratio).ceil() as usize;
        let split_idx = data.len() - n_val.min(data.len());
        let val = data.split_off(split_idx);
        (data, val)
    }
}

pub fn corpus_stats(pairs: &[(String, String)]) -> CorpusStats {
    if pairs.is_empty() {
        return CorpusStats::default();
    }

    let lengths: Vec<(usize, usize)> = pairs
        .iter()
        .map(|(s, t)| (tokenize(s).len(), tokenize(t).len()))
        .collect();

    let n = lengths.len() as f64;
    CorpusStats {
        pairs: lengths.len(),
        avg_src_len: lengths.iter().map(|&(s, _)| s as f64).sum::<f64>() / n,
        avg_tgt_len: lengths.iter().map(|&(_, t)| t as f64).sum::<f64>() / n,
        short_pairs: lengths.iter().filter(|&&(s, t)| s < 2 || t < 2).count(),
    }
}

/// One numericalised pair, both sides wrapped in `<sos>`/`<eos>` and truncated.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub src: Vec<i64>,
    pub tgt: Vec<i64>,
}

pub fn build_examples(pairs: &[(String, String)], vocabs: &DualVocab, max_len: usize) -> Vec<Example> {
    pairs
        .par_iter()
        .map(|(src, tgt)| Example {
            src: vocabs.source.encode_with_special_tokens(src, max_len),
            tgt: vocabs.target.encode_with_special_tokens(tgt, max_len),
        })
        .collect()
}

/// Right-pad every sequence to the longest one. Returns the row-major buffer and the width.
pub fn pad_sequences(seqs: &[&[i64]], pad_id: i64) -> (Vec<i64>, usize) {
    let width = seqs.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut data = Vec::with_capacity(seqs.len() * width);
    for seq in seqs {
        data.extend_from_slice(seq);
        data.extend(std::iter::repeat(pad_id).take(width - seq.len()));
    }
    (data, width)
}

/// Padded `(src, tgt)` buffers for one batch, `(rows, src_width, tgt_width)` alongside.
pub struct PaddedBatch {
    pub src: Vec<i64>,
    pub tgt: Vec<i64>,
    pub rows: usize,
    pub src_len: usize,
    pub tgt_len: usize,
}

pub fn collate(batch: &[&Example]) -> PaddedBatch {
    let srcs: Vec<&[i64]> = batch.iter().map(|e| e.src.as_slice()).collect();
    let tgts: Vec<&[i64]> = batch.iter().map(|e| e.tgt.as_slice()).collect();
    let ((src, src_len), (tgt, tgt_len)) =
        rayon::join(|| pad_sequences(&srcs, PAD_ID), || pad_sequences(&tgts, PAD_ID));
    PaddedBatch { src, tgt, rows: batch.len(), src_len, tgt_len }
}

/// Example order for one epoch, optionally shuffled.
pub fn epoch_order<R: Rng>(n: usize, shuffle: bool, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    if shuffle {
        order.shuffle(rng);
    }
    order
}
