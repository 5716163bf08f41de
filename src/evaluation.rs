// src/evaluation.rs - corpus BLEU over a capped sample of validation pairs
use anyhow::Result;
use tch::Device;

use crate::beam_search::{translate, BeamConfig};
use crate::data_loader::Example;
use crate::metrics::corpus_bleu;
use crate::model::Seq2Seq;
use crate::tokenizer::{DualVocab, UNK_TOKEN};

pub struct Evaluator<'a> {
    examples: &'a [Example],
    vocabs: &'a DualVocab,
    max_samples: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(examples: &'a [Example], vocabs: &'a DualVocab, max_samples: usize) -> Self {
        Self { examples, vocabs, max_samples }
    }

    /// Reference/hypothesis pairs produced by `translate_fn` on the first `max_samples`
    /// usable examples. Pairs with an empty side after stripping markers are skipped;
    /// empty hypotheses become a single `<unk>`.
    pub fn collect_pairs<F>(&self, mut translate_fn: F) -> Result<(Vec<Vec<String>>, Vec<Vec<String>>)>
    where
        F: FnMut(&[String]) -> Result<Vec<String>>,
    {
        let mut refs = Vec::new();
        let mut hyps = Vec::new();

        for example in self.examples {
            if refs.len() >= self.max_samples {
                break;
            }

            let src = self.vocabs.source.strip_special(&example.src);
            let reference = self.vocabs.target.strip_special(&example.tgt);
            if src.is_empty() || reference.is_empty() {
                continue;
            }

            let mut hypothesis = translate_fn(&src)?;
            if hypothesis.is_empty() {
                hypothesis.push(UNK_TOKEN.to_string());
            }

            refs.push(reference);
            hyps.push(hypothesis);
        }

        Ok((refs, hyps))
    }

    pub fn evaluate_with<F>(&self, translate_fn: F) -> Result<f64>
    where
        F: FnMut(&[String]) -> Result<Vec<String>>,
    {
        let (refs, hyps) = self.collect_pairs(translate_fn)?;
        if refs.is_empty() {
            return Ok(0.0);
        }
        log::debug!("Scoring {} validation pairs", refs.len());
        Ok(corpus_bleu(&refs, &hyps))
    }

    /// Beam-search every sampled source sentence with `model` and score the corpus.
    pub fn evaluate(&self, model: &Seq2Seq, cfg: &BeamConfig, device: Device) -> Result<f64> {
        self.evaluate_with(|src| translate(model, self.vocabs, src, cfg, device))
    }
}
