// src/beam_search.rs - length-normalised beam search over a step scorer
use anyhow::Result;
use std::cmp::Ordering;
use std::rc::Rc;
use tch::{nn::LSTMState, Device, Kind, Tensor};

use crate::config::Hyperparams;
use crate::model::Seq2Seq;
use crate::tokenizer::DualVocab;
use crate::tokenizer::{EOS_ID, EOS_TOKEN, SOS_ID, SOS_TOKEN};

/// One decoder step for a single hypothesis: log-probabilities over the target
/// vocabulary for the token after `last_token`, plus the state after consuming it.
pub trait StepScorer {
    type State;

    fn step(&self, last_token: i64, state: &Self::State) -> Result<(Vec<f64>, Self::State)>;
}

#[derive(Debug, Clone, Copy)]
pub struct BeamConfig {
    pub beam_width: usize,
    pub max_len: usize,
    pub length_penalty: f64,
}

impl BeamConfig {
    pub fn from_params(params: &Hyperparams) -> Self {
        Self {
            beam_width: params.beam_width,
            max_len: params.max_decode_len,
            length_penalty: params.length_penalty,
        }
    }
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self { beam_width: 5, max_len: 50, length_penalty: 0.6 }
    }
}

struct Hypothesis<S> {
    score: f64,
    tokens: Vec<i64>,
    state: Rc<S>,
}

fn normalized(score: f64, len: usize, length_penalty: f64) -> f64 {
    score / (len as f64).powf(length_penalty)
}

/// Indices of the `k` largest entries, best first; equal values go to the lower index.
pub fn top_k(log_probs: &[f64], k: usize) -> Vec<(i64, f64)> {
    let desc = |a: &usize, b: &usize| -> Ordering {
        log_probs[*b].total_cmp(&log_probs[*a]).then(a.cmp(b))
    };

    let k = k.min(log_probs.len());
    if k == 0 {
        return Vec::new();
    }
    let mut idx: Vec<usize> = (0..log_probs.len()).collect();
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, desc);
        idx.truncate(k);
    }
    idx.sort_by(desc);
    idx.into_iter().map(|i| (i as i64, log_probs[i])).collect()
}

/// Drop the leading start marker, cut at the first end marker, and drop any stray start marker.
fn finalize(tokens: &[i64], sos: i64, eos: i64) -> Vec<i64> {
    tokens
        .iter()
        .skip(1)
        .take_while(|&&t| t != eos)
        .filter(|&&t| t != sos)
        .copied()
        .collect()
}

/// Beam search from `init_state`. Returns the best sequence without start/end markers,
/// or an empty sequence when nothing completed.
pub fn beam_search<S: StepScorer>(
    scorer: &S,
    init_state: S::State,
    sos: i64,
    eos: i64,
    cfg: &BeamConfig,
) -> Result<Vec<i64>> {
    let mut beams = vec![Hypothesis { score: 0.0, tokens: vec![sos], state: Rc::new(init_state) }];
    let mut completed: Vec<(f64, Vec<i64>)> = Vec::new();

    for _ in 0..cfg.max_len {
        let mut candidates = Vec::with_capacity(beams.len() * cfg.beam_width);

        for beam in beams {
            if beam.tokens.last() == Some(&eos) {
                completed.push((beam.score, beam.tokens));
                continue;
            }

            let last = *beam.tokens.last().unwrap_or(&sos);
            let (log_probs, next_state) = scorer.step(last, &beam.state)?;
            let next_state = Rc::new(next_state);

            for (token, log_prob) in top_k(&log_probs, cfg.beam_width) {
                let mut tokens = Vec::with_capacity(beam.tokens.len() + 1);
                tokens.extend_from_slice(&beam.tokens);
                tokens.push(token);
                candidates.push(Hypothesis {
                    score: beam.score + log_prob,
                    tokens,
                    state: Rc::clone(&next_state),
                });
            }
        }

        // stable: ties keep expansion order
        candidates.sort_by(|a, b| {
            let na = normalized(a.score, a.tokens.len(), cfg.length_penalty);
            let nb = normalized(b.score, b.tokens.len(), cfg.length_penalty);
            nb.total_cmp(&na)
        });
        candidates.truncate(cfg.beam_width);
        beams = candidates;

        if beams.is_empty() {
            break;
        }
    }

    completed.extend(beams.into_iter().map(|b| (b.score, b.tokens)));

    let mut best: Option<(f64, &Vec<i64>)> = None;
    for (score, tokens) in &completed {
        let norm = normalized(*score, tokens.len(), cfg.length_penalty);
        if best.map_or(true, |(b, _)| norm > b) {
            best = Some((norm, tokens));
        }
    }

    Ok(best.map(|(_, tokens)| finalize(tokens, sos, eos)).unwrap_or_default())
}

/// Highest-probability token at every step until `eos` or `max_len` tokens.
pub fn greedy_decode<S: StepScorer>(
    scorer: &S,
    init_state: S::State,
    sos: i64,
    eos: i64,
    max_len: usize,
) -> Result<Vec<i64>> {
    let mut tokens = vec![sos];
    let mut state = init_state;

    for _ in 0..max_len {
        let last = *tokens.last().unwrap_or(&sos);
        let (log_probs, next_state) = scorer.step(last, &state)?;
        state = next_state;

        let Some(&(token, _)) = top_k(&log_probs, 1).first() else {
            break;
        };
        tokens.push(token);
        if token == eos {
            break;
        }
    }

    Ok(finalize(&tokens, sos, eos))
}

/// Scores steps with a trained model for one encoded source sentence (eval mode).
pub struct ModelScorer<'a> {
    model: &'a Seq2Seq,
    encoder_outputs: Tensor,
    mask: Tensor,
    device: Device,
}

impl<'a> ModelScorer<'a> {
    /// Encode `src_ids` ([S]) and keep the outputs for every later step.
    /// Returns the scorer and the decoder's initial state.
    pub fn new(model: &'a Seq2Seq, src_ids: &[i64], device: Device) -> (Self, LSTMState) {
        let src = Tensor::from_slice(src_ids).view([1, src_ids.len() as i64]).to(device);
        let mask = model.source_mask(&src);
        let (encoder_outputs, state) = model.encode(&src, false);
        (Self { model, encoder_outputs, mask, device }, state)
    }
}

impl StepScorer for ModelScorer<'_> {
    type State = LSTMState;

    fn step(&self, last_token: i64, state: &LSTMState) -> Result<(Vec<f64>, LSTMState)> {
        let input = Tensor::from_slice(&[last_token]).to(self.device);
        let (logits, new_state) =
            self.model
                .decode_step(&input, state, &self.encoder_outputs, Some(&self.mask), false);
        let log_probs = logits
            .log_softmax(-1, Kind::Float)
            .squeeze_dim(0)
            .to_kind(Kind::Double)
            .to(Device::Cpu);
        Ok((Vec::<f64>::try_from(&log_probs)?, new_state))
    }
}

/// Translate one whitespace-tokenised source sentence into target tokens.
pub fn translate<S: AsRef<str>>(
    model: &Seq2Seq,
    vocabs: &DualVocab,
    tokens: &[S],
    cfg: &BeamConfig,
    device: Device,
) -> Result<Vec<String>> {
    let mut src_ids = Vec::with_capacity(tokens.len() + 2);
    src_ids.push(vocabs.source.id(SOS_TOKEN));
    src_ids.extend(vocabs.source.encode(tokens));
    src_ids.push(vocabs.source.id(EOS_TOKEN));

    let ids = tch::no_grad(|| -> Result<Vec<i64>> {
        let (scorer, state) = ModelScorer::new(model, &src_ids, device);
        beam_search(&scorer, state, SOS_ID, EOS_ID, cfg)
    })?;

    Ok(vocabs.target.decode(&ids))
}
