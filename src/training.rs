// src/training.rs - label-smoothed teacher-forced training loop
use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};

use crate::beam_search::BeamConfig;
use crate::config::Hyperparams;
use crate::data_loader::{collate, epoch_order, Example};
use crate::evaluation::Evaluator;
use crate::model::Seq2Seq;
use crate::scheduler::PlateauScheduler;
use crate::tokenizer::{DualVocab, PAD_ID};

/// Probability of feeding the true previous token in `epoch` (1-based):
/// starts at 1.0 and drops by 0.02 per epoch down to 0.5.
pub fn teacher_forcing_ratio(epoch: usize) -> f64 {
    (1.0 - (epoch.saturating_sub(1)) as f64 * 0.02).max(0.5)
}

/// Label-smoothed cross entropy over rows whose target is not `pad_id`.
///
/// pred: [N,V] logits, target: [N]. The true class gets `1 - smoothing`, every other
/// class `smoothing / (V - 1)`. Pad rows are removed before the loss is computed; with
/// no rows left the result is exactly zero but still part of the graph.
pub fn label_smoothing_loss(pred: &Tensor, target: &Tensor, smoothing: f64, pad_id: i64) -> Tensor {
    let vocab_size = pred.size()[1];
    let zero_anchor = pred.sum(Kind::Float) * 0.0;

    let idx = target.ne(pad_id).nonzero();
    if idx.numel() == 0 {
        return zero_anchor;
    }
    let idx = idx.squeeze_dim(-1); // [M]
    let pred = pred.index_select(0, &idx); // [M,V]
    let target = target.index_select(0, &idx); // [M]

    let log_prob = pred.log_softmax(-1, Kind::Float);
    let off_value = smoothing / (vocab_size - 1).max(1) as f64;
    let smooth_target = log_prob
        .full_like(off_value)
        .scatter_value(1, &target.unsqueeze(1), 1.0 - smoothing);

    let loss = -(log_prob * smooth_target).sum_dim_intlist([1i64].as_slice(), false, Kind::Float);
    loss.mean(Kind::Float)
}

#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_bleu: f64,
    pub lr: f64,
    pub teacher_forcing_ratio: f64,
}

pub struct Trainer {
    model: Seq2Seq,
    vs: nn::VarStore,
    opt: nn::Optimizer,
    scheduler: PlateauScheduler,
    params: Hyperparams,
    device: Device,
    rng: StdRng,
    checkpoint: Option<PathBuf>,
}

impl Trainer {
    /// One Adam optimiser over every variable in `vs` (encoder, attention and decoder).
    pub fn new(model: Seq2Seq, vs: nn::VarStore, params: Hyperparams, device: Device) -> Result<Self> {
        params.validate()?;
        let opt = nn::Adam { wd: params.weight_decay, ..Default::default() }.build(&vs, params.lr)?;
        let scheduler = PlateauScheduler::new(params.lr, params.lr_factor, params.lr_patience);
        let rng = StdRng::seed_from_u64(params.seed);
        Ok(Self { model, vs, opt, scheduler, params, device, rng, checkpoint: None })
    }

    /// Save the variables here whenever validation BLEU improves.
    pub fn with_checkpoint<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.checkpoint = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn model(&self) -> &Seq2Seq {
        &self.model
    }

    fn prepare_batch(&self, batch: &[&Example]) -> (Tensor, Tensor) {
        let padded = collate(batch);
        let rows = padded.rows as i64;
        let src = Tensor::from_slice(&padded.src)
            .view([rows, padded.src_len as i64])
            .to(self.device);
        let tgt = Tensor::from_slice(&padded.tgt)
            .view([rows, padded.tgt_len as i64])
            .to(self.device);
        (src, tgt)
    }

    /// One pass over `data` in shuffled batches. Returns the mean batch loss.
    pub fn train_epoch(&mut self, epoch: usize, data: &[Example]) -> Result<f64> {
        let batch_size = self.params.batch_size;
        let num_batches = data.len().div_ceil(batch_size);
        let ratio = teacher_forcing_ratio(epoch);

        let pb = ProgressBar::new(num_batches as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                .progress_chars("=>-"),
        );

        let order = epoch_order(data.len(), true, &mut self.rng);
        let mut total_loss = 0.0f64;
        let mut num_batches_processed = 0usize;

        for (batch_idx, chunk) in order.chunks(batch_size).enumerate() {
            let batch: Vec<&Example> = chunk.iter().map(|&i| &data[i]).collect();
            let (src, tgt) = self.prepare_batch(&batch);

            let output = self.model.forward(&src, &tgt, ratio, &mut self.rng, true); // [B,T,V]

            // position 0 is <sos>, never predicted
            let v = output.size()[2];
            let t = tgt.size()[1];
            let logits = output.narrow(1, 1, t - 1).reshape([-1, v]);
            let targets = tgt.narrow(1, 1, t - 1).reshape([-1]);

            let loss = label_smoothing_loss(&logits, &targets, self.params.label_smoothing, PAD_ID);

            self.opt.zero_grad();
            loss.backward();
            self.opt.clip_grad_norm(self.params.clip_grad);
            self.opt.step();

            let loss_val = loss.double_value(&[]);
            total_loss += loss_val;
            num_batches_processed += 1;

            if self.params.log_every > 0 && batch_idx % self.params.log_every == 0 {
                pb.suspend(|| {
                    log::info!(
                        "Epoch {}, Batch {}/{}, Loss: {:.4}",
                        epoch, batch_idx, num_batches, loss_val
                    )
                });
            }
            pb.set_message(format!("Loss: {:.4}", loss_val));
            pb.inc(1);
        }

        pb.finish_with_message("Epoch complete");
        Ok(if num_batches_processed > 0 { total_loss / num_batches_processed as f64 } else { 0.0 })
    }

    /// Corpus BLEU of beam-search translations over a sample of `data`.
    pub fn evaluate(&self, data: &[Example], vocabs: &DualVocab) -> Result<f64> {
        let evaluator = Evaluator::new(data, vocabs, self.params.eval_samples);
        evaluator.evaluate(&self.model, &BeamConfig::from_params(&self.params), self.device)
    }

    pub fn train(
        &mut self,
        train_data: &[Example],
        val_data: &[Example],
        vocabs: &DualVocab,
    ) -> Result<Vec<EpochStats>> {
        let trainable_count = self.vs.trainable_variables().len();
        log::info!("Found {} trainable variables", trainable_count);
        if trainable_count == 0 {
            bail!("No trainable variables found! Model initialization failed.");
        }

        let v_model = self.model.out_vocab_dim();
        let v_tok = vocabs.target_vocab_size() as i64;
        if v_model != v_tok {
            bail!("Vocab mismatch: model V={} vs target vocabulary V={}", v_model, v_tok);
        }

        let epochs = self.params.epochs;
        let mut best_bleu = f64::NEG_INFINITY;
        let mut history = Vec::with_capacity(epochs);

        for epoch in 1..=epochs {
            log::info!("Epoch {}/{}", epoch, epochs);

            let train_loss = self.train_epoch(epoch, train_data)?;

            log::info!("Evaluating...");
            let val_bleu = self.evaluate(val_data, vocabs)?;

            if let Some(new_lr) = self.scheduler.step(val_bleu) {
                self.opt.set_lr(new_lr);
            }
            let lr = self.scheduler.lr();

            log::info!(
                "Epoch {:2} | Train Loss: {:.3} | Val BLEU: {:.2} | LR: {:.6}",
                epoch,
                train_loss,
                val_bleu * 100.0,
                lr
            );

            if val_bleu > best_bleu {
                best_bleu = val_bleu;
                if let Some(path) = &self.checkpoint {
                    self.vs.save(path)?;
                    log::info!("Saved best model to {} (BLEU {:.2})", path.display(), val_bleu * 100.0);
                }
            }

            history.push(EpochStats {
                epoch,
                train_loss,
                val_bleu,
                lr,
                teacher_forcing_ratio: teacher_forcing_ratio(epoch),
            });
        }

        log::info!("Training complete. Best val BLEU: {:.2}", best_bleu.max(0.0) * 100.0);
        Ok(history)
    }
}
