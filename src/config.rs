// src/config.rs
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Hyperparameters for data preparation, model construction, training and decoding.
///
/// Every field has a default, so a config file only needs the keys it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Hyperparams {
    pub emb_dim: i64,
    /// Encoder hidden width per direction. The decoder runs at twice this width.
    pub hid_dim: i64,
    pub n_layers: i64,
    pub dropout: f64,
    pub lr: f64,
    pub epochs: usize,
    pub beam_width: usize,
    pub batch_size: usize,
    pub clip_grad: f64,

    pub min_freq: usize,
    /// Maximum example length, `<sos>` and `<eos>` included.
    pub max_len: usize,
    pub max_decode_len: usize,
    pub length_penalty: f64,
    pub label_smoothing: f64,
    pub weight_decay: f64,
    pub lr_factor: f64,
    pub lr_patience: usize,
    pub eval_samples: usize,
    pub val_ratio: f64,
    pub seed: u64,
    pub log_every: usize,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            emb_dim: 256,
            hid_dim: 512,
            n_layers: 2,
            dropout: 0.3,
            lr: 1e-3,
            epochs: 30,
            beam_width: 5,
            batch_size: 64,
            clip_grad: 1.0,
            min_freq: 2,
            max_len: 50,
            max_decode_len: 50,
            length_penalty: 0.6,
            label_smoothing: 0.1,
            weight_decay: 1e-5,
            lr_factor: 0.5,
            lr_patience: 3,
            eval_samples: 500,
            val_ratio: 0.2,
            seed: 42,
            log_every: 50,
        }
    }
}

impl Hyperparams {
    /// Load from a TOML or JSON file, picked by extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let params: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON config {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Invalid TOML config {}", path.display()))?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.emb_dim <= 0 || self.hid_dim <= 0 || self.n_layers <= 0 {
            bail!(
                "Model dimensions must be positive (emb_dim={}, hid_dim={}, n_layers={})",
                self.emb_dim,
                self.hid_dim,
                self.n_layers
            );
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        if !(0.0..1.0).contains(&self.label_smoothing) {
            bail!("label_smoothing must be in [0, 1), got {}", self.label_smoothing);
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.beam_width == 0 {
            bail!("beam_width must be at least 1");
        }
        // <sos> plus at least one predicted position
        if self.max_len < 2 {
            bail!("max_len must be at least 2, got {}", self.max_len);
        }
        if !(0.0..1.0).contains(&self.val_ratio) {
            bail!("val_ratio must be in [0, 1), got {}", self.val_ratio);
        }
        if self.lr <= 0.0 || self.clip_grad <= 0.0 {
            bail!("lr and clip_grad must be positive");
        }
        if !(0.0..1.0).contains(&self.lr_factor) {
            bail!("lr_factor must be in [0, 1), got {}", self.lr_factor);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let params = Hyperparams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.beam_width, 5);
        assert_eq!(params.min_freq, 2);
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hyp.toml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "epochs = 3\nbatch_size = 8\nhid_dim = 16").unwrap();

        let params = Hyperparams::from_path(&path).unwrap();
        assert_eq!(params.epochs, 3);
        assert_eq!(params.batch_size, 8);
        assert_eq!(params.hid_dim, 16);
        assert_eq!(params.emb_dim, 256);
    }

    #[test]
    fn json_is_picked_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hyp.json");
        fs::write(&path, r#"{"beam_width": 3, "lr": 0.01}"#).unwrap();

        let params = Hyperparams::from_path(&path).unwrap();
        assert_eq!(params.beam_width, 3);
        assert!((params.lr - 0.01).abs() < 1e-12);
    }

    #[test]
    fn rejects_degenerate_values() {
        let params = Hyperparams { max_len: 1, ..Default::default() };
        assert!(params.validate().is_err());

        let params = Hyperparams { beam_width: 0, ..Default::default() };
        assert!(params.validate().is_err());

        let params = Hyperparams { dropout: 1.0, ..Default::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Hyperparams::from_path("does/not/exist.toml").is_err());
    }
}
