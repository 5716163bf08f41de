// src/attention.rs
use tch::{nn, nn::Module, Kind, Tensor};

/// Score given to padded source positions before the softmax.
const MASK_FILL: f64 = -1e10;

/// Bahdanau (additive) attention in concat form:
/// `score_i = v^T tanh(W [h_dec ; enc_i])`.
pub struct BahdanauAttention {
    attn: nn::Linear, // [dec_hid + 2*enc_hid] -> dec_hid
    v: nn::Linear,    // dec_hid -> 1, no bias
}

impl BahdanauAttention {
    /// Decoder width is always `2 * enc_hid_dim` (merged bidirectional state).
    pub fn new(vs: &nn::Path, enc_hid_dim: i64) -> Self {
        let dec_hid_dim = enc_hid_dim * 2;
        let attn = nn::linear(vs / "attn", enc_hid_dim * 2 + dec_hid_dim, dec_hid_dim, Default::default());
        let v = nn::linear(
            vs / "v",
            dec_hid_dim,
            1,
            nn::LinearConfig { bias: false, ..Default::default() },
        );
        Self { attn, v }
    }

    /// hidden: [layers,B,D] (only the last layer is used), encoder_outputs: [B,S,2H],
    /// mask: [B,S] with 0 at padded positions.
    /// Returns attention weights [B,S], each row a probability distribution.
    pub fn forward(&self, hidden: &Tensor, encoder_outputs: &Tensor, mask: Option<&Tensor>) -> Tensor {
        let src_len = encoder_outputs.size()[1];
        let last = hidden.size()[0] - 1;

        let h = hidden.select(0, last).unsqueeze(1).repeat([1, src_len, 1]); // [B,S,D]
        let energy = Tensor::cat(&[&h, encoder_outputs], 2).apply(&self.attn).tanh(); // [B,S,D]
        let scores = self.v.forward(&energy).squeeze_dim(2); // [B,S]

        let scores = match mask {
            Some(m) => scores.masked_fill(&m.eq(0.0), MASK_FILL),
            None => scores,
        };

        scores.softmax(1, Kind::Float)
    }

    /// Weighted sum of encoder outputs: weights [B,S] x outputs [B,S,2H] -> [B,1,2H].
    pub fn context(weights: &Tensor, encoder_outputs: &Tensor) -> Tensor {
        weights.unsqueeze(1).bmm(encoder_outputs)
    }
}
