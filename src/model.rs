// src/model.rs - bi-LSTM encoder, attention decoder, teacher-forced seq2seq
use rand::Rng;
use tch::{nn, nn::LSTMState, nn::Module, nn::RNN, Device, Kind, Tensor};

use crate::attention::BahdanauAttention;
use crate::config::Hyperparams;

/// LSTM layers run one at a time so that inter-layer dropout follows the `train` flag
/// of each call instead of being fixed when the module is built.
struct LstmStack {
    layers: Vec<nn::LSTM>,
    directions: i64,
    dropout: f64,
}

impl LstmStack {
    fn new(vs: &nn::Path, in_dim: i64, hidden_dim: i64, num_layers: i64, dropout: f64, bidirectional: bool) -> Self {
        let directions = if bidirectional { 2 } else { 1 };
        let layers = (0..num_layers)
            .map(|l| {
                let input = if l == 0 { in_dim } else { hidden_dim * directions };
                let cfg = nn::RNNConfig { bidirectional, batch_first: true, ..Default::default() };
                nn::lstm(vs / format!("l{}", l), input, hidden_dim, cfg)
            })
            .collect();
        // single layer: nothing to drop between
        let dropout = if num_layers > 1 { dropout } else { 0.0 };
        Self { layers, directions, dropout }
    }

    /// xs: [B,T,in] -> (outputs [B,T,dirs*H], state [layers*dirs,B,H])
    fn seq(&self, xs: &Tensor, train: bool) -> (Tensor, LSTMState) {
        self.run(xs, None, train)
    }

    fn seq_init(&self, xs: &Tensor, state: &LSTMState, train: bool) -> (Tensor, LSTMState) {
        self.run(xs, Some(state), train)
    }

    fn run(&self, xs: &Tensor, init: Option<&LSTMState>, train: bool) -> (Tensor, LSTMState) {
        let mut out = xs.shallow_clone();
        let mut hs = Vec::with_capacity(self.layers.len());
        let mut cs = Vec::with_capacity(self.layers.len());

        for (l, layer) in self.layers.iter().enumerate() {
            if l > 0 {
                out = out.dropout(self.dropout, train);
            }
            let (o, LSTMState((h, c))) = match init {
                Some(LSTMState((h0, c0))) => {
                    let start = l as i64 * self.directions;
                    let layer_state = LSTMState((
                        h0.narrow(0, start, self.directions),
                        c0.narrow(0, start, self.directions),
                    ));
                    layer.seq_init(&out, &layer_state)
                }
                None => layer.seq(&out),
            };
            out = o;
            hs.push(h);
            cs.push(c);
        }

        (out, LSTMState((Tensor::cat(&hs, 0), Tensor::cat(&cs, 0))))
    }
}

/// Embedding whose pad row starts at zero; the padding index keeps it out of the gradient.
fn padded_embedding(vs: nn::Path, vocab_size: i64, dim: i64, pad_id: i64) -> nn::Embedding {
    let emb = nn::embedding(
        vs,
        vocab_size,
        dim,
        nn::EmbeddingConfig { padding_idx: pad_id, ..Default::default() },
    );
    tch::no_grad(|| {
        let _ = emb.ws.get(pad_id).zero_();
    });
    emb
}

/// `[layers*2,B,H]` in (layer, direction) order -> `[layers,B,2H]` with `[fwd ; bwd]` features.
fn merge_directions(state: &Tensor, num_layers: i64, hidden_dim: i64) -> Tensor {
    let s = state.view([num_layers, 2, -1, hidden_dim]);
    Tensor::cat(&[s.select(1, 0), s.select(1, 1)], 2)
}

pub struct Encoder {
    embedding: nn::Embedding,
    lstm: LstmStack,
    dropout: f64,
    hidden_dim: i64,
    num_layers: i64,
}

impl Encoder {
    pub fn new(
        vs: &nn::Path,
        input_dim: i64,
        emb_dim: i64,
        hidden_dim: i64,
        num_layers: i64,
        dropout: f64,
        pad_id: i64,
    ) -> Self {
        let embedding = padded_embedding(vs / "embedding", input_dim, emb_dim, pad_id);
        let lstm = LstmStack::new(&(vs / "lstm"), emb_dim, hidden_dim, num_layers, dropout, true);
        Self { embedding, lstm, dropout, hidden_dim, num_layers }
    }

    /// src: [B,S] -> (encoder outputs [B,S,2H], decoder init state [layers,B,2H])
    pub fn forward(&self, src: &Tensor, train: bool) -> (Tensor, LSTMState) {
        let embedded = self.embedding.forward(src).dropout(self.dropout, train); // [B,S,E]
        let (outputs, LSTMState((h, c))) = self.lstm.seq(&embedded, train);

        let hidden = merge_directions(&h, self.num_layers, self.hidden_dim);
        let cell = merge_directions(&c, self.num_layers, self.hidden_dim);
        (outputs, LSTMState((hidden, cell)))
    }
}

pub struct Decoder {
    embedding: nn::Embedding,
    lstm: LstmStack,
    layer_norm: nn::LayerNorm,
    fc: nn::Linear,
    dropout: f64,
    output_dim: i64,
}

impl Decoder {
    pub fn new(
        vs: &nn::Path,
        output_dim: i64,
        emb_dim: i64,
        enc_hid_dim: i64,
        num_layers: i64,
        dropout: f64,
        pad_id: i64,
    ) -> Self {
        let dec_hid_dim = enc_hid_dim * 2;
        let embedding = padded_embedding(vs / "embedding", output_dim, emb_dim, pad_id);
        let lstm = LstmStack::new(&(vs / "lstm"), emb_dim + enc_hid_dim * 2, dec_hid_dim, num_layers, dropout, false);

        let concat_dim = dec_hid_dim + enc_hid_dim * 2 + emb_dim;
        let layer_norm = nn::layer_norm(vs / "layer_norm", vec![concat_dim], Default::default());
        let fc = nn::linear(vs / "fc", concat_dim, output_dim, Default::default());

        Self { embedding, lstm, layer_norm, fc, dropout, output_dim }
    }

    pub fn output_dim(&self) -> i64 {
        self.output_dim
    }

    /// One decoding step.
    /// input: [B] previous ids, state: [layers,B,D], encoder_outputs: [B,S,2H], mask: [B,S].
    /// Returns (logits [B,V], new state).
    pub fn step(
        &self,
        attention: &BahdanauAttention,
        input: &Tensor,
        state: &LSTMState,
        encoder_outputs: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> (Tensor, LSTMState) {
        let embedded = self.embedding.forward(input).dropout(self.dropout, train).unsqueeze(1); // [B,1,E]

        let (hidden, _cell) = &state.0;
        let weights = attention.forward(hidden, encoder_outputs, mask); // [B,S]
        let weighted = BahdanauAttention::context(&weights, encoder_outputs); // [B,1,2H]

        let rnn_in = Tensor::cat(&[&embedded, &weighted], 2); // [B,1,E+2H]
        let (out, new_state) = self.lstm.seq_init(&rnn_in, state, train); // [B,1,D]

        let concat = Tensor::cat(
            &[out.squeeze_dim(1), weighted.squeeze_dim(1), embedded.squeeze_dim(1)],
            1,
        ); // [B,D+2H+E]
        let logits = self
            .layer_norm
            .forward(&concat)
            .dropout(self.dropout, train)
            .apply(&self.fc); // [B,V]

        (logits, new_state)
    }
}

/// Encoder + attention + decoder. The decoder state width is `2 * hid_dim` by construction.
pub struct Seq2Seq {
    pub encoder: Encoder,
    pub attention: BahdanauAttention,
    pub decoder: Decoder,
    src_pad_id: i64,
}

impl Seq2Seq {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vs: &nn::Path,
        input_dim: i64,
        output_dim: i64,
        emb_dim: i64,
        hid_dim: i64,
        num_layers: i64,
        dropout: f64,
        src_pad_id: i64,
        tgt_pad_id: i64,
    ) -> Self {
        log::debug!(
            "Seq2Seq: srcV={}, tgtV={}, emb={}, hid={}, layers={}, drop={}",
            input_dim, output_dim, emb_dim, hid_dim, num_layers, dropout
        );
        let encoder = Encoder::new(&(vs / "encoder"), input_dim, emb_dim, hid_dim, num_layers, dropout, src_pad_id);
        let attention = BahdanauAttention::new(&(vs / "attention"), hid_dim);
        let decoder = Decoder::new(&(vs / "decoder"), output_dim, emb_dim, hid_dim, num_layers, dropout, tgt_pad_id);
        Self { encoder, attention, decoder, src_pad_id }
    }

    pub fn from_params(vs: &nn::Path, params: &Hyperparams, input_dim: i64, output_dim: i64, pad_id: i64) -> Self {
        Self::new(
            vs,
            input_dim,
            output_dim,
            params.emb_dim,
            params.hid_dim,
            params.n_layers,
            params.dropout,
            pad_id,
            pad_id,
        )
    }

    pub fn out_vocab_dim(&self) -> i64 {
        self.decoder.output_dim()
    }

    /// 1.0 at real tokens, 0.0 at padding. [B,S]
    pub fn source_mask(&self, src: &Tensor) -> Tensor {
        src.ne(self.src_pad_id).to_kind(Kind::Float)
    }

    pub fn encode(&self, src: &Tensor, train: bool) -> (Tensor, LSTMState) {
        self.encoder.forward(src, train)
    }

    pub fn decode_step(
        &self,
        input: &Tensor,
        state: &LSTMState,
        encoder_outputs: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> (Tensor, LSTMState) {
        self.decoder.step(&self.attention, input, state, encoder_outputs, mask, train)
    }

    /// Teacher-forced forward pass. src: [B,S], trg: [B,T] -> logits [B,T,V].
    ///
    /// Position 0 (`<sos>`) is never predicted and stays zero. At each later step a fresh
    /// draw from `rng` below `teacher_forcing_ratio` feeds the true token, otherwise the
    /// model's own argmax.
    pub fn forward<R: Rng>(
        &self,
        src: &Tensor,
        trg: &Tensor,
        teacher_forcing_ratio: f64,
        rng: &mut R,
        train: bool,
    ) -> Tensor {
        let size = trg.size();
        let (batch_size, trg_len) = (size[0], size[1]);
        let device = src.device();

        let mask = self.source_mask(src);
        let (encoder_outputs, mut state) = self.encode(src, train);

        let mut input = trg.select(1, 0);
        let mut steps = Vec::with_capacity(trg_len.max(1) as usize - 1);
        for t in 1..trg_len {
            let (pred, new_state) = self.decode_step(&input, &state, &encoder_outputs, Some(&mask), train);
            state = new_state;

            input = if rng.gen::<f64>() < teacher_forcing_ratio {
                trg.select(1, t)
            } else {
                pred.argmax(1, false)
            };
            steps.push(pred);
        }

        let first = Tensor::zeros([batch_size, 1, self.out_vocab_dim()], (Kind::Float, device));
        if steps.is_empty() {
            return first;
        }
        Tensor::cat(&[first, Tensor::stack(&steps, 1)], 1)
    }
}

/// Pick CUDA when present unless `force_cpu`.
pub fn select_device(force_cpu: bool) -> Device {
    if !force_cpu && tch::Cuda::is_available() {
        Device::Cuda(0)
    } else {
        Device::Cpu
    }
}
