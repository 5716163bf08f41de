use asm_en_nmt::beam_search::{beam_search, greedy_decode, translate, BeamConfig, ModelScorer};
use asm_en_nmt::config::Hyperparams;
use asm_en_nmt::data_loader::{build_examples, collate, DataLoader};
use asm_en_nmt::model::Seq2Seq;
use asm_en_nmt::tokenizer::{DualVocab, EOS_ID, EOS_TOKEN, PAD_ID, SOS_ID, SOS_TOKEN};
use asm_en_nmt::training::Trainer;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tch::{nn, Device, Kind, Tensor};

const CORPUS: &str = "মই ভাত খাওঁ\tI eat rice\n\
মই পানী খাওঁ\tI drink water\n\
তুমি ভাত খোৱা\tyou eat rice\n\
তুমি পানী খোৱা\tyou drink water\n\
মই ঘৰলৈ যাওঁ\tI go home\n\
তুমি ঘৰলৈ যোৱা\tyou go home\n\
মই যাওঁ\tI go\n";

fn tiny_params() -> Hyperparams {
    Hyperparams {
        emb_dim: 8,
        hid_dim: 6,
        n_layers: 2,
        dropout: 0.1,
        epochs: 2,
        batch_size: 4,
        beam_width: 3,
        max_decode_len: 8,
        min_freq: 1,
        eval_samples: 4,
        log_every: 0,
        ..Default::default()
    }
}

fn setup() -> (Vec<(String, String)>, DualVocab) {
    let loader = DataLoader::from_reader(CORPUS.as_bytes());
    let pairs = loader.get_all_data().to_vec();
    let vocabs = DualVocab::fit(&pairs, 1).unwrap();
    (pairs, vocabs)
}

fn tiny_model(vocabs: &DualVocab, params: &Hyperparams) -> (nn::VarStore, Seq2Seq) {
    tch::manual_seed(7);
    let vs = nn::VarStore::new(Device::Cpu);
    let model = Seq2Seq::from_params(
        &vs.root(),
        params,
        vocabs.source_vocab_size() as i64,
        vocabs.target_vocab_size() as i64,
        PAD_ID,
    );
    (vs, model)
}

#[test]
fn attention_over_padded_batch_is_a_distribution() {
    let (pairs, vocabs) = setup();
    let params = tiny_params();
    let (_vs, model) = tiny_model(&vocabs, &params);

    let examples = build_examples(&pairs, &vocabs, params.max_len);
    let batch: Vec<_> = examples.iter().collect();
    let padded = collate(&batch);
    let src = Tensor::from_slice(&padded.src).view([padded.rows as i64, padded.src_len as i64]);

    let mask = model.source_mask(&src);
    let (enc_out, state) = model.encode(&src, false);
    let weights = model.attention.forward(&state.h(), &enc_out, Some(&mask));

    assert_eq!(weights.size(), vec![padded.rows as i64, padded.src_len as i64]);
    assert!(weights.min().double_value(&[]) >= 0.0);
    let sums = weights.sum_dim_intlist([1i64].as_slice(), false, Kind::Double);
    let max_dev = (sums - 1.0).abs().max().double_value(&[]);
    assert!(max_dev < 1e-5);

    let padded_mass = (weights * mask.eq(0.0).to_kind(Kind::Float)).max().double_value(&[]);
    assert!(padded_mass < 1e-6);
}

#[test]
fn width_one_beam_matches_greedy_with_a_real_model() {
    let (_pairs, vocabs) = setup();
    let params = tiny_params();
    let (_vs, model) = tiny_model(&vocabs, &params);

    let src_ids: Vec<i64> = [SOS_TOKEN, "মই", "ভাত", "খাওঁ", EOS_TOKEN]
        .iter()
        .map(|t| vocabs.source.id(t))
        .collect();
    let cfg = BeamConfig { beam_width: 1, max_len: 8, length_penalty: 0.6 };

    tch::no_grad(|| {
        let (scorer, state) = ModelScorer::new(&model, &src_ids, Device::Cpu);
        let beam = beam_search(&scorer, state, SOS_ID, EOS_ID, &cfg).unwrap();

        let (scorer, state) = ModelScorer::new(&model, &src_ids, Device::Cpu);
        let greedy = greedy_decode(&scorer, state, SOS_ID, EOS_ID, cfg.max_len).unwrap();

        assert_eq!(beam, greedy);
    });
}

#[test]
fn translations_never_contain_markers() {
    let (pairs, vocabs) = setup();
    let params = tiny_params();
    let (_vs, model) = tiny_model(&vocabs, &params);

    for (src, _) in &pairs {
        let tokens: Vec<&str> = src.split_whitespace().collect();
        let out = translate(&model, &vocabs, &tokens, &BeamConfig::from_params(&params), Device::Cpu).unwrap();
        assert!(out.len() <= params.max_decode_len);
        assert!(out.iter().all(|t| t != SOS_TOKEN && t != EOS_TOKEN));
    }
}

#[test]
fn short_training_run_reports_every_epoch() {
    let (pairs, vocabs) = setup();
    let params = tiny_params();
    let (vs, model) = tiny_model(&vocabs, &params);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let loader = DataLoader::from_reader(CORPUS.as_bytes());
    let (train_pairs, val_pairs) = loader.train_val_split(0.34, &mut rng);
    assert_eq!(train_pairs.len() + val_pairs.len(), pairs.len());

    let train = build_examples(&train_pairs, &vocabs, params.max_len);
    let val = build_examples(&val_pairs, &vocabs, params.max_len);

    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("best.ot");
    let mut trainer = Trainer::new(model, vs, params.clone(), Device::Cpu)
        .unwrap()
        .with_checkpoint(&ckpt);

    let history = trainer.train(&train, &val, &vocabs).unwrap();
    assert_eq!(history.len(), params.epochs);
    for (i, stats) in history.iter().enumerate() {
        assert_eq!(stats.epoch, i + 1);
        assert!(stats.train_loss.is_finite() && stats.train_loss > 0.0);
        assert!((0.0..=1.0).contains(&stats.val_bleu));
    }
    assert!((history[1].teacher_forcing_ratio - 0.98).abs() < 1e-12);
    assert!(ckpt.exists());
}

#[test]
fn mismatched_target_vocabulary_is_rejected() {
    let (pairs, vocabs) = setup();
    let params = tiny_params();
    tch::manual_seed(7);
    let vs = nn::VarStore::new(Device::Cpu);
    let model = Seq2Seq::from_params(
        &vs.root(),
        &params,
        vocabs.source_vocab_size() as i64,
        vocabs.target_vocab_size() as i64 + 1,
        PAD_ID,
    );
    let examples = build_examples(&pairs, &vocabs, params.max_len);
    let mut trainer = Trainer::new(model, vs, params, Device::Cpu).unwrap();
    assert!(trainer.train(&examples, &examples, &vocabs).is_err());
}
