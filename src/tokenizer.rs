// src/tokenizer.rs - whitespace vocabularies for source and target
use anyhow::{bail, Result};
use std::collections::HashMap;

pub const PAD_TOKEN: &str = "<pad>";
pub const SOS_TOKEN: &str = "<sos>";
pub const EOS_TOKEN: &str = "<eos>";
pub const UNK_TOKEN: &str = "<unk>";

pub const PAD_ID: i64 = 0;
pub const SOS_ID: i64 = 1;
pub const EOS_ID: i64 = 2;
pub const UNK_ID: i64 = 3;

const SPECIAL_TOKENS: [&str; 4] = [PAD_TOKEN, SOS_TOKEN, EOS_TOKEN, UNK_TOKEN];

pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Token <-> id mapping for one language.
///
/// Ids 0..=3 are always `<pad>`, `<sos>`, `<eos>`, `<unk>`. Tokens seen fewer than
/// `min_freq` times collapse to `<unk>`, so `decode(encode(x))` is lossy for them.
#[derive(Debug, Clone)]
pub struct Vocab {
    stoi: HashMap<String, i64>,
    itos: Vec<String>,
}

impl Vocab {
    /// Count whitespace tokens over `texts` and keep those with `count >= min_freq`,
    /// in order of first occurrence.
    pub fn build<'a, I>(texts: I, min_freq: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for text in texts {
            for word in text.split_whitespace() {
                let count = counts.entry(word).or_insert(0);
                if *count == 0 {
                    order.push(word);
                }
                *count += 1;
            }
        }

        let mut itos: Vec<String> = SPECIAL_TOKENS.iter().map(|s| s.to_string()).collect();
        itos.extend(
            order
                .into_iter()
                .filter(|w| counts[w] >= min_freq && !SPECIAL_TOKENS.contains(w))
                .map(String::from),
        );

        let stoi = itos
            .iter()
            .enumerate()
            .map(|(i, tok)| (tok.clone(), i as i64))
            .collect();

        Self { stoi, itos }
    }

    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }

    pub fn itos(&self) -> &[String] {
        &self.itos
    }

    pub fn id(&self, token: &str) -> i64 {
        self.stoi.get(token).copied().unwrap_or(UNK_ID)
    }

    /// Token for `id`; out-of-range ids read as `<unk>`.
    pub fn token(&self, id: i64) -> &str {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.itos.get(i))
            .map(String::as_str)
            .unwrap_or(UNK_TOKEN)
    }

    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<i64> {
        tokens.iter().map(|t| self.id(t.as_ref())).collect()
    }

    pub fn decode(&self, ids: &[i64]) -> Vec<String> {
        ids.iter().map(|&id| self.token(id).to_string()).collect()
    }

    /// `[<sos>] + ids + [<eos>]`, truncated to `max_len` (the `<eos>` is lost when truncated).
    pub fn encode_with_special_tokens(&self, text: &str, max_len: usize) -> Vec<i64> {
        let mut ids = Vec::with_capacity(max_len);
        ids.push(SOS_ID);
        ids.extend(text.split_whitespace().map(|w| self.id(w)));
        ids.push(EOS_ID);
        ids.truncate(max_len);
        ids
    }

    /// Tokens of `ids` with pad/sos/eos dropped.
    pub fn strip_special(&self, ids: &[i64]) -> Vec<String> {
        ids.iter()
            .filter(|&&id| !is_structural(id))
            .map(|&id| self.token(id).to_string())
            .collect()
    }
}

/// Pad, start and end markers. `<unk>` is a real output token and is kept.
pub fn is_structural(id: i64) -> bool {
    id == PAD_ID || id == SOS_ID || id == EOS_ID
}

/// Separate source and target vocabularies for the parallel corpus.
#[derive(Debug, Clone)]
pub struct DualVocab {
    pub source: Vocab,
    pub target: Vocab,
}

impl DualVocab {
    /// Build both vocabularies from the training pairs only.
    pub fn fit(pairs: &[(String, String)], min_freq: usize) -> Result<Self> {
        log::info!("Building source vocabulary (min_freq={})", min_freq);
        let source = Vocab::build(pairs.iter().map(|(src, _)| src.as_str()), min_freq);
        log::info!("Building target vocabulary (min_freq={})", min_freq);
        let target = Vocab::build(pairs.iter().map(|(_, tgt)| tgt.as_str()), min_freq);

        if source.len() <= SPECIAL_TOKENS.len() || target.len() <= SPECIAL_TOKENS.len() {
            bail!(
                "Vocabulary has no regular tokens (source={}, target={}); lower min_freq or add data",
                source.len(),
                target.len()
            );
        }
        Ok(Self { source, target })
    }

    pub fn source_vocab_size(&self) -> usize {
        self.source.len()
    }

    pub fn target_vocab_size(&self) -> usize {
        self.target.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_freq_drops_rare_tokens() {
        let vocab = Vocab::build(["a b c", "a b", "a"], 2);
        assert_eq!(vocab.itos(), &["<pad>", "<sos>", "<eos>", "<unk>", "a", "b"]);
        assert_eq!(vocab.id("c"), UNK_ID);
        assert_eq!(vocab.id("a"), 4);
    }

    #[test]
    fn stoi_and_itos_agree() {
        let vocab = Vocab::build(["x y z x", "y z w"], 1);
        for (i, tok) in vocab.itos().iter().enumerate() {
            assert_eq!(vocab.id(tok), i as i64);
            assert_eq!(vocab.token(i as i64), tok.as_str());
        }
    }

    #[test]
    fn round_trip_is_lossy_only_for_rare_tokens() {
        let vocab = Vocab::build(["the cat sat", "the cat ran", "a dog"], 2);
        let tokens = ["the", "dog", "cat"];
        let decoded = vocab.decode(&vocab.encode(&tokens));
        assert_eq!(decoded, vec!["the", UNK_TOKEN, "cat"]);
    }

    #[test]
    fn special_tokens_wrap_and_truncate() {
        let vocab = Vocab::build(["a b c d", "a b c d"], 2);
        let ids = vocab.encode_with_special_tokens("a b", 10);
        assert_eq!(ids.first(), Some(&SOS_ID));
        assert_eq!(ids.last(), Some(&EOS_ID));
        assert_eq!(ids.len(), 4);

        let truncated = vocab.encode_with_special_tokens("a b c d", 3);
        assert_eq!(truncated, vec![SOS_ID, vocab.id("a"), vocab.id("b")]);
    }

    #[test]
    fn strip_special_keeps_unknowns() {
        let vocab = Vocab::build(["a a"], 2);
        let ids = [SOS_ID, 4, UNK_ID, EOS_ID, PAD_ID, PAD_ID];
        assert_eq!(vocab.strip_special(&ids), vec!["a", UNK_TOKEN]);
    }

    #[test]
    fn out_of_range_id_reads_as_unknown() {
        let vocab = Vocab::build(["a a"], 2);
        assert_eq!(vocab.token(99), UNK_TOKEN);
        assert_eq!(vocab.token(-1), UNK_TOKEN);
    }

    #[test]
    fn dual_vocab_rejects_empty_vocabulary() {
        let pairs = vec![("x".to_string(), "y".to_string())];
        assert!(DualVocab::fit(&pairs, 2).is_err());

        let pairs = vec![
            ("x y".to_string(), "p q".to_string()),
            ("x".to_string(), "p".to_string()),
        ];
        let vocabs = DualVocab::fit(&pairs, 2).unwrap();
        assert_eq!(vocabs.source_vocab_size(), 5);
        assert_eq!(vocabs.target_vocab_size(), 5);
    }
}
