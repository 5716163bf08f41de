// src/metrics.rs
use std::collections::HashMap;

const MAX_ORDER: usize = 4;
/// Added to zero n-gram match counts before taking the log.
const SMOOTHING_EPSILON: f64 = 0.1;

fn ngrams<S: AsRef<str>>(tokens: &[S], n: usize) -> HashMap<Vec<&str>, usize> {
    let mut map = HashMap::new();
    if n == 0 || tokens.len() < n {
        return map;
    }
    for window in tokens.windows(n) {
        let key: Vec<&str> = window.iter().map(|t| t.as_ref()).collect();
        *map.entry(key).or_insert(0) += 1;
    }
    map
}

/// Clipped n-gram matches and the candidate n-gram count (at least 1).
fn modified_precision<S: AsRef<str>>(reference: &[S], candidate: &[S], n: usize) -> (usize, usize) {
    let ref_ngrams = ngrams(reference, n);
    let cand_ngrams = ngrams(candidate, n);

    let mut clipped = 0;
    let mut total = 0;
    for (ng, &cnt_cand) in cand_ngrams.iter() {
        total += cnt_cand;
        clipped += cnt_cand.min(ref_ngrams.get(ng).copied().unwrap_or(0));
    }
    (clipped, total.max(1))
}

fn brevity_penalty(ref_len: usize, hyp_len: usize) -> f64 {
    if hyp_len > ref_len {
        1.0
    } else if hyp_len == 0 {
        0.0
    } else {
        (1.0 - ref_len as f64 / hyp_len as f64).exp()
    }
}

/// Corpus-level BLEU-4 with one reference per hypothesis.
///
/// N-gram matches and counts are pooled over the corpus before dividing. Orders with
/// no match use `0.1 / count` instead of zero, so short corpora still get a score as
/// long as at least one unigram matches.
pub fn corpus_bleu<S: AsRef<str>>(references: &[Vec<S>], hypotheses: &[Vec<S>]) -> f64 {
    let mut matches = [0usize; MAX_ORDER];
    let mut counts = [0usize; MAX_ORDER];
    let mut ref_len = 0usize;
    let mut hyp_len = 0usize;

    for (reference, hypothesis) in references.iter().zip(hypotheses) {
        for n in 1..=MAX_ORDER {
            let (m, c) = modified_precision(reference, hypothesis, n);
            matches[n - 1] += m;
            counts[n - 1] += c;
        }
        ref_len += reference.len();
        hyp_len += hypothesis.len();
    }

    if matches[0] == 0 {
        return 0.0;
    }

    let bp = brevity_penalty(ref_len, hyp_len);
    let log_sum: f64 = matches
        .iter()
        .zip(counts.iter())
        .map(|(&m, &c)| {
            let p = if m == 0 { SMOOTHING_EPSILON / c as f64 } else { m as f64 / c as f64 };
            p.ln() / MAX_ORDER as f64
        })
        .sum();

    bp * log_sum.exp()
}

/// BLEU of a single reference/hypothesis pair, same smoothing as `corpus_bleu`.
pub fn sentence_bleu<S: AsRef<str>>(reference: &[S], hypothesis: &[S]) -> f64 {
    let r: Vec<&str> = reference.iter().map(|t| t.as_ref()).collect();
    let h: Vec<&str> = hypothesis.iter().map(|t| t.as_ref()).collect();
    corpus_bleu(&[r], &[h])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn identical_corpus_scores_one() {
        let refs = vec![toks("the cat sat on the mat"), toks("a dog barked at night")];
        let score = corpus_bleu(&refs, &refs);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_unigram_overlap_scores_zero() {
        let refs = vec![toks("the cat sat")];
        let hyps = vec![toks("dogs run fast")];
        assert_eq!(corpus_bleu(&refs, &hyps), 0.0);
    }

    #[test]
    fn empty_corpus_scores_zero() {
        let empty: Vec<Vec<String>> = Vec::new();
        assert_eq!(corpus_bleu(&empty, &empty), 0.0);
    }

    #[test]
    fn smoothing_keeps_partial_matches_positive() {
        // unigrams match, no bigram does
        let refs = vec![toks("a b c d")];
        let hyps = vec![toks("d c b a")];
        let score = corpus_bleu(&refs, &hyps);
        // p1 = 4/4, p2 = 0.1/3, p3 = 0.1/2, p4 = 0.1/1, bp = 1
        let expected = ((1.0f64).ln() + (0.1f64 / 3.0).ln() + (0.05f64).ln() + (0.1f64).ln()) / 4.0;
        assert!((score - expected.exp()).abs() < 1e-9);
    }

    #[test]
    fn short_hypothesis_is_penalised() {
        let refs = vec![toks("the quick brown fox jumps")];
        let full = corpus_bleu(&refs, &refs);
        let short = corpus_bleu(&refs, &[toks("the quick brown")]);
        assert!(short < full);
        assert!(short > 0.0);
    }

    #[test]
    fn sentence_bleu_matches_single_pair_corpus() {
        let r = toks("he reads a book");
        let h = toks("he reads the book");
        let corpus = corpus_bleu(&[r.clone()], &[h.clone()]);
        assert!((sentence_bleu(&r, &h) - corpus).abs() < 1e-12);
    }
}
