// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Reference-based lexical metrics: BLEU and ROUGE-L

use crate::params::{MetricBuildError, Params};
use crate::Metric;
use async_trait::async_trait;
use llmeval_core::{DatasetRow, MetricParams, MetricResult, PredictionRow};
use std::collections::HashMap;

/// Epsilon added to zero n-gram match counts ("method 1" smoothing)
const SMOOTHING_EPSILON: f64 = 0.1;

/// Lowercase and split on whitespace
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase().split_whitespace().map(str::to_string).collect()
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

/// Clipped n-gram matches and the candidate n-gram count (at least 1)
fn modified_precision(reference: &[String], candidate: &[String], n: usize) -> (usize, usize) {
    let ref_counts = ngram_counts(reference, n);
    let cand_counts = ngram_counts(candidate, n);

    let clipped: usize = cand_counts
        .iter()
        .map(|(ngram, count)| (*count).min(ref_counts.get(ngram).copied().unwrap_or(0)))
        .sum();
    let total = candidate.len().saturating_sub(n - 1).max(1);

    (clipped, total)
}

/// Sentence BLEU with uniform weights over 1..=max_n and brevity penalty.
///
/// Orders without any match contribute `epsilon / total` instead of zero.
/// No unigram match at all scores `0.0`.
pub fn sentence_bleu(reference: &[String], candidate: &[String], max_n: usize) -> f64 {
    if candidate.is_empty() || max_n == 0 {
        return 0.0;
    }

    let precisions: Vec<(usize, usize)> = (1..=max_n)
        .map(|n| modified_precision(reference, candidate, n))
        .collect();

    if precisions[0].0 == 0 {
        return 0.0;
    }

    let weight = 1.0 / max_n as f64;
    let log_sum: f64 = precisions
        .iter()
        .map(|&(matches, total)| {
            let p = if matches == 0 {
                SMOOTHING_EPSILON / total as f64
            } else {
                matches as f64 / total as f64
            };
            weight * p.ln()
        })
        .sum();

    let (r, c) = (reference.len() as f64, candidate.len() as f64);
    let brevity_penalty = if c > r { 1.0 } else { (1.0 - r / c).exp() };

    brevity_penalty * log_sum.exp()
}

/// Length of the longest common subsequence, O(min(m, n)) space
pub fn lcs_length(a: &[String], b: &[String]) -> usize {
    let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };

    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];

    for i in 1..=long.len() {
        for j in 1..=short.len() {
            curr[j] = if long[i - 1] == short[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Sentence BLEU between the expected answer and the prediction
#[derive(Debug, Clone)]
pub struct BleuMetric {
    n_gram: usize,
}

impl BleuMetric {
    pub const NAME: &'static str = "bleu";

    pub fn new(n_gram: usize) -> Result<Self, MetricBuildError> {
        if !(1..=4).contains(&n_gram) {
            return Err(MetricBuildError::InvalidParam {
                param: "n_gram".to_string(),
                reason: format!("must be between 1 and 4, got {n_gram}"),
            });
        }
        Ok(Self { n_gram })
    }

    pub fn from_params(params: &MetricParams) -> Result<Self, MetricBuildError> {
        let mut p = Params::new(Self::NAME, params);
        let n_gram = p.usize_or("n_gram", 4)?;
        p.finish();
        Self::new(n_gram)
    }
}

#[async_trait]
impl Metric for BleuMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires_reference(&self) -> bool {
        true
    }

    async fn compute(&self, example: &DatasetRow, prediction: &PredictionRow) -> MetricResult {
        let reference = tokenize(&example.expected_answer);
        let candidate = tokenize(&prediction.answer);
        if reference.is_empty() || candidate.is_empty() {
            return MetricResult::empty();
        }

        MetricResult::scored(sentence_bleu(&reference, &candidate, self.n_gram))
    }
}

/// ROUGE-L F1 from the longest common token subsequence
#[derive(Debug, Clone, Default)]
pub struct RougeLMetric;

impl RougeLMetric {
    pub const NAME: &'static str = "rouge_l";

    pub fn from_params(params: &MetricParams) -> Result<Self, MetricBuildError> {
        Params::new(Self::NAME, params).finish();
        Ok(Self)
    }
}

#[async_trait]
impl Metric for RougeLMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires_reference(&self) -> bool {
        true
    }

    async fn compute(&self, example: &DatasetRow, prediction: &PredictionRow) -> MetricResult {
        let reference = tokenize(&example.expected_answer);
        let candidate = tokenize(&prediction.answer);
        if reference.is_empty() || candidate.is_empty() {
            return MetricResult::empty();
        }

        let lcs = lcs_length(&reference, &candidate) as f64;
        let recall = lcs / reference.len() as f64;
        let precision = lcs / candidate.len() as f64;
        let f1 = if recall + precision == 0.0 {
            0.0
        } else {
            2.0 * recall * precision / (recall + precision)
        };

        MetricResult::scored(f1)
            .with_metadata("precision", precision)
            .with_metadata("recall", recall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(expected: &str) -> DatasetRow {
        DatasetRow::new("1", "q", expected)
    }

    fn tokens(text: &str) -> Vec<String> {
        tokenize(text)
    }

    #[test]
    fn test_tokenize_lowercases() {
        assert_eq!(tokenize("The  Cat\tsat."), vec!["the", "cat", "sat."]);
    }

    #[test]
    fn test_lcs_length() {
        assert_eq!(lcs_length(&tokens("a b c d"), &tokens("a c d e")), 3);
        assert_eq!(lcs_length(&tokens("a b"), &tokens("c d")), 0);
        assert_eq!(lcs_length(&[], &tokens("a")), 0);
    }

    #[test]
    fn test_bleu_identical_is_one() {
        let t = tokens("the cat sat on the mat");
        assert!((sentence_bleu(&t, &t, 4) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bleu_no_unigram_match_is_zero() {
        assert_eq!(sentence_bleu(&tokens("a b c"), &tokens("x y z"), 4), 0.0);
    }

    #[test]
    fn test_bleu_smoothed_partial() {
        // unigrams 2/2; bigram 0/1 smoothed to 0.1; short candidate penalised
        let score = sentence_bleu(&tokens("the cat sat"), &tokens("cat the"), 2);
        let expected = (1.0 - 3.0 / 2.0f64).exp() * (1.0f64 * 0.1).sqrt();
        assert!((score - expected).abs() < 1e-9, "{score} vs {expected}");
    }

    #[test]
    fn test_bleu_unigram_precision() {
        // clipped: "the" appears once in the reference
        let score = sentence_bleu(&tokens("the cat"), &tokens("the the"), 1);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bleu_n_gram_validated() {
        assert!(BleuMetric::new(0).is_err());
        assert!(BleuMetric::new(5).is_err());
        let params = json!({"n_gram": 2}).as_object().cloned().unwrap();
        assert_eq!(BleuMetric::from_params(&params).unwrap().n_gram, 2);
    }

    #[tokio::test]
    async fn test_bleu_empty_inputs_score_zero() {
        let metric = BleuMetric::new(4).unwrap();
        let result = metric.compute(&row(""), &PredictionRow::new("an answer")).await;
        assert_eq!(result.score, 0.0);
        assert!(!result.is_error());

        let result = metric.compute(&row("expected"), &PredictionRow::new("   ")).await;
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_rouge_l_scores() {
        let metric = RougeLMetric;
        let identical = metric
            .compute(&row("Paris is the capital"), &PredictionRow::new("paris is the capital"))
            .await;
        assert!((identical.score - 1.0).abs() < 1e-9);

        // lcs = 3 of ref 4 / cand 3
        let partial = metric
            .compute(&row("a b c d"), &PredictionRow::new("a c d"))
            .await;
        let (r, p) = (0.75, 1.0);
        assert!((partial.score - 2.0 * r * p / (r + p)).abs() < 1e-9);
        assert_eq!(partial.metadata["recall"], json!(0.75));
    }
}
