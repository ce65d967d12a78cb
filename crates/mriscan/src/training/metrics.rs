//! Classification metrics over predicted probability rows.
//!
//! Averages are support-weighted. Classes that are never predicted
//! contribute zero precision.

use crate::model::ModelMetrics;

const LOG_EPSILON: f64 = 1e-7;

/// Mean categorical cross-entropy of the true class.
pub fn cross_entropy(probabilities: &[Vec<f32>], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = probabilities
        .iter()
        .zip(labels)
        .map(|(row, &label)| {
            let p = row.get(label).copied().unwrap_or(0.0) as f64;
            -p.max(LOG_EPSILON).ln()
        })
        .sum();
    total / labels.len() as f64
}

fn predicted_class(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}

/// `matrix[true][predicted]`
pub fn confusion_matrix(
    probabilities: &[Vec<f32>],
    labels: &[usize],
    num_classes: usize,
) -> Vec<Vec<u64>> {
    let mut matrix = vec![vec![0u64; num_classes]; num_classes];
    for (row, &label) in probabilities.iter().zip(labels) {
        let predicted = predicted_class(row);
        if label < num_classes && predicted < num_classes {
            matrix[label][predicted] += 1;
        }
    }
    matrix
}

/// Area under the ROC curve for one binary problem, via the rank-sum
/// statistic with averaged ranks for ties. `None` unless both positives
/// and negatives are present.
pub fn binary_roc_auc(scores: &[f32], positives: &[bool]) -> Option<f64> {
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = average_rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(positives)
        .filter(|(_, &p)| p)
        .map(|(r, _)| r)
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Support-weighted one-vs-rest ROC-AUC over the classes where it is
/// defined.
pub fn weighted_roc_auc(
    probabilities: &[Vec<f32>],
    labels: &[usize],
    num_classes: usize,
) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for class in 0..num_classes {
        let scores: Vec<f32> = probabilities
            .iter()
            .map(|row| row.get(class).copied().unwrap_or(0.0))
            .collect();
        let positives: Vec<bool> = labels.iter().map(|&l| l == class).collect();
        let support = positives.iter().filter(|&&p| p).count() as f64;
        if let Some(auc) = binary_roc_auc(&scores, &positives) {
            weighted_sum += auc * support;
            weight_total += support;
        }
    }
    if weight_total > 0.0 {
        Some(weighted_sum / weight_total)
    } else {
        None
    }
}

pub fn evaluate(probabilities: &[Vec<f32>], labels: &[usize], num_classes: usize) -> ModelMetrics {
    let total = labels.len();
    if total == 0 {
        return ModelMetrics::default();
    }

    let matrix = confusion_matrix(probabilities, labels, num_classes);
    let correct: u64 = (0..num_classes).map(|c| matrix[c][c]).sum();

    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut f1 = 0.0;
    for class in 0..num_classes {
        let support: u64 = matrix[class].iter().sum();
        if support == 0 {
            continue;
        }
        let tp = matrix[class][class] as f64;
        let predicted: u64 = matrix.iter().map(|row| row[class]).sum();
        let p = if predicted == 0 { 0.0 } else { tp / predicted as f64 };
        let r = tp / support as f64;
        let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };

        let weight = support as f64 / total as f64;
        precision += p * weight;
        recall += r * weight;
        f1 += f * weight;
    }

    ModelMetrics {
        loss: cross_entropy(probabilities, labels),
        accuracy: correct as f64 / total as f64,
        precision,
        recall,
        f1: Some(f1),
        roc_auc: weighted_roc_auc(probabilities, labels, num_classes),
        confusion_matrix: matrix,
    }
}
