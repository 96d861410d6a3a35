use std::fmt;

use snafu::ensure;

use crate::error::{PredictionShape, Result};

/// Outcome counts of a binary classifier at one probability threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
    pub threshold: f32,
}

impl ConfusionMatrix {
    /// Count outcomes of `predictions` against `labels` (`1` is positive).
    ///
    /// `predictions` holds either one probability per label (`binary:logistic`) or two per
    /// label (2-class `multi:softprob`), in which case the second is the positive class.
    pub fn from_predictions(predictions: &[f32], labels: &[f32], threshold: f32) -> Result<Self> {
        ensure!(
            !labels.is_empty()
                && (predictions.len() == labels.len() || predictions.len() == 2 * labels.len()),
            PredictionShape {
                predictions: predictions.len(),
                labels: labels.len(),
            }
        );
        let stride = predictions.len() / labels.len();

        let mut matrix = ConfusionMatrix {
            threshold,
            ..Default::default()
        };
        for (row, label) in predictions.chunks(stride).zip(labels) {
            let predicted = row[stride - 1] > threshold;
            let actual = *label > 0.5;
            match (actual, predicted) {
                (false, false) => matrix.true_negatives += 1,
                (false, true) => matrix.false_positives += 1,
                (true, false) => matrix.false_negatives += 1,
                (true, true) => matrix.true_positives += 1,
            }
        }
        Ok(matrix)
    }

    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    pub fn accuracy(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        (self.true_positives + self.true_negatives) as f64 / self.total() as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "Confusion matrix for {} probability threshold:",
            self.threshold
        )?;
        writeln!(f)?;
        writeln!(f, "Predicted:          negative  positive")?;
        writeln!(
            f,
            "Actual:  negative {:>10} {:>9}",
            self.true_negatives, self.false_positives
        )?;
        writeln!(
            f,
            "         positive {:>10} {:>9}",
            self.false_negatives, self.true_positives
        )?;
        writeln!(f)?;
        write!(f, "Accuracy: {:.2}", self.accuracy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DemoError;

    #[test]
    fn counts_binary_outputs() {
        let matrix = ConfusionMatrix::from_predictions(
            &[0.9, 0.2, 0.6, 0.4, 0.1],
            &[1.0, 0.0, 0.0, 1.0, 0.0],
            0.5,
        )
        .unwrap();

        assert_eq!(matrix.true_positives, 1);
        assert_eq!(matrix.true_negatives, 2);
        assert_eq!(matrix.false_positives, 1);
        assert_eq!(matrix.false_negatives, 1);
        assert!((matrix.accuracy() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn uses_positive_class_of_softprob() {
        let predictions = [0.8, 0.2, 0.3, 0.7, 0.45, 0.55];
        let matrix =
            ConfusionMatrix::from_predictions(&predictions, &[0.0, 1.0, 0.0], 0.5).unwrap();
        assert_eq!(matrix.true_negatives, 1);
        assert_eq!(matrix.true_positives, 1);
        assert_eq!(matrix.false_positives, 1);

        let strict = ConfusionMatrix::from_predictions(&predictions, &[0.0, 1.0, 0.0], 0.6).unwrap();
        assert_eq!(strict.false_positives, 0);
        assert_eq!(strict.threshold, 0.6);
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let err = ConfusionMatrix::from_predictions(&[0.1, 0.2, 0.3], &[1.0, 0.0], 0.5).unwrap_err();
        assert!(matches!(
            err,
            DemoError::PredictionShape {
                predictions: 3,
                labels: 2
            }
        ));
        assert!(ConfusionMatrix::from_predictions(&[], &[], 0.5).is_err());
    }

    #[test]
    fn renders_table() {
        let matrix = ConfusionMatrix::from_predictions(&[0.9, 0.1], &[1.0, 0.0], 0.5).unwrap();
        let text = matrix.to_string();
        assert!(text.starts_with("Confusion matrix for 0.5 probability threshold:"));
        assert!(text.ends_with("Accuracy: 1.00"));
    }
}
