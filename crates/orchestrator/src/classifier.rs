//! Log-based outcome classification.
//!
//! Used only when the scheduler's accounting has nothing to say about a job.
//! Failure markers are checked before success markers: a build log that
//! printed a completion banner and then failed during transfer is a failure.

use crate::config::ClassifierSettings;

pub const DEFAULT_FAILURE_MARKERS: &[&str] = &[
    "FATAL:",
    "exit status 1",
    "✗ Container build failed",
    "✗ Transfer to remote store failed",
    "Error:",
    "FAILED",
];

pub const DEFAULT_SUCCESS_MARKERS: &[&str] = &[
    "Container Build Complete!",
    "✓ Container transferred to remote store",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogVerdict {
    Failed { marker: String },
    Completed { marker: String },
    Inconclusive,
}

#[derive(Debug, Clone)]
pub struct LogOutcomeClassifier {
    failure_markers: Vec<String>,
    success_markers: Vec<String>,
}

impl Default for LogOutcomeClassifier {
    fn default() -> Self {
        Self::from_settings(&ClassifierSettings::default())
    }
}

impl LogOutcomeClassifier {
    pub fn new(failure_markers: Vec<String>, success_markers: Vec<String>) -> Self {
        Self {
            failure_markers,
            success_markers,
        }
    }

    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        Self::new(
            settings.failure_markers.clone(),
            settings.success_markers.clone(),
        )
    }

    pub fn classify(&self, content: &str) -> LogVerdict {
        if let Some(marker) = first_match(&self.failure_markers, content) {
            return LogVerdict::Failed { marker };
        }
        if let Some(marker) = first_match(&self.success_markers, content) {
            return LogVerdict::Completed { marker };
        }
        LogVerdict::Inconclusive
    }
}

fn first_match(markers: &[String], content: &str) -> Option<String> {
    markers
        .iter()
        .find(|marker| !marker.is_empty() && content.contains(marker.as_str()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_marker() {
        let classifier = LogOutcomeClassifier::default();
        let verdict = classifier.classify("building...\nFATAL: unable to pull base image\n");
        assert_eq!(
            verdict,
            LogVerdict::Failed {
                marker: "FATAL:".to_string()
            }
        );
    }

    #[test]
    fn test_failure_wins_over_success() {
        let classifier = LogOutcomeClassifier::default();
        let log = "Container Build Complete!\nrsync error\n✗ Transfer to remote store failed\n";
        assert!(matches!(
            classifier.classify(log),
            LogVerdict::Failed { .. }
        ));
    }

    #[test]
    fn test_success_marker() {
        let classifier = LogOutcomeClassifier::default();
        let log = "INFO: Build complete\nContainer Build Complete!\n✓ Container transferred to remote store\n";
        assert_eq!(
            classifier.classify(log),
            LogVerdict::Completed {
                marker: "Container Build Complete!".to_string()
            }
        );
    }

    #[test]
    fn test_inconclusive() {
        let classifier = LogOutcomeClassifier::default();
        assert_eq!(
            classifier.classify("INFO: Starting build\n"),
            LogVerdict::Inconclusive
        );
        assert_eq!(classifier.classify(""), LogVerdict::Inconclusive);
    }

    #[test]
    fn test_custom_markers() {
        let classifier =
            LogOutcomeClassifier::new(vec!["panic".to_string()], vec!["done".to_string()]);
        assert!(matches!(
            classifier.classify("all done"),
            LogVerdict::Completed { .. }
        ));
        assert!(matches!(
            classifier.classify("FATAL: ignored here"),
            LogVerdict::Inconclusive
        ));
    }
}
