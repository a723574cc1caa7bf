use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Best detection of one label within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub label: String,
    pub best_confidence: f32,
    pub observed_at: DateTime<Utc>,
}

/// Per-label best confidence accumulated over one session.
#[derive(Debug, Clone, Default)]
pub struct SessionAggregate {
    records: HashMap<String, DetectionRecord>,
}

impl SessionAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Max-confidence-wins merge. A confidence equal to or below the stored one
    /// leaves the record (and its timestamp) untouched. Returns whether it changed.
    pub fn fold(&mut self, label: &str, confidence: f32, observed_at: DateTime<Utc>) -> bool {
        match self.records.get_mut(label) {
            Some(record) if confidence > record.best_confidence => {
                record.best_confidence = confidence;
                record.observed_at = observed_at;
                true
            }
            Some(_) => false,
            None => {
                self.records.insert(
                    label.to_string(),
                    DetectionRecord {
                        label: label.to_string(),
                        best_confidence: confidence,
                        observed_at,
                    },
                );
                true
            }
        }
    }

    /// `"person 0.91, dog 0.72"`, strongest first. `None` when empty.
    pub fn summary(&self) -> Option<String> {
        if self.records.is_empty() {
            return None;
        }

        let mut records: Vec<&DetectionRecord> = self.records.values().collect();
        records.sort_by(|a, b| {
            b.best_confidence
                .total_cmp(&a.best_confidence)
                .then_with(|| a.label.cmp(&b.label))
        });

        let parts: Vec<String> = records
            .iter()
            .map(|record| format!("{} {:.2}", record.label, record.best_confidence))
            .collect();
        Some(parts.join(", "))
    }

    /// Empties the aggregate, returning its records ordered by label.
    pub fn drain_records(&mut self) -> Vec<DetectionRecord> {
        let mut records: Vec<DetectionRecord> = self.records.drain().map(|(_, r)| r).collect();
        records.sort_by(|a, b| a.label.cmp(&b.label));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn take(aggregate: &mut SessionAggregate, label: &str) -> DetectionRecord {
        aggregate
            .drain_records()
            .into_iter()
            .find(|record| record.label == label)
            .unwrap()
    }

    #[test]
    fn keeps_highest_confidence_and_its_timestamp() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(3);
        let t2 = t0 + Duration::seconds(6);

        let mut aggregate = SessionAggregate::new();
        assert!(aggregate.fold("A", 0.4, t0));
        assert!(aggregate.fold("A", 0.7, t1));
        assert!(!aggregate.fold("A", 0.6, t2));

        let record = take(&mut aggregate, "A");
        assert_eq!(record.best_confidence, 0.7);
        assert_eq!(record.observed_at, t1);
    }

    #[test]
    fn equal_confidence_is_a_no_op() {
        let t0 = Utc::now();
        let mut aggregate = SessionAggregate::new();
        aggregate.fold("dog", 0.5, t0);
        assert!(!aggregate.fold("dog", 0.5, t0 + Duration::seconds(1)));
        assert_eq!(take(&mut aggregate, "dog").observed_at, t0);
    }

    #[test]
    fn fold_order_does_not_change_result() {
        let t0 = Utc::now();
        let events = [("person", 0.3, 0), ("dog", 0.8, 1), ("person", 0.9, 2), ("dog", 0.2, 3)];

        let mut forward = SessionAggregate::new();
        for (label, conf, offset) in events {
            forward.fold(label, conf, t0 + Duration::seconds(offset));
        }
        let mut backward = SessionAggregate::new();
        for (label, conf, offset) in events.iter().rev() {
            backward.fold(label, *conf, t0 + Duration::seconds(*offset));
        }

        assert_eq!(forward.drain_records(), backward.drain_records());
    }

    #[test]
    fn summary_is_strongest_first() {
        let now = Utc::now();
        let mut aggregate = SessionAggregate::new();
        assert_eq!(aggregate.summary(), None);

        aggregate.fold("dog", 0.72, now);
        aggregate.fold("person", 0.912, now);
        assert_eq!(aggregate.summary().as_deref(), Some("person 0.91, dog 0.72"));
    }

    #[test]
    fn drain_sorts_by_label_and_empties() {
        let now = Utc::now();
        let mut aggregate = SessionAggregate::new();
        aggregate.fold("person", 0.9, now);
        aggregate.fold("cat", 0.2, now);

        let labels: Vec<String> = aggregate
            .drain_records()
            .into_iter()
            .map(|record| record.label)
            .collect();
        assert_eq!(labels, vec!["cat", "person"]);
        assert_eq!(aggregate.summary(), None);
    }
}
