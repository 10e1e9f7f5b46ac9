//! Presence evaluation.
//!
//! Applies the class/confidence policy to one detector result. Pure and stateless: nothing
//! about earlier frames influences the verdict.

use crate::detect::{Detection, DetectionResult, PERSON_CLASS_ID};

/// Class and confidence policy deciding presence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PresencePolicy {
    pub target_class: u32,
    pub min_confidence: f32,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            target_class: PERSON_CLASS_ID,
            min_confidence: 0.45,
        }
    }
}

impl PresencePolicy {
    pub fn evaluate(&self, result: Option<&DetectionResult>) -> Evaluation {
        evaluate(result, self.target_class, self.min_confidence)
    }
}

/// Presence verdict for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    pub present: bool,
    /// Detections that satisfied the policy, in detector order.
    pub matches: Vec<Detection>,
}

/// Presence is true iff some detection has `class_id == target_class` and
/// `confidence >= min_confidence`. A missing or empty result is simply "nothing found".
pub fn evaluate(
    result: Option<&DetectionResult>,
    target_class: u32,
    min_confidence: f32,
) -> Evaluation {
    let matches: Vec<Detection> = result
        .into_iter()
        .flat_map(|result| result.iter())
        .filter(|d| d.class_id == target_class && d.confidence >= min_confidence)
        .cloned()
        .collect();

    Evaluation {
        present: !matches.is_empty(),
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection::new(class_id, confidence, BoundingBox::default())
    }

    #[test]
    fn absent_and_empty_results_are_not_present() {
        assert!(!evaluate(None, 0, 0.5).present);
        assert!(!evaluate(Some(&DetectionResult::default()), 0, 0.5).present);
    }

    #[test]
    fn presence_requires_class_and_confidence() {
        let result = DetectionResult::new(vec![det(2, 0.99), det(0, 0.30)]);
        let eval = evaluate(Some(&result), 0, 0.45);
        assert!(!eval.present);
        assert!(eval.matches.is_empty());

        let result = DetectionResult::new(vec![det(2, 0.99), det(0, 0.45), det(0, 0.9)]);
        let eval = evaluate(Some(&result), 0, 0.45);
        assert!(eval.present);
        assert_eq!(eval.matches, vec![det(0, 0.45), det(0, 0.9)]);
    }

    #[test]
    fn policy_uses_its_own_target() {
        let policy = PresencePolicy {
            target_class: 16,
            min_confidence: 0.2,
        };
        let result = DetectionResult::new(vec![det(0, 0.9), det(16, 0.25)]);
        let eval = policy.evaluate(Some(&result));
        assert!(eval.present);
        assert_eq!(eval.matches.len(), 1);
    }
}
