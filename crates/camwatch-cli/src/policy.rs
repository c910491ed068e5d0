use camwatch_proto::LoopConfig;
use camwatch_vision::Detection;

/// Any `person` detection counts; confidence is not checked.
pub fn person_present(detections: &[Detection]) -> bool {
    detections.iter().any(Detection::is_person)
}

pub fn should_record(detections: &[Detection], cfg: &LoopConfig) -> bool {
    cfg.auto_record && person_present(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camwatch_vision::BoundingBox;

    fn det(class: &str, confidence: f32) -> Detection {
        Detection { class: class.into(), confidence, bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0) }
    }

    fn auto(on: bool) -> LoopConfig {
        LoopConfig { auto_record: on, ..LoopConfig::default() }
    }

    #[test]
    fn person_anywhere_in_the_list_counts() {
        // the person is not the last entry
        let dets = [det("dog", 0.9), det("person", 0.2), det("cup", 0.7)];
        assert!(person_present(&dets));
        assert!(should_record(&dets, &auto(true)));
    }

    #[test]
    fn low_confidence_person_still_counts() {
        assert!(should_record(&[det("person", 0.01)], &auto(true)));
    }

    #[test]
    fn nothing_triggers_without_person_or_toggle() {
        assert!(!should_record(&[], &auto(true)));
        assert!(!should_record(&[det("cat", 0.99), det("personal computer", 0.9)], &auto(true)));
        assert!(!should_record(&[det("person", 0.99)], &auto(false)));
    }
}
