pub mod classifier;
pub mod engine;
pub mod smoothing;
pub mod types;

pub use classifier::{Classifier, ClassifierError, SpectralRuleClassifier};
pub use engine::DecisionEngine;
pub use smoothing::TemporalSmoother;
pub use types::{
    AudioClass, ClassProbabilities, DetectionConfig, DetectionEvent, CLASS_COUNT,
};
