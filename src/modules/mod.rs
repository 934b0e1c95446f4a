//! HolderPulse cycle engines

pub mod alert_gate;
pub mod growth_evaluator;
pub mod retention;
pub mod sampler;

pub use alert_gate::AlertGate;
pub use growth_evaluator::GrowthEvaluator;
pub use retention::RetentionSweeper;
pub use sampler::Sampler;
