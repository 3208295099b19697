pub mod classification;
pub mod duty_cycle;

pub use classification::{MotionType, SamplingMode, UnknownMotionType};
pub use duty_cycle::{DutyCycleConfig, DutyCycleController, DutyCycleState, TransitionEvent, DEBOUNCE_TIMER};
