pub mod calibration;
pub mod elo_calculator;
pub mod form_decay;
pub mod goals_model;
pub mod outcome_classifier;
pub mod predictor;
pub mod projection;

pub use calibration::*;
pub use elo_calculator::*;
pub use form_decay::*;
pub use goals_model::*;
pub use outcome_classifier::*;
pub use predictor::*;
pub use projection::*;
