pub mod alerts;
pub mod conflicts;
pub mod derivation;
pub mod processor;
