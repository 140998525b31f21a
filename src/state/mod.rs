pub mod entity_state;
pub mod entity_store;

pub use entity_state::{EntityState, EntitySummary, Metric, PreviousObservation};
pub use entity_store::StateStore;
