//! Aggregation pipeline: fan-out fetch, normalize/dedup, ad placement,
//! composition. The orchestrator wires the stages behind the edge cache.

pub mod fetch;
pub mod normalize;
pub mod orchestrator;
pub mod placement;

pub use orchestrator::ListingOrchestrator;
