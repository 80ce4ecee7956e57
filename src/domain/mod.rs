//! Domain model: aggregates, value objects, checkout planning and events.
pub mod aggregates;
pub mod analytics;
pub mod checkout;
pub mod events;
pub mod value_objects;
