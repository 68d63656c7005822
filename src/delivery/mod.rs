//! Publishing approved posts to their destinations.

pub mod dispatcher;

pub use dispatcher::{
    CAPTION_LIMIT, DeliveryConfig, DeliveryDispatcher, DeliveryOutcome, DeliveryReport,
};
