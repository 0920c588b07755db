pub mod events;
pub mod feed;
pub mod issues;
pub mod profile;
pub mod public;
pub mod search;
pub mod taxonomy;
