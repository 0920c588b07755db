//! Read-side catalog services: issue detail, repository listing, and
//! platform statistics.

pub mod issues;
pub mod repositories;
pub mod stats;
