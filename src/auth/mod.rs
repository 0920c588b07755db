pub mod middleware;
pub mod rate_limit;

pub use middleware::{AuthUser, CurrentUser, MaybeAuthUser};
pub use rate_limit::RateLimiter;
