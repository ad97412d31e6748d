pub mod cache; // Tiered TTL cache with on-disk classification tier
pub mod classifier; // Two-stage classification and fallback chain
pub mod hash; // Content fingerprints for cache and link keys
pub mod inference; // Engine seam, session pool, deadline-bounded invoker
pub mod reconcile; // Conflict and duplicate engine
