pub mod bulkhead;
pub mod circuit_breaker;

pub use bulkhead::Bulkhead;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, SharedCircuitBreaker};
