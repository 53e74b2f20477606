//! Integration tests for clusterwait
//!
//! - `readiness`: waiting for components of a real, freshly created cluster

mod helpers;
mod readiness;
