//! Exception policies and the registry that resolves them.
//!
//! An [`ExceptionPolicy`] describes how a failure of a given type is treated
//! once it is matched: redelivered, handled, continued, or eventually sent to
//! the fallback destination. The [`ExceptionPolicyRegistry`] is built once
//! and then only read, so lookups need no locking.

mod key;
mod policy;
mod registry;

pub use key::ExceptionPolicyKey;
pub use policy::{ExceptionPolicy, ExceptionPolicyBuilder};
pub use registry::ExceptionPolicyRegistry;

#[cfg(test)]
mod tests;
