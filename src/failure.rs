//! Failures raised by pipeline stages and the type descriptors used to
//! classify them.
//!
//! Exception policies are matched against a failure's *lineage*: the ordered
//! list of type names from the concrete type up to its root. The lineage is
//! computed once, when a [`FailureType`] is declared, so policy lookup is a
//! plain walk over a slice.
//!
//! ```
//! use redelivery::failure::{Failure, FailureType};
//!
//! let error = FailureType::root("Error");
//! let io = error.subtype("IoError");
//! let timeout = io.subtype("TimeoutError");
//!
//! assert_eq!(
//!     timeout.lineage().collect::<Vec<_>>(),
//!     ["TimeoutError", "IoError", "Error"]
//! );
//! assert!(timeout.is_a(&io));
//!
//! let failure = Failure::new(timeout, "read timed out");
//! assert_eq!(failure.to_string(), "TimeoutError: read timed out");
//! ```

use std::{
    error::Error,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Name of the failure type assigned to panics raised by a stage.
pub const PANIC_TYPE: &str = "Panic";

struct TypeNode {
    /// Most specific first; the last element is the root.
    lineage: Box<[Arc<str>]>,
}

/// Descriptor for a failure type and its ancestors.
///
/// Cloning is cheap. Two descriptors are equal when their names are equal.
#[derive(Clone)]
pub struct FailureType(Arc<TypeNode>);

impl FailureType {
    /// Declare a root type with no ancestors.
    pub fn root(name: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(TypeNode {
            lineage: Box::new([name.into()]),
        }))
    }

    /// Declare a new type whose parent is `self`.
    #[must_use]
    pub fn subtype(&self, name: impl Into<Arc<str>>) -> Self {
        let lineage = std::iter::once(name.into())
            .chain(self.0.lineage.iter().cloned())
            .collect();
        Self(Arc::new(TypeNode { lineage }))
    }

    /// Name of the concrete type.
    #[must_use]
    pub fn name(&self) -> &str { &self.0.lineage[0] }

    /// Type names from the concrete type to the root.
    pub fn lineage(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.lineage.iter().map(AsRef::as_ref)
    }

    /// Number of ancestors between this type and the root.
    #[must_use]
    pub fn depth(&self) -> usize { self.0.lineage.len() - 1 }

    /// Returns `true` if `other` is this type or one of its ancestors.
    #[must_use]
    pub fn is_a(&self, other: &FailureType) -> bool {
        self.lineage().any(|name| name == other.name())
    }

    /// Returns `true` if a type named `name` appears in the lineage.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool { self.lineage().any(|n| n == name) }
}

impl PartialEq for FailureType {
    fn eq(&self, other: &Self) -> bool { self.name() == other.name() }
}

impl Eq for FailureType {}

impl Hash for FailureType {
    fn hash<H: Hasher>(&self, state: &mut H) { self.name().hash(state); }
}

impl fmt::Debug for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.lineage()).finish()
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// A failure raised while processing an exchange.
///
/// This is the *primary failure* of the engine: the only error that may ever
/// surface to the caller of an [`ErrorHandler`](crate::handler::ErrorHandler).
#[derive(Clone, Debug)]
pub struct Failure {
    kind: FailureType,
    message: Arc<str>,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl Failure {
    /// Create a failure of type `kind`.
    pub fn new(kind: FailureType, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying error that caused this failure.
    #[must_use]
    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Type descriptor of this failure.
    #[must_use]
    pub fn kind(&self) -> &FailureType { &self.kind }

    /// Human readable message.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }

    /// Returns `true` if this failure is of type `kind` or a subtype of it.
    #[must_use]
    pub fn is(&self, kind: &FailureType) -> bool { self.kind.is_a(kind) }

    /// Render the failure and its source chain on one line.
    #[must_use]
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut next = self.source();
        while let Some(cause) = next {
            out.push_str(": caused by: ");
            out.push_str(&cause.to_string());
            next = cause.source();
        }
        out
    }

    /// Returns `true` when both values are the same failure instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.message, &other.message) }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn Error + 'static))
    }
}
