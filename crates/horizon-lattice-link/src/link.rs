//! Operation links: caller-supplied steps run on every operation before it
//! is routed.
//!
//! Links run in registration order, each receiving the previous one's
//! output. A link can add headers, attach extensions or rewrite variables,
//! and can stop an operation by returning an error. They see the operation
//! on its way to a transport only; the cache keys results by the operation
//! the caller issued.
//!
//! ```ignore
//! let client = Client::builder(config)
//!     .link(|op: Operation| -> Result<Operation> {
//!         Ok(op.header("X-Request-Source", "dashboard"))
//!     })
//!     .build()?;
//! ```

use std::sync::Arc;

use crate::error::Result;
use crate::operation::Operation;

/// One step in the chain in front of the transports.
pub trait Link: Send + Sync {
    /// Transform `operation`, or fail it before it reaches a transport.
    fn apply(&self, operation: Operation) -> Result<Operation>;
}

impl<F> Link for F
where
    F: Fn(Operation) -> Result<Operation> + Send + Sync,
{
    fn apply(&self, operation: Operation) -> Result<Operation> {
        self(operation)
    }
}

/// An ordered list of links.
#[derive(Clone, Default)]
pub struct LinkChain {
    links: Vec<Arc<dyn Link>>,
}

impl LinkChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `link`; it runs after every link already in the chain.
    pub fn push(&mut self, link: Arc<dyn Link>) {
        self.links.push(link);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Run `operation` through every link in order.
    pub fn apply(&self, operation: Operation) -> Result<Operation> {
        self.links
            .iter()
            .try_fold(operation, |operation, link| link.apply(operation))
    }
}

impl std::fmt::Debug for LinkChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkChain")
            .field("links", &self.links.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;

    #[test]
    fn test_links_run_in_order() {
        let mut chain = LinkChain::new();
        chain.push(Arc::new(|op: Operation| -> Result<Operation> {
            Ok(op.header("X-Step", "first"))
        }));
        chain.push(Arc::new(|op: Operation| -> Result<Operation> {
            let previous = op.headers().get("X-Step").unwrap_or_default().to_string();
            Ok(op.header("X-Step", format!("{previous},second")))
        }));

        let op = chain.apply(Operation::query("{ a }")).unwrap();
        assert_eq!(op.headers().get("X-Step"), Some("first,second"));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_failing_link_stops_the_chain() {
        let mut chain = LinkChain::new();
        chain.push(Arc::new(|_: Operation| -> Result<Operation> {
            Err(LinkError::Config("token expired".into()))
        }));
        chain.push(Arc::new(|_: Operation| -> Result<Operation> {
            panic!("later links must not run")
        }));

        assert!(matches!(
            chain.apply(Operation::query("{ a }")),
            Err(LinkError::Config(_))
        ));
    }

    #[test]
    fn test_empty_chain_passes_operation_through() {
        let chain = LinkChain::new();
        assert!(chain.is_empty());
        let op = chain.apply(Operation::query("{ a }").operation_name("A")).unwrap();
        assert_eq!(op.operation_name.as_deref(), Some("A"));
    }
}
