//! Node abstraction consumed by the orchestrator.
//!
//! - `Node`: RPITIT trait implemented by units of work
//! - `BoxNode`: object-safe wrapper so heterogeneous nodes share one registry
//! - `node_fn`: adapts an async closure into a `Node`
//! - `with_timeout`: bounds each execution, classifying overruns as `Timeout`

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::time::Duration;

use bulwark_types::error::NodeError;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Node trait
// ---------------------------------------------------------------------------

/// A unit of work in a workflow graph.
///
/// Uses native async fn in traits (RPITIT). Failures must be classified so
/// retry policies can filter on `NodeError::kind`.
pub trait Node: Send + Sync {
    fn execute(&self, input: &Value) -> impl Future<Output = Result<Value, NodeError>> + Send;
}

/// Object-safe version of [`Node`] with boxed futures.
///
/// A blanket implementation is provided for all types implementing `Node`.
pub trait NodeDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        input: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, NodeError>> + Send + 'a>>;
}

impl<T: Node> NodeDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        input: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, NodeError>> + Send + 'a>> {
        Box::pin(self.execute(input))
    }
}

/// Type-erased node for runtime registration.
pub struct BoxNode {
    inner: Box<dyn NodeDyn + Send + Sync>,
}

impl BoxNode {
    pub fn new<T: Node + 'static>(node: T) -> Self {
        Self {
            inner: Box::new(node),
        }
    }

    pub async fn execute(&self, input: &Value) -> Result<Value, NodeError> {
        self.inner.execute_boxed(input).await
    }
}

impl std::fmt::Debug for BoxNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxNode").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// A `Node` backed by an async closure. Build with [`node_fn`].
pub struct FnNode<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wrap `f` as a node. The closure receives an owned copy of the input.
pub fn node_fn<F, Fut>(f: F) -> FnNode<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, NodeError>> + Send,
{
    FnNode {
        f,
        _future: PhantomData,
    }
}

impl<F, Fut> Node for FnNode<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, NodeError>> + Send,
{
    fn execute(&self, input: &Value) -> impl Future<Output = Result<Value, NodeError>> + Send {
        (self.f)(input.clone())
    }
}

// ---------------------------------------------------------------------------
// Per-attempt timeout
// ---------------------------------------------------------------------------

/// A node whose executions are bounded by `limit`. Build with [`with_timeout`].
pub struct Timeout<N> {
    inner: N,
    limit: Duration,
}

/// Bound every execution of `node` by `limit`; overruns fail with
/// `ErrorKind::Timeout`.
pub fn with_timeout<N: Node>(node: N, limit: Duration) -> Timeout<N> {
    Timeout { inner: node, limit }
}

impl<N: Node> Node for Timeout<N> {
    fn execute(&self, input: &Value) -> impl Future<Output = Result<Value, NodeError>> + Send {
        let limit = self.limit;
        let execution = self.inner.execute(input);
        async move {
            match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_elapsed) => Err(NodeError::timeout(format!(
                    "node did not finish within {}ms",
                    limit.as_millis()
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_types::error::ErrorKind;
    use serde_json::json;

    struct Echo;

    impl Node for Echo {
        fn execute(&self, input: &Value) -> impl Future<Output = Result<Value, NodeError>> + Send {
            let out = input.clone();
            async move { Ok(out) }
        }
    }

    #[tokio::test]
    async fn test_box_node_delegates() {
        let node = BoxNode::new(Echo);
        let out = node.execute(&json!({"x": 1})).await.unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_node_fn_receives_input() {
        let node = BoxNode::new(node_fn(|input: Value| async move {
            let n = input["n"].as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        }));
        assert_eq!(node.execute(&json!({"n": 21})).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_node_fn_error_passthrough() {
        let node = node_fn(|_input| async { Err(NodeError::validation("missing field")) });
        let err = node.execute(&Value::Null).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_classifies_overrun() {
        let slow = node_fn(|_input| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        });
        let node = with_timeout(slow, Duration::from_millis(100));
        let err = node.execute(&Value::Null).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("100ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_passes_fast_result() {
        let node = with_timeout(Echo, Duration::from_secs(1));
        assert_eq!(node.execute(&json!("ok")).await.unwrap(), json!("ok"));
    }
}
