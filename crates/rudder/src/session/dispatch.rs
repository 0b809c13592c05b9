//! Tool dispatch seam: how the orchestrator hands tool-call requests to
//! whatever implements them.
//!
//! Concrete tools are external collaborators — this crate only defines the
//! dispatch interface and guarantees that every tool call the model issues
//! gets exactly one result fed back, in order. Dispatch failures are
//! reported to the model as result text (so it can self-correct), never as
//! Rust errors.

use crate::ToolDef;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;

/// Boxed future returned by [`ToolDispatcher::dispatch`].
///
/// Type alias to keep trait signatures and implementations readable.
pub type DispatchFuture<'a> = BoxFuture<'a, String>;

/// Executes tool calls on behalf of the orchestrator.
pub trait ToolDispatcher: Send + Sync {
    /// Definitions advertised to the model.
    fn definitions(&self) -> Vec<ToolDef> {
        Vec::new()
    }

    /// Execute one tool call and return its result text.
    fn dispatch(&self, name: &str, arguments: &str) -> DispatchFuture<'_>;
}

/// A dispatcher with no tools: every call returns an error result the model
/// can read. Useful for text-only sessions and tests.
pub struct NullDispatcher;

impl ToolDispatcher for NullDispatcher {
    fn dispatch(&self, name: &str, _arguments: &str) -> DispatchFuture<'_> {
        let message = format!("Error: unknown tool '{name}'. No tools are registered.");
        Box::pin(async move { message })
    }
}

/// Erased handler stored per tool name.
type DispatchHandler = Box<dyn Fn(String) -> BoxFuture<'static, String> + Send + Sync>;

/// A dispatcher built from closures, one per tool name.
///
/// # Example
///
/// ```ignore
/// let tools = FnDispatcher::new()
///     .with("echo", echo_def, |args| async move { args })
///     .with("read_file", read_def, |args| async move { read(args).await });
/// ```
#[derive(Default)]
pub struct FnDispatcher {
    defs: Vec<ToolDef>,
    handlers: HashMap<String, DispatchHandler>,
}

impl FnDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with its definition and handler.
    pub fn with<F, Fut>(mut self, def: ToolDef, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        let name = def.function.name.clone();
        self.defs.push(def);
        self.handlers
            .insert(name, Box::new(move |args| Box::pin(handler(args))));
        self
    }
}

impl ToolDispatcher for FnDispatcher {
    fn definitions(&self) -> Vec<ToolDef> {
        self.defs.clone()
    }

    fn dispatch(&self, name: &str, arguments: &str) -> DispatchFuture<'_> {
        match self.handlers.get(name) {
            Some(handler) => handler(arguments.to_string()),
            None => {
                let message = format!("Error: unknown tool '{name}'.");
                Box::pin(async move { message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_dispatcher_reports_unknown_tool() {
        let result = NullDispatcher.dispatch("grep", "{}").await;
        assert!(result.contains("unknown tool 'grep'"));
    }

    #[tokio::test]
    async fn fn_dispatcher_routes_by_name() {
        let dispatcher = FnDispatcher::new().with(
            ToolDef::new("echo", "Echo arguments back", serde_json::json!({"type": "object"})),
            |args| async move { format!("echo: {args}") },
        );

        assert_eq!(dispatcher.definitions().len(), 1);
        let result = dispatcher.dispatch("echo", r#"{"x":1}"#).await;
        assert_eq!(result, r#"echo: {"x":1}"#);

        let missing = dispatcher.dispatch("nope", "{}").await;
        assert!(missing.contains("unknown tool"));
    }
}
