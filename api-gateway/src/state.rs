//! Shared gateway state.

use std::sync::Arc;

use tokio::sync::Notify;

use node::NodeContext;

/// State handed to every request handler.
///
/// Wraps the node context with the shutdown handle the `/terminate`
/// endpoint rings.
#[derive(Clone)]
pub struct GatewayState {
    pub ctx: NodeContext,
    pub shutdown: Arc<Notify>,
}

impl GatewayState {
    pub fn new(ctx: NodeContext) -> Self {
        GatewayState {
            ctx,
            shutdown: Arc::new(Notify::new()),
        }
    }
}
