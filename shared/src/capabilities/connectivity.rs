//! Connectivity capability.
//!
//! A single long-lived watch on device reachability. The shell resolves the
//! watch once per change (and once with the state current at subscription
//! time); the core derives offline/online transitions by comparing against
//! the last observation it holds.

use crux_core::capability::{CapabilityContext, Operation};
use crux_core::macros::Capability;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(tag = "op")]
pub enum ConnectivityOperation {
    Watch,
}

impl Operation for ConnectivityOperation {
    type Output = ConnectivityStatus;
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ConnectivityStatus {
    pub online: bool,
    /// Shell clock reading at the moment of observation, unix millis.
    pub observed_at_ms: u64,
}

#[derive(Capability)]
pub struct Connectivity<Ev> {
    context: CapabilityContext<ConnectivityOperation, Ev>,
}

impl<Ev> Connectivity<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<ConnectivityOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn watch<F>(&self, make_event: F)
    where
        F: Fn(ConnectivityStatus) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let mut statuses = ctx.stream_from_shell(ConnectivityOperation::Watch);
            while let Some(status) = statuses.next().await {
                ctx.update_app(make_event(status));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_shape() {
        let json = serde_json::to_value(ConnectivityOperation::Watch).unwrap();
        assert_eq!(json["op"], "Watch");
    }

    #[test]
    fn test_status_roundtrip() {
        let status = ConnectivityStatus {
            online: true,
            observed_at_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: ConnectivityStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
