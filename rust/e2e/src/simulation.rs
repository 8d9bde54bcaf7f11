//! Nodes and coordinator in one process.

use std::sync::Arc;

use tokio::task::JoinHandle;

use fedorch_client::{
    handlers::StageHandler,
    node::{LinkError, Node},
    session::ClientSession,
    settings::NodeSettings,
};
use fedorch_core::testutils::{registry::MemoryRegistry, tracking::MemoryTracker};
use fedorch_server::{
    flow::RoundFlow,
    settings::{DriverSettings, RoundSettings},
    state_machine::{events::EventSubscriber, initializer::RoundInitializer},
};

use crate::{fabric::Fabric, iris::IrisModel};

/// The name and version under which the iris model is registered.
pub const MODEL: (&str, i64) = ("iris", 1);

/// Nodes connected to an in-memory [`Fabric`], sharing an in-memory registry and tracker with
/// the coordinator.
pub struct Simulation {
    fabric: Fabric,
    tracker: Arc<MemoryTracker>,
    registry: Arc<MemoryRegistry>,
    nodes: Vec<JoinHandle<Result<(), LinkError>>>,
}

impl Simulation {
    /// Spawns one node per entry of `nodes`. The node ids start at 1, in order.
    pub fn start(nodes: Vec<NodeSettings>, model: IrisModel) -> Self {
        let (name, version) = MODEL;
        let registry = Arc::new(MemoryRegistry::new().with_model(name, version, model));
        let tracker = Arc::new(MemoryTracker::new());
        let fabric = Fabric::new();

        let nodes = nodes
            .into_iter()
            .zip(1..)
            .map(|(settings, node_id)| {
                let handler = StageHandler::new(
                    ClientSession::new(settings),
                    tracker.clone(),
                    registry.clone(),
                );
                let link = fabric.connect(node_id);
                tokio::spawn(Node::new(node_id, handler).run(link))
            })
            .collect();

        Self {
            fabric,
            tracker,
            registry,
            nodes,
        }
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn tracker(&self) -> &MemoryTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &MemoryRegistry {
        &self.registry
    }

    /// Creates the round initializer of a coordinator driving the simulated nodes.
    pub fn initializer(
        &self,
        driver_settings: DriverSettings,
        round_settings: RoundSettings,
    ) -> (RoundInitializer, EventSubscriber) {
        let flow = RoundFlow::new(
            Arc::new(self.fabric.clone()),
            driver_settings,
            round_settings,
        );
        RoundInitializer::new(
            flow,
            round_settings,
            self.tracker.clone(),
            self.registry.clone(),
        )
    }

    /// Disconnects the nodes and waits until they stopped.
    ///
    /// # Errors
    /// Fails if a node failed to deliver a reply.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.fabric.disconnect_all();
        for node in self.nodes {
            node.await??;
        }
        Ok(())
    }
}
