use std::sync::Arc;

use crate::config::Config;
use crate::ledger::FjallStore;
use crate::messaging::{BrokerPublisher, Publisher};
use crate::observability::Metrics;
use crate::queue::Broker;
use crate::services::TaskService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: TaskService,
    pub store: Arc<FjallStore>,
    pub broker: Broker,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the task service to the broker's input queue
    pub fn new(config: Config, store: Arc<FjallStore>, broker: Broker, metrics: Arc<Metrics>) -> Self {
        let publisher: Arc<dyn Publisher> =
            Arc::new(BrokerPublisher::new(broker.clone(), config.broker.clone()));
        Self::with_publisher(config, store, broker, publisher, metrics)
    }

    pub fn with_publisher(
        config: Config,
        store: Arc<FjallStore>,
        broker: Broker,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let service = TaskService::new(store.clone(), publisher, metrics.clone());
        Self {
            config: Arc::new(config),
            service,
            store,
            broker,
            metrics,
        }
    }
}
