pub mod api;
pub mod config;
pub mod ledger;
pub mod messaging;
pub mod notify;
pub mod observability;
pub mod proto;
pub mod queue;
pub mod services;
pub mod storage;
pub mod worker;
pub mod workers;
