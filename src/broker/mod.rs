// Broker connection: config, lifecycle, reconnect and status signal

mod backoff;
mod config;
mod connection;
mod status;

pub use backoff::Backoff;
pub use config::{
    parse_broker_url, BrokerConnectionConfig, BrokerEndpoint, BrokerUrlError, Scheme,
    TopicBindings,
};
pub use connection::{BrokerLink, ConnectionManager, LinkError};
pub use status::{ConnectionStatus, StatusCallback, StatusSignal, StatusSubscription};
