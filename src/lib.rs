// Alarm records, threshold evaluation and persistence
pub mod alarm;

// HTTP and WebSocket APIs
pub mod api;

// MQTT connection lifecycle
pub mod broker;

// Command publishing
pub mod command;

// Configuration loading
pub mod config;

// Payload path extraction
pub mod extract;

// Inbound frame routing
pub mod router;

// Owned telemetry session
pub mod session;

// Last-known topic payloads
pub mod state;
