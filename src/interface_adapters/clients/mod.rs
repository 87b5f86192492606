// Outbound clients for the hosted backend, its realtime feed and the purchase webhook.

pub mod gateway;
pub mod realtime;
pub mod webhook;

pub use gateway::HttpGateway;
pub use realtime::RealtimeClient;
pub use webhook::WebhookNotifier;
