pub mod dispatcher;

pub use dispatcher::{DispatcherConfig, WebhookDispatcher};
