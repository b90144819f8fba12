pub mod pipeline;
pub mod retry;
pub mod webhooks_api;
