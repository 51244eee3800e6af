pub mod retention;
pub mod webhooks;
