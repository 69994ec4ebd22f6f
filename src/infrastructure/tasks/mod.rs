mod banner;
mod blink;
mod network;
mod ota_listener;
mod ota_pipeline;

pub use banner::banner_task;
pub use blink::blink_task;
pub use network::{network_runner_task, wifi_connection_task};
pub use ota_listener::ota_listener_task;
pub(crate) use ota_pipeline::ota_pipeline_task;
