mod network;

pub use network::{NetworkInitError, init_network_stack, wait_for_connection};
