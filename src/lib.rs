pub mod app_gate;
pub mod connection;
pub mod driver;
pub mod error;
pub mod frame;
pub mod layers;
pub mod node;
pub mod node_config;
pub mod router;
pub mod sim;
pub mod test_util;
pub mod timing;
pub mod topology;
pub mod util;
