pub mod monitor_routes;
pub mod service_routes;
