//! HTTP API handlers for ldk-ad

pub mod alerts;
pub mod consignments;
pub mod dashboard;
pub mod health;
pub mod settings;
pub mod sse;
pub mod vehicles;

pub use alerts::{acknowledge_alert, list_alerts};
pub use consignments::{
    approve_consignment, get_consignment, list_consignments, reject_consignment, submit_consignment,
};
pub use dashboard::get_dashboard;
pub use health::health_routes;
pub use settings::{list_settings, update_setting};
pub use sse::event_stream;
pub use vehicles::{
    change_vehicle_status, create_vehicle, delete_vehicle, get_vehicle, list_vehicles,
    update_vehicle,
};
