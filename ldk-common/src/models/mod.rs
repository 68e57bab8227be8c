//! Domain models shared by LotDesk services

pub mod alert;
pub mod consignment;
pub mod market;
pub mod vehicle;

pub use alert::{Alert, AlertKind, AlertSeverity, NewAlert};
pub use consignment::{ConsignmentStatus, ConsignmentSubmission, NewConsignment};
pub use market::MarketPosition;
pub use vehicle::{
    normalize_vin, vin_check_digit_ok, NewVehicle, Vehicle, VehicleSource, VehicleStatus,
    VehicleUpdate,
};
