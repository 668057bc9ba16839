pub mod payment_gateway;
pub mod shipping;

pub use payment_gateway::{HttpPaymentGateway, PaymentGateway};
pub use shipping::{HttpShipmentDispatcher, ShipmentDispatcher};
