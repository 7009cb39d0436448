pub mod movement;
pub mod purchase_order;
pub mod risk;

pub use movement::MovementType;
pub use purchase_order::PurchaseOrderStatus;
pub use risk::{RiskBand, VelocityStrategy};
