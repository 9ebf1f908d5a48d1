pub mod customer;
pub mod delivery;
pub mod employee;
pub mod inventory_item;
pub mod inventory_movement;
pub mod order;
pub mod order_item;
pub mod product;

pub use delivery::DeliveryStatus;
pub use inventory_item::{StockStatus, StockUnit};
pub use inventory_movement::{MovementDirection, MovementReason};
pub use order::{OrderKind, OrderStatus, PaymentMethod};
