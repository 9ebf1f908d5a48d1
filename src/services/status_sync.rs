//! Translation between the order and delivery status vocabularies.
//!
//! Order status changes drive the delivery status through
//! [`delivery_status_for`]. The reverse table, [`order_status_for`], is only
//! consulted by the explicit "mark delivered" and "cancel delivery" actions.

use crate::entities::{DeliveryStatus, OrderStatus};

/// Delivery status to set when an order moves into `status`, if any.
pub fn delivery_status_for(status: OrderStatus) -> Option<DeliveryStatus> {
    match status {
        OrderStatus::Pending => Some(DeliveryStatus::Pending),
        OrderStatus::EnRoute => Some(DeliveryStatus::EnRoute),
        OrderStatus::Delivered => Some(DeliveryStatus::Completed),
        OrderStatus::Canceled => Some(DeliveryStatus::Canceled),
        OrderStatus::Preparing | OrderStatus::Ready => None,
    }
}

/// Order status pushed by a delivery-screen action that moved the delivery
/// into `status`, if any.
pub fn order_status_for(status: DeliveryStatus) -> Option<OrderStatus> {
    match status {
        DeliveryStatus::Completed => Some(OrderStatus::Delivered),
        DeliveryStatus::Canceled => Some(OrderStatus::Canceled),
        DeliveryStatus::Pending | DeliveryStatus::EnRoute => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn forward_table() {
        assert_eq!(
            delivery_status_for(OrderStatus::Pending),
            Some(DeliveryStatus::Pending)
        );
        assert_eq!(
            delivery_status_for(OrderStatus::EnRoute),
            Some(DeliveryStatus::EnRoute)
        );
        assert_eq!(
            delivery_status_for(OrderStatus::Delivered),
            Some(DeliveryStatus::Completed)
        );
        assert_eq!(
            delivery_status_for(OrderStatus::Canceled),
            Some(DeliveryStatus::Canceled)
        );
        assert_eq!(delivery_status_for(OrderStatus::Preparing), None);
        assert_eq!(delivery_status_for(OrderStatus::Ready), None);
    }

    #[test]
    fn reverse_table_only_covers_terminal_statuses() {
        for status in DeliveryStatus::iter() {
            assert_eq!(order_status_for(status).is_some(), status.is_terminal());
        }
    }

    #[test]
    fn terminal_statuses_round_trip() {
        for status in [DeliveryStatus::Completed, DeliveryStatus::Canceled] {
            let order_status = order_status_for(status).unwrap();
            assert_eq!(delivery_status_for(order_status), Some(status));
        }
    }
}
