//! Order book error types.

use crate::assets::Address;
use crate::order::{OrderId, OrderStatus};
use thiserror::Error;

/// Errors produced while applying events to an order book.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum BookError {
    /// Tick quantization produced a non-positive price.
    #[error("invalid price {price}: quantization by tick {tick_size} left nothing")]
    InvalidPrice {
        /// The submitted price.
        price: u64,
        /// The tick size active at the event's offset.
        tick_size: u64,
    },

    /// The order id is not present in the book and was never seen
    /// terminating.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The order already reached a terminal state; the operation is a
    /// no-op by idempotence.
    #[error("order {order_id} already terminal ({status:?})")]
    AlreadyTerminal {
        /// The terminal order.
        order_id: OrderId,
        /// Its final status.
        status: OrderStatus,
    },

    /// The cancel requestor is neither the order owner nor the exchange
    /// administrator.
    #[error("requestor {requestor} may not cancel order {order_id}")]
    Unauthorized {
        /// The order being cancelled.
        order_id: OrderId,
        /// Who asked.
        requestor: Address,
    },

    /// An order with this id is already resting in the book.
    #[error("duplicate order id {0}")]
    DuplicateOrder(OrderId),
}
