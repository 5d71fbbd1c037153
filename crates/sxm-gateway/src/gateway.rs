//! Execution gateway trait.
//!
//! Abstracts the venue's order-management API so the supervisor can run
//! against a real adapter, the paper venue or a test mock.

use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;
use sxm_core::{ClientOrderId, OrderId, Price, Side, Size};

use crate::error::VenueResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// A maker (post-only) limit order request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceRequest {
    pub side: Side,
    pub client_id: ClientOrderId,
    pub price: Price,
    pub size: Size,
}

/// An order currently open on the venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    /// Remaining open size.
    pub size: Size,
}

/// Venue order-management operations.
///
/// Calls may take arbitrarily long; callers bound them with a timeout and
/// treat an elapsed timeout as a transient failure.
pub trait ExecutionGateway: Send + Sync {
    /// Place a post-only limit order. Resolves to the venue order id.
    fn place(&self, request: PlaceRequest) -> BoxFuture<'_, VenueResult<OrderId>>;

    /// Cancel an order by venue id.
    fn cancel(&self, order_id: OrderId) -> BoxFuture<'_, VenueResult<()>>;

    /// Reduce-only market order: trade `size` on `side` without ever
    /// increasing or flipping the position. Resolves to the venue order id.
    fn close_position(&self, side: Side, size: Size) -> BoxFuture<'_, VenueResult<OrderId>>;

    /// Orders currently open for the instrument.
    fn open_orders(&self) -> BoxFuture<'_, VenueResult<Vec<OpenOrder>>>;

    /// Signed net position for the instrument.
    fn position(&self) -> BoxFuture<'_, VenueResult<Decimal>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Arc wrapper for ExecutionGateway trait objects.
pub type DynGateway = Arc<dyn ExecutionGateway>;
