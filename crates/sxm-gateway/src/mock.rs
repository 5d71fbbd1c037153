//! Recording gateway mock for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use sxm_core::{OrderId, Side, Size};

use crate::error::VenueResult;
use crate::gateway::{BoxFuture, ExecutionGateway, OpenOrder, PlaceRequest};

/// Mock execution gateway.
///
/// Records every request. Results come from the queued overrides first,
/// then default to success (`ord-N` ids for placements and closes).
/// Successful calls are mirrored into the open-order list, and successful
/// closes into the position.
#[derive(Debug, Default)]
pub struct MockGateway {
    places: Mutex<Vec<PlaceRequest>>,
    cancels: Mutex<Vec<OrderId>>,
    closes: Mutex<Vec<(Side, Size)>>,
    place_results: Mutex<VecDeque<VenueResult<OrderId>>>,
    cancel_results: Mutex<VecDeque<VenueResult<()>>>,
    close_results: Mutex<VecDeque<VenueResult<OrderId>>>,
    place_delay: Mutex<Option<Duration>>,
    cancel_delay: Mutex<Option<Duration>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    position: Mutex<Decimal>,
    next_id: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next placement.
    pub fn push_place_result(&self, result: VenueResult<OrderId>) {
        self.place_results.lock().push_back(result);
    }

    /// Queue the result of the next cancel.
    pub fn push_cancel_result(&self, result: VenueResult<()>) {
        self.cancel_results.lock().push_back(result);
    }

    /// Queue the result of the next close.
    pub fn push_close_result(&self, result: VenueResult<OrderId>) {
        self.close_results.lock().push_back(result);
    }

    pub fn set_place_delay(&self, delay: Option<Duration>) {
        *self.place_delay.lock() = delay;
    }

    pub fn set_cancel_delay(&self, delay: Option<Duration>) {
        *self.cancel_delay.lock() = delay;
    }

    pub fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        *self.open_orders.lock() = orders;
    }

    pub fn set_position(&self, net: Decimal) {
        *self.position.lock() = net;
    }

    /// Get recorded placements.
    pub fn get_places(&self) -> Vec<PlaceRequest> {
        self.places.lock().clone()
    }

    /// Get recorded cancels.
    pub fn get_cancels(&self) -> Vec<OrderId> {
        self.cancels.lock().clone()
    }

    /// Get recorded closes.
    pub fn get_closes(&self) -> Vec<(Side, Size)> {
        self.closes.lock().clone()
    }

    /// Current mirrored open orders.
    pub fn get_open_orders(&self) -> Vec<OpenOrder> {
        self.open_orders.lock().clone()
    }

    /// Clear recorded requests.
    pub fn clear(&self) {
        self.places.lock().clear();
        self.cancels.lock().clear();
        self.closes.lock().clear();
    }

    fn next_order_id(&self) -> OrderId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        OrderId::new(format!("ord-{}", n))
    }
}

impl ExecutionGateway for MockGateway {
    fn place(&self, request: PlaceRequest) -> BoxFuture<'_, VenueResult<OrderId>> {
        Box::pin(async move {
            self.places.lock().push(request.clone());
            let delay = *self.place_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let queued = self.place_results.lock().pop_front();
            let result = queued.unwrap_or_else(|| Ok(self.next_order_id()));

            if let Ok(order_id) = &result {
                self.open_orders.lock().push(OpenOrder {
                    order_id: order_id.clone(),
                    side: request.side,
                    price: request.price,
                    size: request.size,
                });
            }
            result
        })
    }

    fn cancel(&self, order_id: OrderId) -> BoxFuture<'_, VenueResult<()>> {
        Box::pin(async move {
            self.cancels.lock().push(order_id.clone());
            let delay = *self.cancel_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let result = self.cancel_results.lock().pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.open_orders.lock().retain(|o| o.order_id != order_id);
            }
            result
        })
    }

    fn close_position(&self, side: Side, size: Size) -> BoxFuture<'_, VenueResult<OrderId>> {
        Box::pin(async move {
            self.closes.lock().push((side, size));

            let queued = self.close_results.lock().pop_front();
            let result = queued.unwrap_or_else(|| Ok(self.next_order_id()));
            if result.is_ok() {
                let mut position = self.position.lock();
                let reducible = match side {
                    Side::Ask => (*position).max(Decimal::ZERO),
                    Side::Bid => (-*position).max(Decimal::ZERO),
                };
                *position += side.sign() * size.inner().min(reducible);
            }
            result
        })
    }

    fn open_orders(&self) -> BoxFuture<'_, VenueResult<Vec<OpenOrder>>> {
        Box::pin(async move { Ok(self.open_orders.lock().clone()) })
    }

    fn position(&self) -> BoxFuture<'_, VenueResult<Decimal>> {
        Box::pin(async move { Ok(*self.position.lock()) })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
