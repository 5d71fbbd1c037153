//! In-process paper venue.
//!
//! Acks post-only placements after a configurable latency, rejects
//! placements that would cross the mark, and fills resting orders once the
//! mark trades through them. Reduce-only closes execute immediately at the
//! mark. Fills are reported as `OrderEvent::Filled`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sxm_core::{OrderEvent, OrderId, Price, Side, Size};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{VenueError, VenueResult};
use crate::gateway::{BoxFuture, ExecutionGateway, OpenOrder, PlaceRequest};

/// Paper venue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Simulated round-trip latency of every call in milliseconds.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Reject placements that would cross the current mark.
    #[serde(default = "default_true")]
    pub post_only: bool,

    /// Starting net position.
    #[serde(default)]
    pub initial_position: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            post_only: true,
            initial_position: Decimal::ZERO,
        }
    }
}

fn default_latency_ms() -> u64 {
    50
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Default)]
struct PaperBook {
    orders: HashMap<OrderId, OpenOrder>,
    mark: Option<Price>,
    position: Decimal,
    next_id: u64,
}

/// Paper execution venue.
pub struct PaperGateway {
    config: PaperConfig,
    book: Mutex<PaperBook>,
    events: mpsc::Sender<OrderEvent>,
}

impl PaperGateway {
    pub fn new(config: PaperConfig, events: mpsc::Sender<OrderEvent>) -> Self {
        let book = PaperBook {
            position: config.initial_position,
            ..Default::default()
        };
        Self {
            config,
            book: Mutex::new(book),
            events,
        }
    }

    /// Feed a new mark price; fills every resting order it crosses.
    pub async fn on_mark(&self, mark: Price) {
        let fills: Vec<OpenOrder> = {
            let mut book = self.book.lock();
            book.mark = Some(mark);

            let crossed: Vec<OrderId> = book
                .orders
                .values()
                .filter(|o| crosses(o.side, o.price, mark))
                .map(|o| o.order_id.clone())
                .collect();

            let mut fills = Vec::with_capacity(crossed.len());
            for id in crossed {
                if let Some(order) = book.orders.remove(&id) {
                    book.position += order.side.sign() * order.size.inner();
                    fills.push(order);
                }
            }
            fills
        };

        for order in fills {
            info!(
                order_id = %order.order_id,
                side = %order.side,
                price = %order.price,
                size = %order.size,
                mark = %mark,
                "Paper fill"
            );
            let event = OrderEvent::Filled {
                order_id: order.order_id,
                side: order.side,
                price: order.price,
                size: order.size,
                leaves: Size::ZERO,
            };
            if self.events.send(event).await.is_err() {
                warn!("Event receiver dropped, paper fill not delivered");
            }
        }
    }

    /// Drive `on_mark` from a watch channel until the sender is dropped.
    pub fn spawn_matcher(self: Arc<Self>, mut marks: watch::Receiver<Option<Price>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while marks.changed().await.is_ok() {
                let mark = *marks.borrow_and_update();
                if let Some(mark) = mark {
                    self.on_mark(mark).await;
                }
            }
            debug!("Paper matcher stopped");
        })
    }

    async fn latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }
}

/// A resting order at `price` is filled when the mark trades through it.
fn crosses(side: Side, price: Price, mark: Price) -> bool {
    match side {
        Side::Bid => mark <= price,
        Side::Ask => mark >= price,
    }
}

impl ExecutionGateway for PaperGateway {
    fn place(&self, request: PlaceRequest) -> BoxFuture<'_, VenueResult<OrderId>> {
        Box::pin(async move {
            self.latency().await;

            let mut book = self.book.lock();
            if self.config.post_only {
                if let Some(mark) = book.mark {
                    if crosses(request.side, request.price, mark) {
                        return Err(VenueError::Rejected(format!(
                            "post-only {} at {} would cross mark {}",
                            request.side, request.price, mark
                        )));
                    }
                }
            }

            book.next_id += 1;
            let order_id = OrderId::new(format!("paper-{}", book.next_id));
            book.orders.insert(
                order_id.clone(),
                OpenOrder {
                    order_id: order_id.clone(),
                    side: request.side,
                    price: request.price,
                    size: request.size,
                },
            );
            debug!(
                order_id = %order_id,
                client_id = %request.client_id,
                "Paper order accepted"
            );
            Ok(order_id)
        })
    }

    fn cancel(&self, order_id: OrderId) -> BoxFuture<'_, VenueResult<()>> {
        Box::pin(async move {
            self.latency().await;
            match self.book.lock().orders.remove(&order_id) {
                Some(_) => Ok(()),
                None => Err(VenueError::UnknownOrder(order_id.to_string())),
            }
        })
    }

    fn close_position(&self, side: Side, size: Size) -> BoxFuture<'_, VenueResult<OrderId>> {
        Box::pin(async move {
            self.latency().await;

            let (order_id, mark, filled) = {
                let mut book = self.book.lock();
                let Some(mark) = book.mark else {
                    return Err(VenueError::Rejected("no mark price to close at".to_string()));
                };
                // Only the part that moves the position toward zero executes.
                let reducible = match side {
                    Side::Ask => book.position.max(Decimal::ZERO),
                    Side::Bid => (-book.position).max(Decimal::ZERO),
                };
                let filled = size.inner().min(reducible);
                if filled.is_zero() {
                    return Err(VenueError::Rejected(format!(
                        "reduce-only {} would not reduce position {}",
                        side, book.position
                    )));
                }
                book.position += side.sign() * filled;
                book.next_id += 1;
                (OrderId::new(format!("paper-{}", book.next_id)), mark, Size::new(filled))
            };

            info!(
                order_id = %order_id,
                side = %side,
                size = %filled,
                mark = %mark,
                "Paper reduce-only close"
            );
            let event = OrderEvent::Filled {
                order_id: order_id.clone(),
                side,
                price: mark,
                size: filled,
                leaves: Size::ZERO,
            };
            if self.events.send(event).await.is_err() {
                warn!("Event receiver dropped, paper close fill not delivered");
            }
            Ok(order_id)
        })
    }

    fn open_orders(&self) -> BoxFuture<'_, VenueResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            self.latency().await;
            Ok(self.book.lock().orders.values().cloned().collect())
        })
    }

    fn position(&self) -> BoxFuture<'_, VenueResult<Decimal>> {
        Box::pin(async move {
            self.latency().await;
            Ok(self.book.lock().position)
        })
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}
