//! Execution gateway for the sxm maker bot.
//!
//! Defines the venue boundary used by the supervisor:
//! - `ExecutionGateway`: place / cancel / close / query against a venue
//! - `MockGateway`: recording mock for tests
//! - `PaperGateway`: in-process venue that fills resting orders the mark crosses
//!
//! Asynchronous fill / cancel / reject notifications are delivered as
//! `OrderEvent`s on a channel supplied by the caller.

pub mod error;
pub mod gateway;
pub mod mock;
pub mod paper;

pub use error::{VenueError, VenueResult};
pub use gateway::{BoxFuture, DynGateway, ExecutionGateway, OpenOrder, PlaceRequest};
pub use mock::MockGateway;
pub use paper::{PaperConfig, PaperGateway};
