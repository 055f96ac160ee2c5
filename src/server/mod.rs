//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        POST /jobs            GET /jobs/{callback_id}            │
//! │                                                                 │
//! │  ┌─────────────────────────┐  ┌──────────────────────────────┐  │
//! │  │        handlers         │  │           routes             │  │
//! │  │ (enqueue, poll, health) │  │  (router config, CORS)       │  │
//! │  └─────────────────────────┘  └──────────────────────────────┘  │
//! └───────────────┬──────────────────────────────┬──────────────────┘
//!                 ▼                              ▼
//!       TransformationProducer              StatusCache
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    enqueue_handler, health_handler, status_handler, ApiError, AppState, ErrorResponse,
    HealthResponse,
};
pub use routes::{create_router, RouterConfig};
