//! Shared response envelope types for API handlers.
//!
//! Single resources are returned as bare JSON objects; collections use the
//! `{ "items": [...] }` envelope so clients never receive a top-level array.

use serde::Serialize;

/// Standard `{ "items": [T] }` collection envelope.
#[derive(Debug, Serialize)]
pub struct ItemsResponse<T: Serialize> {
    pub items: Vec<T>,
}
