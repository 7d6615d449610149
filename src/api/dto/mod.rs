//! Data Transfer Objects for REST request/response serialization.

pub mod observe_dto;

pub use observe_dto::*;
