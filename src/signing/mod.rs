//! 签名模块

pub mod dispatcher;
pub mod request;

pub use dispatcher::{SigningDispatcher, SigningPath};
pub use request::{SignKind, SignPayload, SignRequest, SignResult};
