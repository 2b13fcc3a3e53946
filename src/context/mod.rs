// src/context/mod.rs

//! Execution context handed to the child.
//!
//! - [`model`] defines the immutable [`ExecutionContext`] and its builder.
//! - [`encoder`] turns it into environment variables and back.

pub mod encoder;
pub mod model;

pub use encoder::{
    CONTEXT_CHUNKS_ENV_VAR, CONTEXT_ENV_VAR, ContextFileMode, EncodedContext, EncoderOptions,
    MESSAGES_ENV_VAR, MessagesParams, PreparedContext, decode_env, decode_messages_env, encode,
    prepare,
};
pub use model::{ExecutionContext, ExecutionContextBuilder, ScalarValue};
