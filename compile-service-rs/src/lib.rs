// compile-service-rs/src/lib.rs
// LaTeX compile service with an LLM-assisted fix loop.

pub mod compiler;
pub mod fix_client;
pub mod job;
pub mod log_interpreter;
pub mod pipeline;
pub mod routes;
