//! Test doubles shared by unit tests (in `src/`) and integration tests (in
//! `tests/`). Compiled for tests and behind the `test-support` feature.

mod clock;
mod publisher;

pub use clock::MutableClock;
pub use publisher::{NoJitter, ScriptedPublisher};
