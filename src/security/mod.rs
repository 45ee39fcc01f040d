//! Request screening

pub mod injection;

pub use injection::{Detection, FlattenedRequestText, InjectionScreen, RequestPart};
