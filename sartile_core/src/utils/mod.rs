//! Small cross-cutting helpers.

mod cancel;

pub use cancel::CancelToken;
