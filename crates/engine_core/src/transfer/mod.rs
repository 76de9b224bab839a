//! Batched buffer uploads (`spec.md` §4.F "Transfer Context").

pub mod completion;
pub mod context;
pub mod operation;

pub use completion::{Cancelled, CompletionChain};
pub use context::{TransferContext, TransferError};
pub use operation::Operation;
