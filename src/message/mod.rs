//! IRC message parsing.
//!
//! Wire format: `[@tags ][:source ]COMMAND[ param]*[ :trailing]\r\n`.
//! [`MessageRef`] is the zero-copy view used during dispatch;
//! [`Message`] owns its line and is what channel buffers retain.

mod borrowed;
mod owned;
pub mod tags;

pub use borrowed::{MessageRef, Params, Tag, Tags};
pub use owned::Message;
