pub mod gate;
pub mod transport;
mod wire;

pub use gate::{NetworkGate, Reachability};
pub use transport::{HttpTransport, Transport, UploadMetadata};
