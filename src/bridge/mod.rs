pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod surface;
pub mod transport;

pub use error::{BrokerError, ErrorReason};
pub use handler::{Broker, BrokerServices, ClickedToken};
pub use protocol::{PageRequest, Reply, RequestId, RequestKind, Resolution, SurfaceNotification};
pub use registry::{Outcome, PendingRequest, RequestRegistry};
pub use server::{BridgeServer, SocketTransport};
pub use surface::{Approver, PresentationError, Presenter};
pub use transport::{InMemoryTransport, Transport};
