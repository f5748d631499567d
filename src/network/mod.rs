// submodules
pub mod capture;
pub mod device;
pub mod dns;
pub mod inventory;
pub mod parser;
pub mod sinker;
pub mod types;

// Re-export commonly used items at the module root
pub use capture::PcapClient;
pub use device::{list_all_devices, list_selected_devices};
pub use dns::NameResolver;
pub use inventory::{SocketInventory, create_socket_inventory};
pub use sinker::Sinker;
pub use types::{
    Connection, ConnectionInfo, Direction, LocalSocket, OpenSockets, ProcessInfo, Protocol,
    RemoteSocket, Segment, Utilization,
};
