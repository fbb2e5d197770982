pub mod connectivity;
pub mod remote_service;
pub mod storage_engine;

pub use connectivity::{
    ChannelConnectivity, ConnectivityEvent, ConnectivityPublisher, ConnectivitySource,
};
pub use remote_service::RemoteService;
pub use storage_engine::{BatchOp, StorageEngine};
