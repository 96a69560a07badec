// #![deny(warnings)]

mod buffer;
mod common;
mod config;
mod context;
mod device;
mod executor;
mod gradient;
mod group;
mod token;

pub mod all_gather;
pub mod all_reduce;
pub mod transport;

pub use buffer::{Buffer, Element};
pub use common::*;
pub use config::CommConfig;
pub use context::DistContext;
pub use device::{Device, DeviceKind};
pub use executor::CollectiveExecutor;
pub use gradient::{
    GradientBinding, GradientReducer, GradientSource, ParamId, Parameter, ParameterSet,
    ReduceReport,
};
pub use group::{GroupSupport, ReplicaGroup, ReplicaGroups};
pub use token::{Streams, SyncToken};
pub use transport::{CollectiveTransport, Solo};

#[cfg(any(feature = "inproc", test))]
pub use transport::InprocNode;
