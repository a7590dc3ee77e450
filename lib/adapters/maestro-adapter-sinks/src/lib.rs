//! Sink registry client over the sinks service gRPC API.

pub mod client;

pub mod pb {
    tonic::include_proto!("sinks");
}

pub use client::GrpcSinkRegistry;
