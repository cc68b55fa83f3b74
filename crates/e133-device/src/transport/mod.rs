//! Socket bindings that feed the decoder chain.

pub mod tcp;
pub mod udp;

pub use tcp::TcpBinding;
pub use udp::UdpBinding;
