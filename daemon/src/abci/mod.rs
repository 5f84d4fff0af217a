pub mod codec;
pub mod dispatch;
pub mod proto;
pub mod server;
