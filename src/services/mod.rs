pub mod adjust;
pub mod aggregate;
pub mod feed;
pub mod pool;
pub mod proxy;
pub mod publish;
pub mod realtime;
pub mod relay;
pub mod scheduler;
