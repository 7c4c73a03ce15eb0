pub mod aggregate;
pub mod feed;
pub mod relay;
pub mod update_proxies;
