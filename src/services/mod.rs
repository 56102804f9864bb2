pub mod dispatch;
pub mod image_proxy;
pub mod jobs;
pub mod premium;
pub mod retention;
pub mod storage;
pub mod tokens;
