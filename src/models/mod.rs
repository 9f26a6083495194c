pub mod courier;
pub mod notification;
pub mod order;
pub mod stats;
pub mod tracking;
