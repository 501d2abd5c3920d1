pub mod cache;
pub mod catalog;
pub mod checkout;
pub mod delivery;
pub mod error;
pub mod executable_utils;
pub mod geocoding;
pub mod inventory;
pub mod model;
pub mod notifications;
pub mod payment;
pub mod reconciler;
pub mod storage;

pub use error::{Result, StoreError};
