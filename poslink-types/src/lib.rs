//! Type definitions for poslink

pub mod basket;
pub mod device;
pub mod error;
pub mod fiscal;
pub mod status;

pub use basket::{Basket, BasketItem, CustomerInfo, Payment};
pub use device::DeviceClass;
pub use error::{Error, Result};
pub use fiscal::FiscalRecord;
pub use status::StatusCode;
