pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown device index: {0}")]
    UnknownDeviceIndex(i32),

    #[error("Unknown status code: {0}")]
    UnknownStatusCode(i32),
}
