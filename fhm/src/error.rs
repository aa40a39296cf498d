use thiserror::Error;

pub type FhmResult<T> = Result<T, FhmError>;

/// Errors `Map::new` can return. Everything past construction either
/// succeeds or is a `Fatal` (panic), per the Fatal-vs-recoverable split
/// in the design notes: capacity wrap-around on grow is not
/// recoverable and is asserted rather than returned here.
#[derive(Debug, Clone, Error)]
pub enum FhmError {
    #[error("initial_capacity {0} is not zero or a power of two")]
    CapacityNotPowerOfTwo(usize),
    #[error("load_limit_pct {0} must be in (0, 100]")]
    InvalidLoadLimit(u8),
}
