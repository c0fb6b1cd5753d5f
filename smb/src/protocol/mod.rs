pub mod body;
pub mod header;
pub mod message;

pub use message::SMBMessage;

/// Bytes covered by one credit.
pub const CREDIT_UNIT: usize = 65536;

/// Credits a transfer of `payload` bytes consumes on multi-credit dialects.
/// Zero-payload commands still cost one.
pub fn credit_charge(payload: usize) -> u16 {
    payload.div_ceil(CREDIT_UNIT).max(1) as u16
}
