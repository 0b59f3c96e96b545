use tokio::time::Instant;

/// Milliseconds since `epoch` on a wrapping 32-bit clock.
///
/// Compare readings with `wrapping_sub` only.
pub fn millis_since(epoch: Instant) -> u32 {
    epoch.elapsed().as_millis() as u32
}
