//! Exponential backoff with a hard ceiling.

use std::time::Duration;

/// Delay before retry number `attempt` (1-based).
///
/// Doubles the initial delay per attempt but always arms the last value
/// that was still below `max`; the ceiling itself is never armed. With
/// an initial delay of 1s and a 64s ceiling the series runs 1, 2, 4, 8,
/// 16, 32 and then holds at 32 for every later attempt. Attempt 0 is
/// treated like attempt 1.
pub fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    // A zero initial delay would never grow; floor it at 1ms.
    let initial_ms = (initial.as_millis() as u64).max(1);
    let max_ms = max.as_millis() as u64;

    let mut remaining = attempt as i64;
    let mut delay_ms;
    let mut next_ms = initial_ms;
    loop {
        delay_ms = next_ms;
        remaining -= 1;
        next_ms = delay_ms.saturating_mul(2);
        if remaining <= 0 || next_ms >= max_ms {
            break;
        }
    }
    Duration::from_millis(delay_ms)
}
