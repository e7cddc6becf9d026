use std::time::Duration;
use std::thread;
use rand::Rng;
use log::info;

/// Fixed pause, e.g. waiting for a remote page to settle.
pub fn pause(reason: &str, duration: Duration) {
    if duration.is_zero() {
        return;
    }
    info!("Waiting for {} seconds ({})...", duration.as_secs_f64(), reason);
    thread::sleep(duration);
}

/// Random whole-second pause in `min_secs..=max_secs`, in either order.
/// Returns the number of seconds slept.
pub fn human_pause(min_secs: u64, max_secs: u64) -> u64 {
    let (lo, hi) = if min_secs <= max_secs { (min_secs, max_secs) } else { (max_secs, min_secs) };
    let mut rng = rand::thread_rng();
    let delay_secs = rng.gen_range(lo..=hi);
    if delay_secs > 0 {
        info!("Waiting for {} seconds (Human Pacing)...", delay_secs);
        thread::sleep(Duration::from_secs(delay_secs));
    }
    delay_secs
}
