use chrono::Utc;
use uuid::Uuid;

/// Wall-clock source, milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SESSION_SUFFIX_LEN: usize = 6;

/// Session ids look like `<base36 millis><6 random base36 chars>`.
pub fn generate_session_id(now_ms: i64) -> String {
    let mut id = to_base36(now_ms.max(0) as u64);

    let mut entropy = Uuid::new_v4().as_u128();
    for _ in 0..SESSION_SUFFIX_LEN {
        id.push(BASE36[(entropy % 36) as usize] as char);
        entropy /= 36;
    }
    id
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    // Only ASCII digits/letters were pushed
    String::from_utf8(digits).unwrap_or_default()
}
