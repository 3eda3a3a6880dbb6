/// Sliding replay window over application record sequence numbers.
///
/// Tracks the highest authenticated sequence number and a 64-bit bitmap of
/// the 64 sequence numbers below and including it. Checking and updating are
/// separate steps: a record is checked before decryption and only marked as
/// seen once it has authenticated, so forged records cannot advance the
/// window.
#[derive(Debug, Default)]
pub struct ReplayWindow {
    max_seq: u64,
    bitmap: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seq` has not been seen and is not too old.
    pub fn is_fresh(&self, seq: u64) -> bool {
        if seq > self.max_seq {
            return true;
        }

        let offset = self.max_seq - seq;
        offset < 64 && self.bitmap & (1 << offset) == 0
    }

    /// Mark `seq` as seen. Call only for records that authenticated.
    pub fn update(&mut self, seq: u64) {
        if seq > self.max_seq {
            let delta = seq - self.max_seq;
            self.bitmap = if delta >= 64 { 0 } else { self.bitmap << delta };
            self.bitmap |= 1;
            self.max_seq = seq;
        } else {
            let offset = self.max_seq - seq;
            if offset < 64 {
                self.bitmap |= 1 << offset;
            }
        }
    }
}
